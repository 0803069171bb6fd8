use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("{path} appears to be corrupted on line {line}")]
    Corrupted { path: String, line: usize },

    #[error("couldn't open recovery log {path}: {message}")]
    Io { path: String, message: String },
}
