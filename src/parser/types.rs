use thiserror::Error;

use crate::translate::TranslateError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("error at {file}:{line}: {text}")]
    Syntax { file: String, line: usize, text: String },

    #[error("error at {file}:{line}: expected a command")]
    MissingCommand { file: String, line: usize },

    #[error("error at {file}:{line}: variable assignment has no name")]
    EmptyAssignmentName { file: String, line: usize },

    #[error("error at {file}:{line}: {source}")]
    Translate { file: String, line: usize, #[source] source: TranslateError },

    #[error("error at {file}:{line}: could not create symbolic link for '{filename}': {message}")]
    Symlink { file: String, line: usize, filename: String, message: String },
}

/// One target/source rule plus its command, as read from the DAG file,
/// before being handed to [`crate::dag::Graph::add_node`].
#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub line: usize,
    pub command: String,
    pub local: bool,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
}

/// Controls how the parser treats filenames containing `/`.
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    /// The active backend cannot mount arbitrary filesystem paths, so
    /// slashed filenames must be translated to a flat sandbox name.
    pub sandbox_files: bool,
    /// The active backend additionally needs a symlink from the
    /// translated name back to the original materialized at parse time
    /// (true only for the cluster backend).
    pub materialize_symlinks: bool,
    /// False for non-execution modes (`-c`/`-D`/`-C`): symlinks are
    /// never created even if `materialize_symlinks` is set.
    pub execution_mode: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self { sandbox_files: false, materialize_symlinks: false, execution_mode: true }
    }
}
