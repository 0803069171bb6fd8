use thiserror::Error;

/// Errors raised by the filename translator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("could not find a collision-free sandbox name for '{0}': exhausted the substitution alphabet")]
    AlphabetExhausted(String),
}

/// Outcome of a single `translate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// The name to use in the sandboxed environment.
    pub name: String,
    /// False if `path` was already sandbox-local (`./...`) or had been
    /// translated by an earlier call and the memoized result is returned.
    pub newly_translated: bool,
}
