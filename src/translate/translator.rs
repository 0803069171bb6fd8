use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use tracing::{debug, warn};

use super::types::{Translation, TranslateError};

/// Bidirectional mapping between original paths (possibly absolute,
/// containing `/`) and sandbox-safe flat names.
///
/// `translate` is pure: it never touches the filesystem. Callers that need
/// a sandboxed backend to actually see the file are responsible for
/// creating the symlink via [`FilenameTranslator::link`].
#[derive(Debug, Default)]
pub struct FilenameTranslator {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl FilenameTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate `path` into a slash-free sandbox name.
    ///
    /// A path beginning with `./` is assumed already sandbox-local and
    /// returned unchanged. A path seen before returns the memoized
    /// translation. Otherwise every `/` is replaced with `_`, with
    /// collisions resolved by mutating `_` to `~` and then `~` to `-`.
    pub fn translate(&mut self, path: &str) -> Result<Translation, TranslateError> {
        if path.starts_with("./") {
            return Ok(Translation { name: path.to_string(), newly_translated: false });
        }

        if let Some(existing) = self.forward.get(path) {
            return Ok(Translation { name: existing.clone(), newly_translated: false });
        }

        let mut candidate = path.replace('/', "_");
        loop {
            match self.reverse.get(&candidate) {
                None => break,
                Some(_) => {
                    if let Some(pos) = candidate.find('_') {
                        candidate.replace_range(pos..pos + 1, "~");
                    } else if let Some(pos) = candidate.find('~') {
                        candidate.replace_range(pos..pos + 1, "-");
                    } else {
                        return Err(TranslateError::AlphabetExhausted(path.to_string()));
                    }
                }
            }
        }

        self.reverse.insert(candidate.clone(), path.to_string());
        self.forward.insert(path.to_string(), candidate.clone());
        debug!(original = path, translated = %candidate, "translated filename");
        Ok(Translation { name: candidate, newly_translated: true })
    }

    /// Look up an already-translated name without creating a new one.
    pub fn forward_lookup(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    /// Rewrite a command line, substituting any whitespace-separated token
    /// that has a translation with its sandbox name. If the first token
    /// that resolves through the map is the command's executable, `./` is
    /// prepended to mark it as a local sandboxed binary. Leading `<`/`>`
    /// redirection characters are preserved on the token they prefix.
    pub fn translate_command(&self, command: &str) -> String {
        let mut executable_seen = false;
        let mut pieces: Vec<String> = Vec::new();

        for raw_token in command.split_whitespace() {
            let (prefix, rest) = match raw_token.as_bytes().first() {
                Some(b'<') | Some(b'>') => (&raw_token[..1], &raw_token[1..]),
                _ => ("", raw_token),
            };
            // A redirection-prefixed token is never the executable, no
            // matter where it falls in the token stream.
            let is_executable_candidate = prefix.is_empty() && !executable_seen;

            match self.forward.get(rest) {
                Some(val) if is_executable_candidate => pieces.push(format!("./{val}")),
                Some(val) => pieces.push(format!("{prefix}{val}")),
                None => pieces.push(raw_token.to_string()),
            }

            if prefix.is_empty() {
                executable_seen = true;
            }
        }

        pieces.join(" ")
    }

    /// Create a symlink from the translated name to the original path, for
    /// backends that cannot mount arbitrary filesystem paths.
    pub fn link(&self, original: &str) -> std::io::Result<()> {
        let Some(translated) = self.forward.get(original) else {
            return Ok(());
        };
        let link_path = Path::new(translated);
        if link_path.exists() {
            return Ok(());
        }
        symlink(original, link_path)
    }

    /// Unlink every translated symlink created by [`FilenameTranslator::link`].
    pub fn unlink_all(&self, silent: bool) {
        for translated in self.reverse.keys() {
            match fs::remove_file(translated) {
                Ok(()) => {
                    if !silent {
                        debug!(name = %translated, "removed translation symlink");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    if !silent {
                        warn!(name = %translated, error = %e, "could not remove translation symlink");
                    }
                }
            }
        }
    }

    pub fn reverse_lookup(&self, translated: &str) -> Option<&str> {
        self.reverse.get(translated).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
