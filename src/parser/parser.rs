use tracing::{debug, trace};

use crate::translate::FilenameTranslator;

use super::types::{ParseError, ParsedRule, ParserOptions};

/// Parse a DAG description into an ordered sequence of rules. Assignment
/// lines (`NAME = VALUE`) are applied to the process environment as they
/// are encountered, so later `$NAME`/`${NAME}` expansions (and the
/// commands the backend eventually spawns) see them.
pub fn parse(
    text: &str,
    file_label: &str,
    mut translator: Option<&mut FilenameTranslator>,
    opts: &ParserOptions,
) -> Result<Vec<ParsedRule>, ParseError> {
    let raw_lines: Vec<&str> = text.lines().collect();
    let mut idx = 0usize;
    let mut rules = Vec::new();

    while idx < raw_lines.len() {
        let line_no = idx + 1;
        let processed = preprocess_line(raw_lines[idx]);
        idx += 1;

        if processed.trim().is_empty() {
            continue;
        }

        if idx % 1000 == 0 {
            trace!(line = idx, "reading dag file");
        }

        let eq_pos = processed.find('=');
        let colon_pos = processed.find(':');
        let is_assignment = match (eq_pos, colon_pos) {
            (Some(e), Some(c)) => e < c,
            (Some(_), None) => true,
            _ => false,
        };

        if is_assignment {
            apply_assignment(&processed, file_label, line_no)?;
            continue;
        }

        let Some(colon_pos) = colon_pos else {
            return Err(ParseError::Syntax { file: file_label.to_string(), line: line_no, text: processed });
        };

        let (target_part, rest) = processed.split_at(colon_pos);
        let source_part = &rest[1..];

        let target_tokens: Vec<&str> = target_part.split_whitespace().collect();
        let source_tokens: Vec<&str> = source_part.split_whitespace().collect();

        let targets = translate_filelist(&target_tokens, &mut translator, opts, file_label, line_no)?;
        let sources = translate_filelist(&source_tokens, &mut translator, opts, file_label, line_no)?;

        let mut command_line = None;
        while idx < raw_lines.len() {
            let cmd_line_no = idx + 1;
            let processed_cmd = preprocess_line(raw_lines[idx]);
            idx += 1;
            if processed_cmd.trim().is_empty() {
                continue;
            }
            command_line = Some((cmd_line_no, processed_cmd));
            break;
        }

        let Some((_, command_text)) = command_line else {
            return Err(ParseError::MissingCommand { file: file_label.to_string(), line: line_no });
        };

        let trimmed = command_text.trim_start();
        let (local, stripped) = match trimmed.strip_prefix("LOCAL ") {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let translated_command = match translator.as_deref() {
            Some(t) => t.translate_command(stripped),
            None => stripped.to_string(),
        };

        debug!(line = line_no, targets = ?targets, sources = ?sources, local, "parsed rule");
        rules.push(ParsedRule { line: line_no, command: translated_command, local, sources, targets });
    }

    Ok(rules)
}

fn translate_filelist(
    tokens: &[&str],
    translator: &mut Option<&mut FilenameTranslator>,
    opts: &ParserOptions,
    file_label: &str,
    line_no: usize,
) -> Result<Vec<String>, ParseError> {
    let mut out = Vec::with_capacity(tokens.len());
    for &tok in tokens {
        if tok.contains('/') && opts.sandbox_files {
            if let Some(t) = translator.as_deref_mut() {
                let translation = t.translate(tok).map_err(|e| ParseError::Translate {
                    file: file_label.to_string(),
                    line: line_no,
                    source: e,
                })?;
                if translation.newly_translated && opts.materialize_symlinks && opts.execution_mode {
                    t.link(tok).map_err(|e| ParseError::Symlink {
                        file: file_label.to_string(),
                        line: line_no,
                        filename: tok.to_string(),
                        message: e.to_string(),
                    })?;
                }
                out.push(translation.name);
                continue;
            }
        }
        out.push(tok.to_string());
    }
    Ok(out)
}

fn apply_assignment(line: &str, file_label: &str, line_no: usize) -> Result<(), ParseError> {
    let eq_pos = line.find('=').expect("caller only routes assignment lines here");
    let (name_part, rest) = line.split_at(eq_pos);
    let name = name_part.trim_end();
    let value = rest[1..].trim_start();

    if name.is_empty() {
        return Err(ParseError::EmptyAssignmentName { file: file_label.to_string(), line: line_no });
    }

    std::env::set_var(name, value);
    Ok(())
}

fn preprocess_line(raw: &str) -> String {
    expand_backslashes(&expand_env_vars(strip_comment(raw)))
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn expand_env_vars(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            if chars[i + 1] == '{' {
                if let Some(rel_end) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + rel_end].iter().collect();
                    match std::env::var(&name) {
                        Ok(v) => out.push_str(&v),
                        Err(_) => {
                            out.push_str("${");
                            out.push_str(&name);
                            out.push('}');
                        }
                    }
                    i = i + 2 + rel_end + 1;
                    continue;
                }
            } else if chars[i + 1].is_ascii_alphanumeric() || chars[i + 1] == '_' {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match std::env::var(&name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => {
                        out.push('$');
                        out.push_str(&name);
                    }
                }
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

fn expand_backslashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
