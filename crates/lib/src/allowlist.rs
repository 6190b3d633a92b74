//! Command allowlist: one regular expression per non-empty line, matched
//! against the full command line. A pattern authorizes a command only when it
//! matches the entire line, so an allowlisted `ls` never authorizes
//! `ls -al ; rm -rf /`.

use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Allowlist load/compile errors. `Pattern` carries the 1-based source line
/// and the raw pattern text so the operator can fix the file.
#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("reading allowlist {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("allowlist line {line}: invalid pattern `{pattern}`: {source}")]
    Pattern {
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One compiled pattern with its source line (1-based) and raw text, kept for
/// diagnostic logging.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub line: usize,
    pub raw: String,
    regex: Regex,
}

/// Compiled command allowlist. Patterns are checked in file order and the
/// first full-line match authorizes; an empty allowlist denies everything.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    patterns: Vec<PatternEntry>,
}

impl Allowlist {
    /// Compile allowlist source text: one pattern per line, lines trimmed,
    /// blank lines skipped. Fails on the first invalid pattern.
    pub fn parse(source: &str) -> Result<Self, AllowlistError> {
        let mut patterns = Vec::new();
        for (idx, raw_line) in source.lines().enumerate() {
            let raw = raw_line.trim();
            if raw.is_empty() {
                continue;
            }
            // The raw pattern must compile on its own; unbalanced parens
            // (e.g. `a)|(b`) would otherwise splice into the wrapper and
            // leave `^(?:a)|(b)$` with an unanchored branch.
            if let Err(source) = Regex::new(raw) {
                return Err(AllowlistError::Pattern {
                    line: idx + 1,
                    pattern: raw.to_string(),
                    source,
                });
            }
            // Anchored at compile time: a match is always a whole-line match.
            let anchored = format!("^(?:{})$", raw);
            let regex = Regex::new(&anchored).map_err(|source| AllowlistError::Pattern {
                line: idx + 1,
                pattern: raw.to_string(),
                source,
            })?;
            patterns.push(PatternEntry {
                line: idx + 1,
                raw: raw.to_string(),
                regex,
            });
        }
        Ok(Self { patterns })
    }

    /// Read and compile an allowlist file (UTF-8, one pattern per line).
    pub fn load(path: &Path) -> Result<Self, AllowlistError> {
        let source = std::fs::read_to_string(path).map_err(|source| AllowlistError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    /// First pattern matching the entire candidate line, if any.
    pub fn find_match(&self, line: &str) -> Option<&PatternEntry> {
        self.patterns.iter().find(|p| p.regex.is_match(line))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Candidate line for matching: program and arguments joined with single
/// spaces, then trimmed. This exact string is what a pattern must cover.
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.trim().to_string()
}
