//! Parsing of shell-style variable assignment files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Variables declared in an environment file.
///
/// Later assignments of the same key replace earlier ones, matching what a
/// shell does when the file is sourced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvFile {
    vars: BTreeMap<String, String>,
}

/// Errors that can occur when reading an environment file.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("Declaration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Malformed declaration at line {line}: {content}")]
    Malformed { line: usize, content: String },

    #[error("Unterminated quote at line {line}")]
    UnterminatedQuote { line: usize },

    #[error("{key} is not declared in {path}")]
    MissingKey { key: String, path: String },

    #[error("{key} is declared with an empty value")]
    EmptyValue { key: String },

    #[error("{key}={value} is not a valid version: {message}")]
    InvalidVersion {
        key: String,
        value: String,
        message: String,
    },
}

impl EnvFile {
    /// Read and parse an environment file from disk.
    pub fn load(path: &Path) -> Result<Self, EnvError> {
        if !path.exists() {
            return Err(EnvError::NotFound(path.display().to_string()));
        }

        let source = fs::read_to_string(path).map_err(|e| EnvError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        parse_env(&source)
    }

    /// Look up a declared variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Names of all declared variables, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)=(.*)$")
            .expect("assignment pattern is valid")
    })
}

/// Parse environment declarations.
///
/// Accepts `KEY=value` lines with an optional `export` prefix, single and
/// double quoted values, backslash escapes, trailing comments, blank lines
/// and `#` comment lines. Anything else is rejected with its line number,
/// including unescaped `$` or backticks outside single quotes, which a shell
/// would expand.
pub fn parse_env(source: &str) -> Result<EnvFile, EnvError> {
    let mut vars = BTreeMap::new();

    for (index, raw_line) in source.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(captures) = assignment_pattern().captures(line) else {
            return Err(EnvError::Malformed {
                line: line_number,
                content: line.to_string(),
            });
        };

        let key = captures[1].to_string();
        let value = parse_value(&captures[2], line_number, line)?;
        vars.insert(key, value);
    }

    Ok(EnvFile { vars })
}

/// Parse the right-hand side of an assignment as a single shell word.
fn parse_value(raw: &str, line: usize, content: &str) -> Result<String, EnvError> {
    let malformed = || EnvError::Malformed {
        line,
        content: content.to_string(),
    };
    let mut value = String::new();
    let mut chars = raw.char_indices();
    let mut rest_start = raw.len();

    while let Some((index, c)) = chars.next() {
        match c {
            '\'' => loop {
                match chars.next() {
                    Some((_, '\'')) => break,
                    Some((_, ch)) => value.push(ch),
                    None => return Err(EnvError::UnterminatedQuote { line }),
                }
            },
            '"' => loop {
                match chars.next() {
                    Some((_, '"')) => break,
                    Some((_, '\\')) => match chars.next() {
                        Some((_, ch @ ('"' | '\\' | '$' | '`'))) => value.push(ch),
                        Some((_, ch)) => {
                            value.push('\\');
                            value.push(ch);
                        }
                        None => return Err(EnvError::UnterminatedQuote { line }),
                    },
                    Some((_, '$' | '`')) => return Err(malformed()),
                    Some((_, ch)) => value.push(ch),
                    None => return Err(EnvError::UnterminatedQuote { line }),
                }
            },
            '\\' => {
                if let Some((_, ch)) = chars.next() {
                    value.push(ch);
                }
            }
            '$' | '`' => return Err(malformed()),
            c if c.is_whitespace() => {
                rest_start = index;
                break;
            }
            c => value.push(c),
        }
    }

    // A shell would run anything after the word as a command.
    let rest = raw[rest_start..].trim();
    if !rest.is_empty() && !rest.starts_with('#') {
        return Err(malformed());
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_assignment() {
        let env = parse_env("MDBOOK_VERSION=0.4.25\n").unwrap();

        assert_eq!(env.get("MDBOOK_VERSION"), Some("0.4.25"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let source = r#"
# Tool versions

MDBOOK_VERSION=0.4.25 # pinned for reproducible builds
"#;

        let env = parse_env(source).unwrap();

        assert_eq!(env.get("MDBOOK_VERSION"), Some("0.4.25"));
    }

    #[test]
    fn handles_export_and_quotes() {
        let source = r#"
export MDBOOK_VERSION="0.4.25"
SITE_TITLE='Essays on things'
ESCAPED="say \"hi\""
JOINED=abc'def'"ghi"
"#;

        let env = parse_env(source).unwrap();

        assert_eq!(env.get("MDBOOK_VERSION"), Some("0.4.25"));
        assert_eq!(env.get("SITE_TITLE"), Some("Essays on things"));
        assert_eq!(env.get("ESCAPED"), Some("say \"hi\""));
        assert_eq!(env.get("JOINED"), Some("abcdefghi"));
    }

    #[test]
    fn later_assignment_wins() {
        let env = parse_env("A=1\nA=2\n").unwrap();

        assert_eq!(env.get("A"), Some("2"));
    }

    #[test]
    fn keeps_hash_inside_word() {
        let env = parse_env("COLOR=#fff\n").unwrap();

        assert_eq!(env.get("COLOR"), Some("#fff"));
    }

    #[test]
    fn allows_empty_value() {
        let env = parse_env("EMPTY=\n").unwrap();

        assert_eq!(env.get("EMPTY"), Some(""));
    }

    #[test]
    fn rejects_line_without_assignment() {
        let err = parse_env("A=1\nnot an assignment\n").unwrap_err();

        match err {
            EnvError::Malformed { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "not an assignment");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_trailing_command() {
        let err = parse_env("A=foo bar\n").unwrap_err();

        assert!(matches!(err, EnvError::Malformed { line: 1, .. }));
    }

    #[test]
    fn rejects_expansions_a_shell_would_perform() {
        for source in ["A=$HOME\n", "A=\"${HOME}/bin\"\n", "A=pre`date`\n", "A=\"`date`\"\n"] {
            let err = parse_env(source).unwrap_err();
            assert!(
                matches!(err, EnvError::Malformed { line: 1, .. }),
                "{source:?} gave {err}"
            );
        }
    }

    #[test]
    fn keeps_quoted_or_escaped_dollar() {
        let source = r#"
SINGLE='$HOME'
ESCAPED=\$HOME
DOUBLE="cost \$5"
"#;

        let env = parse_env(source).unwrap();

        assert_eq!(env.get("SINGLE"), Some("$HOME"));
        assert_eq!(env.get("ESCAPED"), Some("$HOME"));
        assert_eq!(env.get("DOUBLE"), Some("cost $5"));
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = parse_env("A=\"open\n").unwrap_err();

        assert!(matches!(err, EnvError::UnterminatedQuote { line: 1 }));
    }

    #[test]
    fn load_reports_missing_file() {
        let temp = tempfile::tempdir().unwrap();

        let err = EnvFile::load(&temp.path().join(".env")).unwrap_err();

        assert!(matches!(err, EnvError::NotFound(_)));
    }

    #[test]
    fn load_reads_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(".env");
        std::fs::write(&path, "B=2\nA=1\n").unwrap();

        let env = EnvFile::load(&path).unwrap();

        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["A", "B"]);
    }
}
