//! Lexical statement classifier. The proxy never builds an AST; a routing
//! decision only needs the leading keyword of each statement in a batch,
//! plus enough comment and quote awareness not to be fooled by literals.

use crate::error::ProxyError;
use std::str::FromStr;
use strum_macros::{AsRefStr, EnumString};

/// Closed command set the router understands. The first token of every
/// statement must resolve to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(ascii_case_insensitive)]
pub enum SqlCommand {
    Set,
    Select,
    Show,
    Use,
    Desc,
    Describe,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Truncate,
    Rename,
    Grant,
    Revoke,
    Begin,
    Commit,
    Rollback,
}

impl SqlCommand {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            SqlCommand::Select | SqlCommand::Show | SqlCommand::Desc | SqlCommand::Describe
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            SqlCommand::Insert
                | SqlCommand::Update
                | SqlCommand::Delete
                | SqlCommand::Create
                | SqlCommand::Alter
                | SqlCommand::Drop
        )
    }

    /// Session-stateful commands: once one of these runs, the session can
    /// no longer be split and sticks to the primary.
    pub fn pins_session(&self) -> bool {
        matches!(
            self,
            SqlCommand::Truncate
                | SqlCommand::Rename
                | SqlCommand::Grant
                | SqlCommand::Revoke
                | SqlCommand::Set
                | SqlCommand::Begin
        )
    }

    pub fn is_transaction_end(&self) -> bool {
        matches!(self, SqlCommand::Commit | SqlCommand::Rollback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedStatement {
    pub command: SqlCommand,
    pub text: String,
}

/// Splits a `COM_QUERY`/`COM_STMT_PREPARE` batch into statements and tags
/// each with its [`SqlCommand`]. Configured with the server version string
/// the proxy advertises, which gates `/*!NNNNN ... */` comments.
#[derive(Debug, Clone)]
pub struct Classifier {
    major_version: u32,
}

impl Classifier {
    pub fn new(server_version: &str) -> Self {
        let major_version = server_version
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .unwrap_or(0);
        Self { major_version }
    }

    pub fn classify(&self, batch: &str) -> Result<Vec<ClassifiedStatement>, ProxyError> {
        let normalized = self.strip_comments(batch);
        let mut statements = Vec::new();
        for stmt in split_statements(&normalized) {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let tokens = tokenize(stmt);
            let Some(first) = tokens.first() else {
                continue;
            };
            let command = SqlCommand::from_str(first)
                .map_err(|_| ProxyError::UnsupportedStatement(first.clone()))?;
            statements.push(ClassifiedStatement {
                command,
                text: stmt.to_string(),
            });
        }
        if statements.is_empty() {
            return Err(ProxyError::EmptyStatements);
        }
        Ok(statements)
    }

    /// Removes `--` line comments and `/* */` block comments outside string
    /// literals. A version-gated `/*!NNNNN ... */` block keeps its inner
    /// text when the advertised major version is at least `NNNNN / 10000`.
    fn strip_comments(&self, batch: &str) -> String {
        let bytes = batch.as_bytes();
        let mut out = String::with_capacity(batch.len());
        let mut idx = 0;
        while idx < batch.len() {
            let c = match batch[idx..].chars().next() {
                Some(c) => c,
                None => break,
            };
            match c {
                '\'' | '"' | '`' => {
                    let end = scan_quoted(batch, idx, c);
                    out.push_str(&batch[idx..end]);
                    idx = end;
                }
                '-' if bytes[idx..].starts_with(b"--") => {
                    while idx < bytes.len() && bytes[idx] != b'\n' {
                        idx += 1;
                    }
                }
                '/' if bytes[idx..].starts_with(b"/*") => {
                    let close = batch[idx + 2..]
                        .find("*/")
                        .map(|p| idx + 2 + p)
                        .unwrap_or(bytes.len());
                    let inner = &batch[idx + 2..close];
                    if let Some(gated) = inner.strip_prefix('!') {
                        let digits: String =
                            gated.chars().take_while(|c| c.is_ascii_digit()).collect();
                        let required_major = digits.parse::<u32>().unwrap_or(0) / 10_000;
                        if self.major_version >= required_major {
                            out.push_str(&gated[digits.len()..]);
                        }
                    } else {
                        out.push(' ');
                    }
                    idx = (close + 2).min(bytes.len());
                }
                _ => {
                    out.push(c);
                    idx += c.len_utf8();
                }
            }
        }
        out
    }
}

/// End index (exclusive) of a string literal opened at `start`. Per the
/// wire format the quote character itself terminates the literal; no
/// escape handling.
fn scan_quoted(text: &str, start: usize, quote: char) -> usize {
    let rest = &text[start + 1..];
    match rest.find(quote) {
        Some(pos) => start + 1 + pos + 1,
        None => text.len(),
    }
}

fn split_statements(batch: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut idx = 0;
    while idx < batch.len() {
        let c = match batch[idx..].chars().next() {
            Some(c) => c,
            None => break,
        };
        match c {
            '\'' | '"' | '`' => idx = scan_quoted(batch, idx, c),
            ';' => {
                parts.push(&batch[start..idx]);
                idx += 1;
                start = idx;
            }
            _ => idx += c.len_utf8(),
        }
    }
    if start < batch.len() {
        parts.push(&batch[start..]);
    }
    parts
}

const BREAK_CHARS: &str = "(),=<>+-*/%!;";

/// Splits one statement into tokens: identifier/keyword words, quoted
/// literals (kept whole, quotes included), and single-character operators.
pub fn tokenize(stmt: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = stmt.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            let end = scan_quoted(stmt, idx, c);
            tokens.push(stmt[idx..end].to_string());
            while chars.peek().is_some_and(|(pos, _)| *pos < end) {
                chars.next();
            }
            continue;
        }
        if BREAK_CHARS.contains(c) {
            tokens.push(c.to_string());
            continue;
        }
        let mut word = String::new();
        word.push(c);
        while let Some((_, next)) = chars.peek() {
            if next.is_whitespace() || BREAK_CHARS.contains(*next) || "'\"`".contains(*next) {
                break;
            }
            word.push(*next);
            chars.next();
        }
        tokens.push(word);
    }
    tokens
}

/// Extracts the schema name from a `USE` statement, tolerating mixed case,
/// backticks and stray whitespace.
pub fn use_database(stmt: &str) -> Result<String, ProxyError> {
    let mut tokens = tokenize(stmt);
    while tokens.last().is_some_and(|t| t == ";") {
        tokens.pop();
    }
    let is_use = tokens
        .first()
        .is_some_and(|t| t.eq_ignore_ascii_case("use"));
    if !is_use || tokens.len() != 2 {
        return Err(ProxyError::InvalidUse(stmt.to_string()));
    }
    let db = tokens[1].trim_matches('`').trim();
    if db.is_empty() {
        return Err(ProxyError::InvalidUse(stmt.to_string()));
    }
    Ok(db.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new("8.0.33-rwsplit")
    }

    fn tags(batch: &str) -> Vec<SqlCommand> {
        classifier()
            .classify(batch)
            .unwrap()
            .into_iter()
            .map(|s| s.command)
            .collect()
    }

    #[test]
    fn classify_single_statements() {
        assert_eq!(tags("SELECT * FROM t"), vec![SqlCommand::Select]);
        assert_eq!(tags("insert into t values(1)"), vec![SqlCommand::Insert]);
        assert_eq!(tags("  DESC t;"), vec![SqlCommand::Desc]);
        assert_eq!(tags("bEgIn"), vec![SqlCommand::Begin]);
    }

    #[test]
    fn classify_batch_in_order() {
        assert_eq!(
            tags("SET @x:=1; SELECT @x; COMMIT"),
            vec![SqlCommand::Set, SqlCommand::Select, SqlCommand::Commit]
        );
    }

    #[test]
    fn empty_batch_is_an_error() {
        assert!(matches!(
            classifier().classify(""),
            Err(ProxyError::EmptyStatements)
        ));
        assert!(matches!(
            classifier().classify("  ;;  "),
            Err(ProxyError::EmptyStatements)
        ));
    }

    #[test]
    fn comment_only_batch_is_an_error() {
        assert!(matches!(
            classifier().classify("-- nothing here\n/* still nothing */"),
            Err(ProxyError::EmptyStatements)
        ));
    }

    #[test]
    fn unknown_leading_token_is_unsupported() {
        match classifier().classify("OPTIMIZE TABLE t") {
            Err(ProxyError::UnsupportedStatement(tok)) => assert_eq!(tok, "OPTIMIZE"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comments_are_stripped() {
        assert_eq!(
            tags("-- leading\nSELECT 1 /* inline */; UPDATE t SET a=1 -- trailing"),
            vec![SqlCommand::Select, SqlCommand::Update]
        );
    }

    #[test]
    fn semicolons_inside_literals_do_not_split() {
        let stmts = classifier().classify("SELECT 'a;b'; SELECT \";\"").unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].text, "SELECT 'a;b'");
    }

    #[test]
    fn version_gate_below_threshold_is_included() {
        // 40000 / 10000 = 4, advertised major is 8
        assert_eq!(tags("/*!40000 SELECT 1 */"), vec![SqlCommand::Select]);
    }

    #[test]
    fn version_gate_above_threshold_is_dropped() {
        assert!(matches!(
            classifier().classify("/*!90000 SELECT 1 */"),
            Err(ProxyError::EmptyStatements)
        ));
        assert_eq!(
            tags("/*!90000 SELECT 1 */ SELECT 2"),
            vec![SqlCommand::Select]
        );
    }

    #[test]
    fn ungated_bang_comment_is_included() {
        assert_eq!(tags("/*! SELECT 1 */"), vec![SqlCommand::Select]);
    }

    #[test]
    fn classification_is_stable() {
        let batch = "/*!40101 SET @a=1 */; SELECT 'x;y' -- tail";
        let first = classifier().classify(batch).unwrap();
        let second = classifier().classify(batch).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn use_database_extraction() {
        assert_eq!(use_database("USE db1").unwrap(), "db1");
        assert_eq!(use_database("use   `weird db`  ").unwrap(), "weird db");
        assert_eq!(use_database("UsE mydb\t").unwrap(), "mydb");
        assert_eq!(use_database("USE db1 ;").unwrap(), "db1");
        assert!(matches!(
            use_database("USE"),
            Err(ProxyError::InvalidUse(_))
        ));
        assert!(matches!(
            use_database("USE a b"),
            Err(ProxyError::InvalidUse(_))
        ));
    }

    #[test]
    fn tokenizer_handles_operators_and_quotes() {
        assert_eq!(
            tokenize("SET @x:=1"),
            vec!["SET", "@x:", "=", "1"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(
            tokenize("SELECT 'it''s'"),
            // the quote character terminates the literal, so the doubled
            // quote reads as two tokens
            vec!["SELECT", "'it'", "'s'"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }
}
