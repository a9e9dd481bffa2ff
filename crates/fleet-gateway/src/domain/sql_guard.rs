//! Read-only SQL validation for browser-originated queries.
//!
//! A conservative keyword filter, not a security boundary: queries must
//! start with `SELECT` or `WITH`, must not contain any write/DDL keyword as
//! a whole word, and must not smuggle a second statement after a semicolon.

use thiserror::Error;

/// Keywords that reject a query wherever they appear as whole words.
const FORBIDDEN: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "EXECUTE",
    "CREATE",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlGuardError {
    #[error("empty query")]
    Empty,

    #[error("only SELECT and WITH queries are permitted")]
    NotReadOnly,

    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("multiple statements are not permitted")]
    MultipleStatements,
}

/// Validate a query as read-only.
///
/// Returns the usable statement with any single trailing semicolon removed.
pub fn validate_read_only(sql: &str) -> Result<&str, SqlGuardError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlGuardError::Empty);
    }

    // Anything after the first semicolon must be whitespace
    let statement = match trimmed.find(';') {
        Some(pos) => {
            if trimmed[pos + 1..].trim().is_empty() {
                trimmed[..pos].trim_end()
            } else {
                return Err(SqlGuardError::MultipleStatements);
            }
        }
        None => trimmed,
    };

    let mut words = word_tokens(statement);
    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("SELECT") || first.eq_ignore_ascii_case("WITH") => {}
        _ => return Err(SqlGuardError::NotReadOnly),
    }

    for word in word_tokens(statement) {
        if FORBIDDEN.iter().any(|kw| word.eq_ignore_ascii_case(kw)) {
            return Err(SqlGuardError::ForbiddenKeyword(word.to_uppercase()));
        }
    }

    Ok(statement)
}

/// Iterate identifier-like tokens (whole words) of a statement.
fn word_tokens(statement: &str) -> impl Iterator<Item = &str> {
    statement
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}
