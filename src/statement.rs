//! Lightweight classification of statement text.
//!
//! Only the leading keyword (after whitespace and comments) and the presence of a
//! `RETURNING` clause are inspected; nothing here parses SQL.

use std::sync::LazyLock;

use regex::Regex;

static LEADING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s+|--[^\n]*\n|/\*(?s:.*?)\*/)*([A-Za-z]+)").expect("valid keyword regex")
});

static RETURNING_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bRETURNING\b").expect("valid returning regex"));

static UPSERT_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bON\s+CONFLICT\b.*\bDO\s+UPDATE\b").expect("valid upsert regex")
});

/// How the executor should issue and classify a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT`-prefixed; never audited.
    Read,
    /// Produces rows but may write (`WITH`, `PRAGMA`, `RETURNING`, ...).
    RowProducing,
    /// `INSERT`/`REPLACE` without `RETURNING`; may expose a generated id.
    Insert,
    /// `INSERT ... ON CONFLICT ... DO UPDATE`; exposes an id only when it inserted.
    Upsert,
    /// Any other write.
    Write,
}

impl StatementKind {
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        let keyword = leading_keyword(sql).unwrap_or_default();
        if keyword.eq_ignore_ascii_case("select") {
            return StatementKind::Read;
        }
        let row_keyword = ["with", "pragma", "explain", "values"]
            .iter()
            .any(|k| keyword.eq_ignore_ascii_case(k));
        if row_keyword || RETURNING_CLAUSE.is_match(sql) {
            return StatementKind::RowProducing;
        }
        if keyword.eq_ignore_ascii_case("insert") && UPSERT_CLAUSE.is_match(sql) {
            StatementKind::Upsert
        } else if keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
        {
            StatementKind::Insert
        } else {
            StatementKind::Write
        }
    }

    /// Statements that are recorded in the audit table and the query history.
    #[must_use]
    pub fn is_audited(self) -> bool {
        self != StatementKind::Read
    }

    #[must_use]
    pub fn returns_rows(self) -> bool {
        matches!(self, StatementKind::Read | StatementKind::RowProducing)
    }
}

fn leading_keyword(sql: &str) -> Option<&str> {
    LEADING_KEYWORD
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
