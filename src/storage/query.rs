//! Statement values and their normalized results.

use serde::Serialize;

use super::scan;
use crate::error::Error;

/// A JSON object representing one result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// How a statement's result is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// At most one row; zero rows yields `null`.
    FetchOne,
    /// Zero or more rows, in engine order.
    FetchAll,
    /// A mutation; yields rows affected and, for inserts, the new row id.
    Execute,
}

impl QueryKind {
    /// Parse the wire name (`row`, `rows`, `exec`).
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "row" => Ok(Self::FetchOne),
            "rows" => Ok(Self::FetchAll),
            "exec" => Ok(Self::Execute),
            other => Err(Error::BadRequest(format!(
                "Unknown query kind '{}'. Supported: row, rows, exec",
                other
            ))),
        }
    }

    /// Choose a kind from the statement text.
    ///
    /// Read-style statements and anything with a `RETURNING` clause return
    /// rows; everything else is executed.
    pub fn infer(sql: &str) -> Self {
        let statements = scan::statements(sql);
        let Some(first) = statements.first() else {
            return Self::Execute;
        };
        let reads = matches!(
            first.first().map(String::as_str),
            Some("SELECT" | "WITH" | "PRAGMA" | "EXPLAIN" | "VALUES")
        );
        if reads || first.iter().any(|word| word == "RETURNING") {
            Self::FetchAll
        } else {
            Self::Execute
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchOne => "row",
            Self::FetchAll => "rows",
            Self::Execute => "exec",
        }
    }
}

/// Statements that open or close a transaction on the connection.
const TRANSACTION_CONTROL: &[&str] = &[
    "BEGIN",
    "COMMIT",
    "END",
    "ROLLBACK",
    "SAVEPOINT",
    "RELEASE",
];

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Param {
    /// Convert a JSON scalar. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Integer(i64::from(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Integer(i)),
                None => n.as_f64().map(Self::Real).ok_or_else(|| {
                    Error::BadRequest(format!("Unsupported numeric parameter {}", n))
                }),
            },
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(Error::BadRequest(
                "Parameters must be scalars (null, boolean, number or string)".to_string(),
            )),
        }
    }
}

/// One statement to run against a tenant database.
#[derive(Debug, Clone)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Param>,
    pub kind: QueryKind,
}

impl Query {
    pub fn new(sql: impl Into<String>, params: Vec<Param>, kind: QueryKind) -> Self {
        Self {
            sql: sql.into(),
            params,
            kind,
        }
    }

    /// Build a query whose kind is inferred from the statement text.
    pub fn inferred(sql: impl Into<String>, params: Vec<Param>) -> Self {
        let sql = sql.into();
        let kind = QueryKind::infer(&sql);
        Self { sql, params, kind }
    }

    /// Whether a successful run of this statement produces a new row id.
    ///
    /// Upserts (`ON CONFLICT ... DO UPDATE`) are excluded: when they take the
    /// update branch the connection's last row id belongs to an older insert.
    pub(crate) fn is_insert(&self) -> bool {
        let statements = scan::statements(&self.sql);
        let Some(words) = statements.first() else {
            return false;
        };
        let inserts = matches!(
            words.first().map(String::as_str),
            Some("INSERT" | "REPLACE")
        );
        let upsert = words.windows(2).any(|pair| pair[0] == "DO" && pair[1] == "UPDATE");
        inserts && !upsert
    }

    /// Reject statements that would leave the connection inside a
    /// transaction, or end one the caller does not own.
    ///
    /// Every statement of a multi-statement string is checked.
    pub fn check_transaction_control(&self) -> Result<(), Error> {
        let control = scan::statements(&self.sql).into_iter().find_map(|words| {
            words
                .into_iter()
                .next()
                .filter(|word| TRANSACTION_CONTROL.contains(&word.as_str()))
        });
        match control {
            Some(keyword) => Err(Error::BadRequest(format!(
                "{} statements are not allowed; send the statements to /transaction instead",
                keyword
            ))),
            None => Ok(()),
        }
    }
}

/// Result of an `Execute` statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecSummary {
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

/// Normalized statement result, serialized as `{ "kind": ..., "result": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "lowercase")]
pub enum QueryOutput {
    Row(Option<Row>),
    Rows(Vec<Row>),
    Exec(ExecSummary),
}
