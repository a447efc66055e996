//! Statement and transaction execution against one tenant connection.
//!
//! Both entry points are only ever called by a tenant's queue worker, so the
//! connection they receive is never used by anything else at the same time.

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Connection, Row as _, Sqlite, SqliteConnection, TypeInfo, ValueRef};

use super::query::{ExecSummary, Param, Query, QueryKind, QueryOutput, Row};
use crate::error::Error;

type BoundQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind parameters positionally. Values never touch the SQL text.
fn bind_params<'q>(sql: &'q str, params: &'q [Param]) -> BoundQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            Param::Null => query.bind(None::<i64>),
            Param::Integer(value) => query.bind(*value),
            Param::Real(value) => query.bind(*value),
            Param::Text(value) => query.bind(value.as_str()),
        })
}

/// Run a single statement and normalize its result.
///
/// Errors are returned as-is; nothing is retried here.
pub async fn execute(
    conn: &mut SqliteConnection,
    query: &Query,
) -> Result<QueryOutput, sqlx::Error> {
    let bound = bind_params(&query.sql, &query.params);

    match query.kind {
        QueryKind::FetchOne => {
            let row = bound.fetch_optional(&mut *conn).await?;
            Ok(QueryOutput::Row(row.as_ref().map(row_to_json).transpose()?))
        }
        QueryKind::FetchAll => {
            let rows = bound.fetch_all(&mut *conn).await?;
            let rows = rows.iter().map(row_to_json).collect::<Result<_, _>>()?;
            Ok(QueryOutput::Rows(rows))
        }
        QueryKind::Execute => {
            let done = bound.execute(&mut *conn).await?;
            let last_insert_id = (query.is_insert() && done.rows_affected() > 0)
                .then(|| done.last_insert_rowid());
            Ok(QueryOutput::Exec(ExecSummary {
                rows_affected: done.rows_affected(),
                last_insert_id,
            }))
        }
    }
}

/// Run `queries` as one atomic unit.
///
/// On the first failure the transaction is rolled back before the error is
/// returned, and the error names the failing statement's position.
pub async fn execute_batch(
    conn: &mut SqliteConnection,
    queries: &[Query],
) -> Result<Vec<QueryOutput>, Error> {
    let mut tx = conn.begin().await?;
    let mut results = Vec::with_capacity(queries.len());

    for (index, query) in queries.iter().enumerate() {
        match execute(&mut *tx, query).await {
            Ok(output) => results.push(output),
            Err(source) => {
                let rolled_back = match tx.rollback().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            index,
                            "Rollback after failed statement did not complete"
                        );
                        false
                    }
                };
                return Err(Error::transaction(index, source, rolled_back));
            }
        }
    }

    tx.commit().await?;
    Ok(results)
}

/// Decode one row into a JSON object keyed by column name.
fn row_to_json(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    use serde_json::Value;

    let mut object = Row::with_capacity(row.len());
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" | "NUMERIC" => serde_json::Number::from_f64(row.try_get::<f64, _>(index)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(index)?),
                _ => Value::String(row.try_get::<String, _>(index)?),
            }
        };

        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}
