//! Wire types for the HTTP API and their validation.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::storage::{Param, Query, QueryKind, QueryOutput};
use crate::tenant::TenantId;

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(flatten)]
    pub statement: StatementRequest,
}

/// One statement as sent on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    /// `row`, `rows` or `exec`; inferred from the statement when absent.
    #[serde(default)]
    pub kind: Option<String>,
}

/// Body of `POST /transaction`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub queries: Vec<StatementRequest>,
}

/// Body of a successful `POST /transaction`.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub results: Vec<QueryOutput>,
}

impl StatementRequest {
    /// Validate and convert into an executable [`Query`].
    pub fn into_query(self) -> Result<Query, Error> {
        if self.query.trim().is_empty() {
            return Err(Error::BadRequest("query must not be empty".to_string()));
        }

        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(i, value)| {
                Param::from_json(value).map_err(|e| match e {
                    Error::BadRequest(message) => {
                        Error::BadRequest(format!("params[{}]: {}", i, message))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let kind = match self.kind.as_deref() {
            Some(name) => QueryKind::parse(name)?,
            None => QueryKind::infer(&self.query),
        };

        Ok(Query::new(self.query, params, kind))
    }
}

impl QueryRequest {
    pub fn validate(self) -> Result<(TenantId, Query), Error> {
        let tenant = TenantId::parse(&self.tenant_id)?;
        let query = self.statement.into_query()?;
        Ok((tenant, query))
    }
}

impl TransactionRequest {
    pub fn validate(self) -> Result<(TenantId, Vec<Query>), Error> {
        let tenant = TenantId::parse(&self.tenant_id)?;
        if self.queries.is_empty() {
            return Err(Error::BadRequest(
                "queries must contain at least one statement".to_string(),
            ));
        }

        let queries = self
            .queries
            .into_iter()
            .enumerate()
            .map(|(i, statement)| {
                statement.into_query().map_err(|e| match e {
                    Error::BadRequest(message) => {
                        Error::BadRequest(format!("queries[{}]: {}", i, message))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((tenant, queries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_request(value: serde_json::Value) -> QueryRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_query_request_valid() {
        let (tenant, query) = query_request(json!({
            "tenantId": "acme",
            "query": "SELECT * FROM tasks WHERE board_id = ?",
            "params": [3]
        }))
        .validate()
        .unwrap();

        assert_eq!(tenant.as_str(), "acme");
        assert_eq!(query.kind, QueryKind::FetchAll);
        assert_eq!(query.params, vec![Param::Integer(3)]);
    }

    #[test]
    fn test_query_request_explicit_kind() {
        let (_, query) = query_request(json!({
            "tenantId": "acme",
            "query": "SELECT * FROM boards WHERE id = ?",
            "params": [1],
            "kind": "row"
        }))
        .validate()
        .unwrap();
        assert_eq!(query.kind, QueryKind::FetchOne);
    }

    #[test]
    fn test_query_request_missing_tenant() {
        let err = query_request(json!({"query": "SELECT 1"}))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_query_request_unknown_kind() {
        let err = query_request(json!({
            "tenantId": "acme",
            "query": "SELECT 1",
            "kind": "scan"
        }))
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("scan"));
    }

    #[test]
    fn test_query_request_rejects_nested_param() {
        let err = query_request(json!({
            "tenantId": "acme",
            "query": "SELECT ?",
            "params": [1, {"nested": true}]
        }))
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("params[1]"), "{err}");
    }

    #[test]
    fn test_query_request_empty_query() {
        let err = query_request(json!({"tenantId": "acme", "query": "   "}))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("query must not be empty"));
    }

    #[test]
    fn test_transaction_request_valid() {
        let request: TransactionRequest = serde_json::from_value(json!({
            "tenantId": "acme",
            "queries": [
                {"query": "UPDATE tasks SET position = ? WHERE id = ?", "params": [1, 10]},
                {"query": "UPDATE tasks SET position = ? WHERE id = ?", "params": [2, 11]}
            ]
        }))
        .unwrap();

        let (tenant, queries) = request.validate().unwrap();
        assert_eq!(tenant.as_str(), "acme");
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.kind == QueryKind::Execute));
    }

    #[test]
    fn test_transaction_request_empty() {
        let request: TransactionRequest =
            serde_json::from_value(json!({"tenantId": "acme", "queries": []})).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_transaction_request_names_bad_statement() {
        let request: TransactionRequest = serde_json::from_value(json!({
            "tenantId": "acme",
            "queries": [
                {"query": "DELETE FROM tasks"},
                {"query": ""}
            ]
        }))
        .unwrap();
        let err = request.validate().unwrap_err().to_string();
        assert!(err.contains("queries[1]"), "{err}");
    }
}
