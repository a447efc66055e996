//! HTTP API module.
//!
//! Accepts tenant-scoped statements and transactions as JSON, validates them,
//! and routes them to the tenant's serialization queue.

mod handlers;
mod server;
pub mod types;

pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use types::{QueryRequest, StatementRequest, TransactionRequest, TransactionResponse};
