//! tenant-proxy - single-writer access to per-tenant SQLite databases
//!
//! Many stateless application instances send statements over HTTP; the proxy
//! funnels every statement for a tenant through one connection and one
//! in-process queue, so each tenant's database file on shared storage only
//! ever has one writer.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod storage;
pub mod tenant;

pub use config::Config;
pub use error::{Error, Result};
pub use storage::TenantStore;
pub use tenant::TenantId;
