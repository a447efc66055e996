//! Tenant database storage: path resolution, pooled handles, per-tenant job
//! queues and statement execution.
//!
//! [`TenantStore`] is the entry point the HTTP layer talks to.

pub mod executor;
pub mod paths;
pub mod pool;
pub mod query;
pub mod queue;
mod scan;

pub use paths::StoragePaths;
pub use pool::{ConnectionPool, HandleOptions, HandleSettings, TenantHandle};
pub use query::{ExecSummary, Param, Query, QueryKind, QueryOutput, Row};
pub use queue::{JobOutput, QueueSettings, TenantQueue, Work};

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{ConfigError, QueueConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::tenant::TenantId;

/// Point-in-time diagnostics for one tenant handle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    pub tenant_id: TenantId,
    pub path: PathBuf,
    #[serde(flatten)]
    pub settings: HandleSettings,
    pub opened_at: DateTime<Utc>,
    pub queued_jobs: usize,
    pub running: bool,
    pub processed_jobs: u64,
    pub failed_jobs: u64,
    pub expired_jobs: u64,
}

impl TenantInfo {
    fn from_handle(handle: &TenantHandle) -> Self {
        let stats = handle.queue.stats();
        Self {
            tenant_id: handle.tenant.clone(),
            path: handle.path.clone(),
            settings: handle.settings.clone(),
            opened_at: handle.opened_at,
            queued_jobs: handle.queue.depth(),
            running: stats.is_running(),
            processed_jobs: stats.processed(),
            failed_jobs: stats.failed(),
            expired_jobs: stats.expired(),
        }
    }
}

/// Admission, pooling and queuing for every tenant.
pub struct TenantStore {
    pool: ConnectionPool,
    lifecycle: Lifecycle,
}

impl TenantStore {
    pub fn new(paths: StoragePaths, options: HandleOptions, queue: QueueSettings) -> Self {
        Self {
            pool: ConnectionPool::new(paths, options, queue),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Build a store from the storage and queue config sections.
    pub fn from_config(
        storage: &StorageConfig,
        queue: &QueueConfig,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(
            StoragePaths::new(&storage.data_dir, storage.file_name.clone()),
            HandleOptions {
                busy_timeout: storage.busy_timeout(),
                synchronous: storage.synchronous_mode()?,
            },
            QueueSettings {
                max_depth: queue.max_depth,
                max_wait: queue.max_wait(),
            },
        ))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    /// Run one statement in the tenant's queue.
    ///
    /// Transaction control statements are refused so no job can leave the
    /// connection inside a transaction for the jobs behind it.
    pub async fn query(&self, tenant: &TenantId, query: Query) -> Result<QueryOutput> {
        query.check_transaction_control()?;
        match self.submit(tenant, Work::Single(query)).await? {
            JobOutput::Single(output) => Ok(output),
            JobOutput::Batch(_) => Err(Error::Internal(
                "single statement produced a batch result".to_string(),
            )),
        }
    }

    /// Run statements atomically as one job in the tenant's queue.
    pub async fn transaction(
        &self,
        tenant: &TenantId,
        queries: Vec<Query>,
    ) -> Result<Vec<QueryOutput>> {
        if queries.is_empty() {
            return Err(Error::BadRequest(
                "transaction must contain at least one query".to_string(),
            ));
        }
        for (index, query) in queries.iter().enumerate() {
            query.check_transaction_control().map_err(|e| match e {
                Error::BadRequest(message) => {
                    Error::BadRequest(format!("queries[{}]: {}", index, message))
                }
                other => other,
            })?;
        }
        match self.submit(tenant, Work::Batch(queries)).await? {
            JobOutput::Batch(outputs) => Ok(outputs),
            JobOutput::Single(_) => Err(Error::Internal(
                "transaction produced a single result".to_string(),
            )),
        }
    }

    /// Diagnostics for the tenant's handle, opening it if needed.
    pub async fn info(&self, tenant: &TenantId) -> Result<TenantInfo> {
        let _admission = self.lifecycle.admit().await?;
        let handle = self.pool.get_or_create(tenant).await?;
        Ok(TenantInfo::from_handle(&handle))
    }

    /// Stop admitting jobs without waiting for queues to drain.
    pub async fn begin_shutdown(&self) {
        self.lifecycle.begin_draining().await;
    }

    /// Refuse new jobs, let every queued job finish, close every handle.
    pub async fn shutdown(&self) {
        self.lifecycle.begin_draining().await;
        self.pool.close_all().await;
        self.lifecycle.mark_stopped().await;
    }

    async fn submit(&self, tenant: &TenantId, work: Work) -> Result<JobOutput> {
        let (handle, completion) = {
            let _admission = self.lifecycle.admit().await?;
            let handle = self.pool.get_or_create(tenant).await?;
            let completion = handle.queue.submit(work)?;
            (handle, completion)
        };
        queue::await_completion(&handle.tenant, completion).await
    }
}
