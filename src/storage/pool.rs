//! Tenant connection pool.
//!
//! Holds at most one open connection per tenant, created lazily on first use.
//! Creation goes through a per-tenant [`OnceCell`], so concurrent first
//! requests for the same tenant open the file exactly once and everyone else
//! waits for that open to finish. A failed open leaves the cell empty and
//! the next request tries again.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, SqliteConnection};
use tokio::sync::OnceCell;

use super::paths::StoragePaths;
use super::queue::{QueueSettings, TenantQueue};
use crate::error::{Error, Result};
use crate::tenant::TenantId;

/// Options applied to every tenant connection when it is opened.
#[derive(Debug, Clone)]
pub struct HandleOptions {
    pub busy_timeout: Duration,
    pub synchronous: SqliteSynchronous,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            synchronous: SqliteSynchronous::Normal,
        }
    }
}

/// Engine settings read back from a connection right after it was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleSettings {
    pub journal_mode: String,
    pub synchronous: String,
    pub busy_timeout_ms: i64,
    pub foreign_keys: bool,
}

/// One tenant's open database: its queue (which owns the connection) plus
/// metadata for diagnostics.
pub struct TenantHandle {
    pub tenant: TenantId,
    pub path: PathBuf,
    pub settings: HandleSettings,
    pub opened_at: DateTime<Utc>,
    pub queue: TenantQueue,
}

impl fmt::Debug for TenantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("tenant", &self.tenant)
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

impl TenantHandle {
    /// Open the tenant's database file and start its queue worker.
    async fn open(
        tenant: &TenantId,
        path: PathBuf,
        options: &HandleOptions,
        queue: QueueSettings,
    ) -> std::result::Result<Self, String> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| format!("cannot create '{}': {}", dir.display(), e))?;
        }

        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(options.synchronous)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true)
            .connect()
            .await
            .map_err(|e| e.to_string())?;

        let settings = match read_settings(&mut conn).await {
            Ok(settings) => settings,
            Err(e) => {
                // A file that opens but cannot answer pragmas is unusable.
                let _ = sqlx::Connection::close(conn).await;
                return Err(e.to_string());
            }
        };

        tracing::info!(
            tenant = %tenant,
            path = %path.display(),
            journal_mode = %settings.journal_mode,
            busy_timeout_ms = settings.busy_timeout_ms,
            "Opened tenant database"
        );

        Ok(Self {
            tenant: tenant.clone(),
            path,
            settings,
            opened_at: Utc::now(),
            queue: TenantQueue::spawn(tenant.clone(), conn, queue),
        })
    }
}

async fn read_settings(
    conn: &mut SqliteConnection,
) -> std::result::Result<HandleSettings, sqlx::Error> {
    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let synchronous: i64 = sqlx::query_scalar("PRAGMA synchronous")
        .fetch_one(&mut *conn)
        .await?;
    let busy_timeout_ms: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
        .fetch_one(&mut *conn)
        .await?;
    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?;

    Ok(HandleSettings {
        journal_mode: journal_mode.to_lowercase(),
        synchronous: synchronous_name(synchronous).to_string(),
        busy_timeout_ms,
        foreign_keys: foreign_keys != 0,
    })
}

fn synchronous_name(level: i64) -> &'static str {
    match level {
        0 => "off",
        1 => "normal",
        2 => "full",
        3 => "extra",
        _ => "unknown",
    }
}

type Slot = Arc<OnceCell<Arc<TenantHandle>>>;

/// Registry of open tenant handles.
///
/// Backed by [`DashMap`] so lookups for different tenants do not contend.
pub struct ConnectionPool {
    paths: StoragePaths,
    options: HandleOptions,
    queue: QueueSettings,
    slots: DashMap<TenantId, Slot>,
}

impl ConnectionPool {
    pub fn new(paths: StoragePaths, options: HandleOptions, queue: QueueSettings) -> Self {
        Self {
            paths,
            options,
            queue,
            slots: DashMap::new(),
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Return the tenant's handle, opening it on first use.
    pub async fn get_or_create(&self, tenant: &TenantId) -> Result<Arc<TenantHandle>> {
        if let Some(handle) = self.get(tenant) {
            return Ok(handle);
        }

        // Clone the slot out so no map shard lock is held across the open.
        let slot: Slot = Arc::clone(self.slots.entry(tenant.clone()).or_default().value());

        slot.get_or_try_init(|| async {
            let path = self.paths.resolve(tenant);
            TenantHandle::open(tenant, path, &self.options, self.queue)
                .await
                .map(Arc::new)
                .map_err(|message| {
                    tracing::error!(
                        tenant = %tenant,
                        error = %message,
                        "Failed to open tenant database"
                    );
                    Error::Resource {
                        tenant: tenant.to_string(),
                        message,
                    }
                })
        })
        .await
        .cloned()
    }

    /// The tenant's handle if it is already open.
    pub fn get(&self, tenant: &TenantId) -> Option<Arc<TenantHandle>> {
        self.slots
            .get(tenant)
            .and_then(|slot| slot.value().get().cloned())
    }

    /// Snapshot of every open handle.
    pub fn handles(&self) -> Vec<Arc<TenantHandle>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.value().get().cloned())
            .collect()
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every tenant queue and close its connection.
    ///
    /// Callers must have stopped admitting new jobs first.
    pub async fn close_all(&self) {
        let handles = self.handles();
        tracing::info!(tenants = handles.len(), "Closing tenant databases");

        futures::future::join_all(handles.iter().map(|handle| handle.queue.close())).await;
    }
}
