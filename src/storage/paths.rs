//! Tenant database path resolution.

use std::path::{Path, PathBuf};

use crate::tenant::TenantId;

/// Maps tenant ids to database files under a base directory.
///
/// Layout: `<base>/<tenant>/<file_name>`. SQLite keeps its `-wal` and `-shm`
/// side files next to the database inside the same tenant directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    base: PathBuf,
    file_name: String,
}

impl StoragePaths {
    pub fn new(base: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            file_name: file_name.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding one tenant's database and side files.
    pub fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.base.join(tenant.as_str())
    }

    /// Database file for `tenant`. Pure and deterministic.
    pub fn resolve(&self, tenant: &TenantId) -> PathBuf {
        self.tenant_dir(tenant).join(&self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_layout() {
        let paths = StoragePaths::new("/srv/tenants", "tenant.db");
        let tenant = TenantId::parse("acme").unwrap();
        assert_eq!(
            paths.resolve(&tenant),
            PathBuf::from("/srv/tenants/acme/tenant.db")
        );
        assert_eq!(paths.tenant_dir(&tenant), PathBuf::from("/srv/tenants/acme"));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let paths = StoragePaths::new("data", "board.db");
        let tenant = TenantId::parse("team-7").unwrap();
        assert_eq!(paths.resolve(&tenant), paths.resolve(&tenant));
    }

    #[test]
    fn test_distinct_tenants_get_distinct_dirs() {
        let paths = StoragePaths::new("data", "tenant.db");
        let a = TenantId::parse("a").unwrap();
        let b = TenantId::parse("b").unwrap();
        assert_ne!(paths.tenant_dir(&a), paths.tenant_dir(&b));
    }
}
