use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::model::BusinessDefaults;
use crate::notify::NotifyHub;

/// Per-tenant engines, keyed by the connection's database name.
/// Each tenant owns an Engine, a WAL file and a compactor task.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    defaults: BusinessDefaults,
}

/// Keep `[A-Za-z0-9_-]` so the name is safe as a file stem.
fn sanitize(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    let safe: String = tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(safe)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, defaults: BusinessDefaults) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            defaults,
        }
    }

    /// Get or lazily create the engine for `tenant`, replaying its WAL on first use.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let safe_name = sanitize(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::with_defaults(
                    wal_path,
                    Arc::new(NotifyHub::new()),
                    self.defaults,
                )?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!(tenant = %safe_name, "tenant loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
