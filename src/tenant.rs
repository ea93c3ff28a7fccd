use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::store::Store;
use crate::watcher;

/// Manages per-tenant engines. Each tenant gets its own Engine + store directory + watcher.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    creating: Mutex<()>,
    data_dir: PathBuf,
    seed_defaults: bool,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, seed_defaults: bool) -> Self {
        Self {
            engines: DashMap::new(),
            creating: Mutex::new(()),
            data_dir,
            seed_defaults,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    ///
    /// Engines are keyed by the sanitized name, so names that sanitize to the
    /// same directory share one engine.
    pub async fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }

        // One creation at a time: two engines over one directory would overwrite each other.
        let _creating = self.creating.lock().await;
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let store = Store::open(&self.data_dir.join(&safe_name))?;
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(store, notify)?);
        if self.seed_defaults {
            let created = engine
                .seed_default_lots()
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            if created > 0 {
                info!("tenant {safe_name}: seeded {created} default lots");
            }
        }
        self.engines.insert(safe_name.clone(), engine.clone());

        let watcher_engine = engine.clone();
        tokio::spawn(async move {
            watcher::run_watcher(watcher_engine).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        if safe_name == tenant {
            info!("tenant {tenant} ready");
        } else {
            info!("tenant {tenant} ready as {safe_name}");
        }
        Ok(engine)
    }
}

/// Keep only characters that are safe in a directory name.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
