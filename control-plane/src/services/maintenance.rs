use std::sync::Arc;

use crate::services::rate_limit::store_unavailable;
use crate::services::store::{SharedStore, StoreError};

const FLAG_VALUE: &str = "1";

/// Paths served regardless of the maintenance flag. Login is gated: no new
/// session starts while the flag is up, and `td-control-plane maintenance off`
/// is the way back in after a restore.
const EXEMPT_EXACT: &[&str] = &["/maintenance", "/health", "/metrics", "/auth/logout"];
const EXEMPT_PREFIXES: &[&str] = &["/developer", "/static"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceStatus {
    Enabled,
    Disabled,
    /// The store could not be read; the gate treats this as disabled.
    Unknown,
}

/// Process-wide maintenance switch kept in the shared store so every worker
/// sees the same value.
#[derive(Clone)]
pub struct MaintenanceGate {
    store: Arc<dyn SharedStore>,
    key: String,
}

impl MaintenanceGate {
    pub fn new(store: Arc<dyn SharedStore>, prefix: &str) -> Self {
        Self {
            store,
            key: format!("{}maintenance_mode", prefix),
        }
    }

    pub async fn status(&self) -> MaintenanceStatus {
        match self.store.get(&self.key).await {
            Ok(Some(_)) => MaintenanceStatus::Enabled,
            Ok(None) => MaintenanceStatus::Disabled,
            Err(e) => {
                store_unavailable("maintenance_status", &e);
                MaintenanceStatus::Unknown
            }
        }
    }

    /// Unreachable store reads as "off": serving traffic wins over blocking
    /// everyone, at the cost of not guaranteeing maintenance during an outage.
    pub async fn is_enabled(&self) -> bool {
        self.status().await == MaintenanceStatus::Enabled
    }

    /// The flag has no TTL; it persists until explicitly cleared.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        if enabled {
            self.store.set(&self.key, FLAG_VALUE).await?;
        } else {
            self.store.delete(&[self.key.clone()]).await?;
        }
        tracing::warn!(enabled, "Maintenance mode changed");
        Ok(())
    }

    pub fn is_exempt(path: &str) -> bool {
        EXEMPT_EXACT.contains(&path)
            || EXEMPT_PREFIXES.iter().any(|prefix| {
                path.strip_prefix(prefix)
                    .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MockStore;

    #[tokio::test]
    async fn flag_toggles_without_ttl() {
        let store = Arc::new(MockStore::new());
        let gate = MaintenanceGate::new(store.clone(), "td_");
        assert!(!gate.is_enabled().await);

        gate.set_enabled(true).await.unwrap();
        assert_eq!(gate.status().await, MaintenanceStatus::Enabled);
        assert_eq!(
            store.ttl("td_maintenance_mode").await.unwrap(),
            crate::services::store::KeyTtl::Persistent
        );
        assert_eq!(
            store.get("td_maintenance_mode").await.unwrap().as_deref(),
            Some("1")
        );

        gate.set_enabled(false).await.unwrap();
        assert_eq!(gate.status().await, MaintenanceStatus::Disabled);
    }

    #[tokio::test]
    async fn unreachable_store_reads_as_disabled() {
        let store = Arc::new(MockStore::new());
        let gate = MaintenanceGate::new(store.clone(), "td_");
        gate.set_enabled(true).await.unwrap();

        store.set_available(false);
        assert_eq!(gate.status().await, MaintenanceStatus::Unknown);
        assert!(!gate.is_enabled().await);
        assert!(gate.set_enabled(false).await.is_err());
    }

    #[test]
    fn allow_list_is_segment_aware() {
        for path in [
            "/maintenance",
            "/health",
            "/metrics",
            "/auth/logout",
            "/developer",
            "/developer/maintenance",
            "/static/app.css",
        ] {
            assert!(MaintenanceGate::is_exempt(path), "{} should be exempt", path);
        }

        for path in [
            "/",
            "/auth/login",
            "/auth/password",
            "/developers",
            "/maintenance/extra",
            "/staticfile",
            "/td/new",
        ] {
            assert!(!MaintenanceGate::is_exempt(path), "{} should be gated", path);
        }
    }
}
