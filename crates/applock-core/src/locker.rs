//! Wiring for a running locker: one store, one config, and the components
//! that share them.

use std::sync::Arc;
use tracing::info;

use crate::config::{load_config, LockerConfig};
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::grace::{Clock, GraceCache, MonotonicClock};
use crate::monitor::ForegroundMonitor;
use crate::registry::LockRegistry;
use crate::session::LockSessionController;
use crate::store::RecordStore;
use crate::verifier::CredentialVerifier;

pub struct AppLocker {
    store: Arc<dyn RecordStore>,
    config: LockerConfig,
    verifier: Arc<CredentialVerifier>,
    registry: Arc<LockRegistry>,
    grace: Arc<GraceCache>,
    monitor: Arc<ForegroundMonitor>,
    sessions: LockSessionController,
}

impl AppLocker {
    /// Build from whatever configuration is stored, defaults otherwise.
    pub fn open(store: Arc<dyn RecordStore>) -> Result<Self> {
        let config = load_config(store.as_ref())?;
        Self::with_config(store, config)
    }

    pub fn with_config(store: Arc<dyn RecordStore>, config: LockerConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        config: LockerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let verifier = Arc::new(CredentialVerifier::new(
            CredentialStore::new(store.clone()),
            config.clone(),
        ));
        let registry = Arc::new(LockRegistry::new(store.clone()));
        let grace = Arc::new(GraceCache::with_clock(config.grace_ttl(), clock));
        let monitor = Arc::new(ForegroundMonitor::new(&config, grace.clone(), registry.clone()));
        let sessions = LockSessionController::new(verifier.clone(), grace.clone(), &config);
        Ok(Self {
            store,
            config,
            verifier,
            registry,
            grace,
            monitor,
            sessions,
        })
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    pub fn verifier(&self) -> &Arc<CredentialVerifier> {
        &self.verifier
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.verifier.credentials()
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    pub fn grace(&self) -> &Arc<GraceCache> {
        &self.grace
    }

    pub fn monitor(&self) -> &Arc<ForegroundMonitor> {
        &self.monitor
    }

    pub fn sessions(&self) -> &LockSessionController {
        &self.sessions
    }

    /// Forget every credential and every locked app. Configuration is kept.
    pub fn full_reset(&self) -> Result<()> {
        self.verifier.credentials().clear_all()?;
        self.registry.clear()?;
        self.grace.clear();
        self.monitor.reset();
        info!("all security settings and locked apps cleared");
        Ok(())
    }
}
