//! Shared state for the sidecar process and its background tasks.

use std::{
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{config::Config, probe::HttpProbe, selector::EndpointSelector};

/// State injected into every API handler via [`axum::extract::State`].
pub struct ServiceState {
    pub selector: Arc<EndpointSelector>,
    /// Path the config was loaded from; re-read on reload.
    pub config_path: PathBuf,
    pub started_at: Instant,
    config_lock: RwLock<Arc<Config>>,
}

impl ServiceState {
    pub fn new(config: Arc<Config>, config_path: PathBuf, selector: Arc<EndpointSelector>) -> Self {
        Self {
            selector,
            config_path,
            started_at: Instant::now(),
            config_lock: RwLock::new(config),
        }
    }

    /// Snapshot of the current config.
    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Re-read the config file and reconfigure the selector.
    ///
    /// On any error the running config and selector are left untouched.
    pub async fn reload(&self) -> anyhow::Result<Arc<Config>> {
        let config = Config::load(&self.config_path)
            .with_context(|| format!("reloading {}", self.config_path.display()))?;
        let candidates = config.candidates()?;
        let probe = HttpProbe::new(&config.probe)?;

        self.selector
            .reconfigure(candidates, Arc::new(probe), &config.probe)
            .await;

        let config = Arc::new(config);
        *self.config_lock.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&config);
        info!(path = %self.config_path.display(), "config reloaded");
        Ok(config)
    }
}

/// Background task: re-run the selection every `every`.
///
/// The first tick fires immediately; it is skipped because startup already
/// ran a selection.
pub async fn reselect_loop(state: Arc<ServiceState>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        interval.tick().await;
        state.selector.select_best_endpoint().await;
    }
}

/// Background task: polls the config file every 5 seconds and hot-reloads on change.
///
/// Uses filesystem `mtime` for change detection. Reload failures are logged
/// and the running config is kept. After a successful reload a fresh
/// selection is made against the new candidates.
pub async fn config_watcher(state: Arc<ServiceState>) {
    let path = state.config_path.clone();
    let mut last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.tick().await;

    loop {
        interval.tick().await;

        let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        if mtime.is_none() || mtime == last_mtime {
            continue;
        }

        match state.reload().await {
            Ok(_) => {
                last_mtime = mtime;
                state.selector.select_best_endpoint().await;
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(path = %path.display(), error = %message, "config reload failed — keeping previous config");
                last_mtime = mtime;
            }
        }
    }
}
