use std::sync::Arc;

use rhinobox_core::config::Config;
use rhinobox_core::storage::StorageManager;
use rhinobox_core::versions::VersionChainManager;

use crate::middleware::rate_limit::RateLimiter;

/// Shared application state, handed to every handler behind an `Arc`.
/// Mirrors the teacher's `AppState { objects, refs }` in
/// `helix-server/src/app_state.rs`, generalised to RhinoBox's larger set of
/// core collaborators.
pub struct AppState {
    pub config: Config,
    pub storage: StorageManager,
    pub versions: VersionChainManager,
    pub rate_limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let data_path = config.data_path();
        let storage = StorageManager::open(&data_path)?;
        let versions = VersionChainManager::new(&data_path);
        let rate_limiter = RateLimiter::new(&config.rate_limit);
        Ok(Self {
            config,
            storage,
            versions,
            rate_limiter,
        })
    }
}
