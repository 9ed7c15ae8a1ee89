use crate::config::ServerConfig;
use crate::upload_session::SessionMeta;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

/// Shared server state. The upload-session registry and per-path lock map follow
/// the same "concurrent map of lazily-created entries" shape as the reference
/// backup server's `server_semaphores: Mutex<HashMap<...>>`, generalized to
/// `dashmap::DashMap` so lookups don't serialize on a single mutex (spec §9:
/// "a reference-counted map or a shard-of-mutexes strategy both suffice").
pub struct AppState {
    pub config: ServerConfig,
    pub sessions: DashMap<Uuid, SessionMeta>,
    pub path_locks: DashMap<String, Arc<Mutex<()>>>,
    pub upload_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let max_parallel = config.max_parallel_uploads;
        Self {
            config,
            sessions: DashMap::new(),
            path_locks: DashMap::new(),
            upload_semaphore: Arc::new(Semaphore::new(max_parallel)),
        }
    }

    /// Get-or-create the mutex guarding publishes to `dataset_id/relpath` (spec
    /// §4.6: "created lazily on first use and retained for the process's
    /// lifetime"). The keyspace is bounded by the dataset, so unbounded growth is
    /// accepted, matching spec §9's design note.
    pub fn path_lock(&self, dataset_id: &str, relpath: &str) -> Arc<Mutex<()>> {
        let key = format!("{dataset_id}/{}", relpath.to_lowercase());
        self.path_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
