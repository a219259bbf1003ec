//! Lazy model-client registry.
//!
//! Adapter clients are expensive to set up and pin service-side model
//! instances, so they are created on first use and cached by name.
//! `unload_all` releases everything on shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::WorkerResult;

/// Name-keyed cache of lazily initialized clients.
pub struct ModelRegistry<T> {
    loaded: Mutex<HashMap<String, Arc<T>>>,
}

impl<T> ModelRegistry<T> {
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Get the client for `name`, running `loader` on first use.
    ///
    /// The lock is held across the load so concurrent callers cannot
    /// initialize the same model twice.
    pub async fn get_or_load<F, Fut>(&self, name: &str, loader: F) -> WorkerResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkerResult<T>>,
    {
        let mut loaded = self.loaded.lock().await;

        if let Some(client) = loaded.get(name) {
            debug!("Model {} already loaded", name);
            return Ok(Arc::clone(client));
        }

        info!("Loading model {}", name);
        let client = Arc::new(loader().await?);
        loaded.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Drop the cached client for `name`, if loaded.
    pub async fn unload(&self, name: &str) -> bool {
        let mut loaded = self.loaded.lock().await;
        let removed = loaded.remove(name).is_some();
        if removed {
            info!("Unloaded model {}", name);
        }
        removed
    }

    /// Drop all cached clients.
    pub async fn unload_all(&self) {
        let mut loaded = self.loaded.lock().await;
        if !loaded.is_empty() {
            info!("Unloading {} models", loaded.len());
            loaded.clear();
        }
    }

    /// Names of currently loaded models.
    pub async fn loaded(&self) -> Vec<String> {
        let loaded = self.loaded.lock().await;
        let mut names: Vec<String> = loaded.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T> Default for ModelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
