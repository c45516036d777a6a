//! Per-worker model registry
//!
//! Inference sessions must not be driven from two threads at once, so every
//! worker thread gets its own [`OnlineModelRunner`], built lazily on first use
//! and never handed to another thread. No global inference lock is taken.

use crate::error::SurrogateResult;
use crate::models::OnlineModelRunner;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::info;

type RunnerFactory = dyn Fn() -> SurrogateResult<OnlineModelRunner> + Send + Sync;

/// Lazily populated map from worker thread to its private runner
pub struct WorkerRegistry {
    factory: Box<RunnerFactory>,
    // each inner mutex is only ever locked by the thread that owns the entry
    entries: Mutex<HashMap<ThreadId, Arc<Mutex<OnlineModelRunner>>>>,
}

impl WorkerRegistry {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> SurrogateResult<OnlineModelRunner> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` against the calling thread's runner, loading it on first use
    pub fn with_runner<R>(
        &self,
        f: impl FnOnce(&mut OnlineModelRunner) -> R,
    ) -> SurrogateResult<R> {
        let entry = self.entry()?;
        let mut runner = entry.lock();
        Ok(f(&mut *runner))
    }

    fn entry(&self) -> SurrogateResult<Arc<Mutex<OnlineModelRunner>>> {
        let id = thread::current().id();
        if let Some(entry) = self.entries.lock().get(&id) {
            return Ok(entry.clone());
        }

        // loading can be slow; only this thread inserts under its own id
        let start = Instant::now();
        let runner = (self.factory)()?;
        info!(
            worker = ?id,
            models = runner.model_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded model set for worker"
        );

        Ok(self
            .entries
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(runner)))
            .clone())
    }

    /// Number of workers that have loaded a runner so far
    pub fn worker_count(&self) -> usize {
        self.entries.lock().len()
    }
}
