//! Fixed pool of OS threads that run blocking writes.
//!
//! Each thread keeps its identity for the life of the pool, which bounds the
//! number of per-worker model sets the registry ever loads.

use crate::error::{SurrogateError, SurrogateResult};
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> SurrogateResult<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let shared_rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(size);
        for idx in 0..size {
            let rx = shared_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("inference-{}", idx))
                .spawn(move || loop {
                    let job = rx.lock().recv();
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                })
                .map_err(|e| {
                    SurrogateError::Configuration(format!("failed to spawn worker {}: {}", idx, e))
                })?;
            handles.push(handle);
        }

        debug!(workers = size, "Worker pool started");
        Ok(Self {
            tx: Some(tx),
            handles,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job; fails once the pool is shutting down
    pub fn submit<F>(&self, job: F) -> SurrogateResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .as_ref()
            .ok_or_else(|| SurrogateError::Configuration("worker pool is shut down".to_string()))?
            .send(Box::new(job))
            .map_err(|_| SurrogateError::Configuration("worker pool is shut down".to_string()))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // closing the channel lets every worker drain its queue and exit
        self.tx.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}
