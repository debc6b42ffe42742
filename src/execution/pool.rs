//! Worker Pool
//!
//! Fixed set of named threads that run submitted runs and resumed
//! continuations. Shutting down stops intake, lets queued jobs finish and
//! joins every worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::listener::panic_message;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one).
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let spawned = thread::Builder::new()
                .name(format!("actionrunner-worker-{}", id))
                .spawn(move || worker_loop(id, receiver));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", id, e),
            }
        }

        debug!("Worker pool started with {} thread(s)", workers.len());

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Queues a job. Fails once the pool has been shut down.
    pub(crate) fn submit<F>(&self, job: F) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| EngineError::PoolShutDown),
            None => Err(EngineError::PoolShutDown),
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops intake, drains queued jobs and joins the workers. Idempotent.
    pub(crate) fn shutdown(&self) {
        // Dropping the sender ends each worker once the queue is empty
        if self.sender.lock().take().is_none() {
            return;
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();

        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = receiver.lock().recv();

        match job {
            Ok(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        "Worker {} job panicked: {}",
                        id,
                        panic_message(payload.as_ref())
                    );
                }
            }
            Err(_) => break,
        }
    }

    debug!("Worker {} exiting", id);
}
