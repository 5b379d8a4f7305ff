//! Bounded worker pool for CPU bound per-entity tasks.
//!
//! [`run_isolated`] is the only way the pipelines use the pool: every task is
//! wrapped so that an error or a panic becomes that entity's
//! [`TaskOutcome::Failure`], and the caller blocks until every submitted task
//! has reported.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::error::{FailureCode, ForecastError, ForecastResult};
use crate::data::domain::EntityId;
use crate::training::domain::{TaskFailure, TaskOutcome};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A unit of per-entity work.
pub type Task<T> = Box<dyn FnOnce() -> ForecastResult<T> + Send + 'static>;

pub struct Pool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Pool {
    /// Start `size` workers. Failing to start any of them is fatal.
    pub fn new(size: usize) -> ForecastResult<Self> {
        if size == 0 {
            return Err(ForecastError::Pool("pool size must be positive".into()));
        }
        let (tx, rx) = mpsc::channel::<Job>();
        let shared_rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = shared_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("tickcast-worker-{i}"))
                .spawn(move || loop {
                    let job = {
                        let guard = rx.lock();
                        guard.recv()
                    };

                    match job {
                        // Keep the worker alive whatever the job does.
                        Ok(job) => {
                            let _ = panic::catch_unwind(AssertUnwindSafe(job));
                        }
                        Err(_) => break,
                    }
                })
                .map_err(|e| ForecastError::Pool(format!("cannot start worker {i}: {e}")))?;
            workers.push(handle);
        }

        debug!(size, "worker pool started");
        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F>(&self, job: F) -> ForecastResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .as_ref()
            .ok_or_else(|| ForecastError::Pool("pool is shut down".into()))?
            .send(Box::new(job))
            .map_err(|_| ForecastError::Pool("no worker is accepting jobs".into()))
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain the queue and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one task per entity and wait for all of them.
///
/// Outcomes come back in submission order regardless of completion order. Only
/// a pool that cannot accept work is an error.
pub fn run_isolated<T>(
    pool: &Pool,
    tasks: Vec<(EntityId, Task<T>)>,
) -> ForecastResult<Vec<(EntityId, TaskOutcome<T>)>>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel::<(EntityId, TaskOutcome<T>)>();
    let mut submitted = Vec::with_capacity(tasks.len());

    for (entity, task) in tasks {
        submitted.push(entity.clone());
        let tx = tx.clone();
        pool.submit(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(result) => result,
                Err(payload) => {
                    let msg = panic_message(&*payload);
                    warn!(entity = %entity, panic = %msg, "task panicked");
                    Err(ForecastError::training(
                        entity.as_str(),
                        format!("task panicked: {msg}"),
                    ))
                }
            };
            let outcome = TaskOutcome::from_result(entity.clone(), result);
            let _ = tx.send((entity, outcome));
        })?;
    }
    drop(tx);

    // Collection barrier: ends once every job has dropped its sender.
    let mut received: BTreeMap<EntityId, TaskOutcome<T>> = rx.iter().collect();
    Ok(submitted
        .into_iter()
        .map(|entity| {
            let outcome = received.remove(&entity).unwrap_or_else(|| {
                TaskOutcome::Failure(TaskFailure {
                    entity_id: entity.clone(),
                    code: FailureCode::Internal,
                    reason: "task finished without reporting".into(),
                })
            });
            (entity, outcome)
        })
        .collect())
}
