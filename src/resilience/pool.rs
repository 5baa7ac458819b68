//! Named bounded worker pools for fire-and-forget tasks.
//!
//! Workers are spawned lazily up to the pool capacity and retire after
//! an idle expiry. Every task runs inside a panic barrier: a panicking
//! task bumps the `failed` counter and invokes the configured panic
//! handler, it never takes a worker thread down with it.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// How a pool behaves when every worker is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueuePolicy {
    /// Block the submitter until a worker picks the task up
    #[default]
    Block,
    /// Fail the submission immediately
    NonBlock,
    /// Queue up to `n` pending tasks, then block
    BoundedBlock(usize),
}

/// Handler invoked with the pool name and panic description when a
/// task panics.
pub type PanicHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Pool construction options.
#[derive(Clone, Default)]
pub struct PoolConfig {
    /// Behavior when all workers are busy
    pub queue_policy: QueuePolicy,
    /// Idle workers retire after this long; `None` uses 60 s
    pub idle_expiry: Option<Duration>,
    /// Invoked after a task panic is caught
    pub panic_handler: Option<PanicHandler>,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("queue_policy", &self.queue_policy)
            .field("idle_expiry", &self.idle_expiry)
            .finish()
    }
}

const DEFAULT_IDLE_EXPIRY: Duration = Duration::from_secs(60);

/// Counters exposed through [`WorkerPool::stats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Maximum concurrent workers
    pub capacity: usize,
    /// Workers currently executing a task
    pub running: usize,
    /// Capacity minus running
    pub free: usize,
    /// Tasks accepted
    pub submitted: u64,
    /// Tasks finished without error or panic
    pub completed: u64,
    /// Tasks that returned an error or panicked
    pub failed: u64,
}

/// Error returned by pool submission.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// NonBlock submission found every worker busy
    #[error("worker pool '{name}' is at capacity")]
    PoolFull {
        /// Name of the refusing pool
        name: String,
    },
    /// The pool was released
    #[error("worker pool '{name}' is released")]
    Released {
        /// Name of the released pool
        name: String,
    },
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A named bounded pool of task-runner threads.
pub struct WorkerPool {
    name: String,
    capacity: usize,
    config: PoolConfig,
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    spawned: AtomicUsize,
    idle: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerPool {
    fn new(name: &str, capacity: usize, config: PoolConfig) -> Arc<Self> {
        let (sender, receiver) = match config.queue_policy {
            // A rendezvous channel hands tasks directly to workers.
            QueuePolicy::Block | QueuePolicy::NonBlock => channel::bounded(0),
            QueuePolicy::BoundedBlock(n) => channel::bounded(n),
        };
        Arc::new(Self {
            name: name.to_string(),
            capacity: capacity.max(1),
            config,
            sender: Mutex::new(Some(sender)),
            receiver,
            spawned: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// The pool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedules a fire-and-forget task.
    ///
    /// # Errors
    /// [`PoolError::PoolFull`] when the policy is `NonBlock` and every
    /// worker is busy; [`PoolError::Released`] after release.
    pub fn submit(self: &Arc<Self>, task: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        self.submit_boxed(Box::new(task))
    }

    /// Schedules a task that may fail; the error is counted and logged,
    /// never returned to the submitter.
    pub fn submit_task<E: fmt::Display>(
        self: &Arc<Self>,
        task: impl FnOnce() -> Result<(), E> + Send + 'static,
    ) -> Result<(), PoolError> {
        let pool = Arc::clone(self);
        self.submit_boxed(Box::new(move || {
            if let Err(err) = task() {
                pool.failed.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %pool.name, error = %err, "pool task failed");
            }
        }))
    }

    fn submit_boxed(self: &Arc<Self>, task: Task) -> Result<(), PoolError> {
        let sender = {
            let guard = self.sender.lock().expect("pool sender lock poisoned");
            match guard.as_ref() {
                Some(sender) => sender.clone(),
                None => {
                    return Err(PoolError::Released {
                        name: self.name.clone(),
                    });
                }
            }
        };

        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.ensure_worker();

        if self.config.queue_policy == QueuePolicy::NonBlock {
            // A short grace window lets a freshly spawned worker reach
            // its receive before the rendezvous hand-off is judged.
            return match sender.send_timeout(task, Duration::from_millis(50)) {
                Ok(()) => Ok(()),
                Err(_) => {
                    self.submitted.fetch_sub(1, Ordering::Relaxed);
                    Err(PoolError::PoolFull {
                        name: self.name.clone(),
                    })
                }
            };
        }

        // Blocking policies: retry with a short timeout so a worker
        // that retired between the capacity check and the send cannot
        // strand the submitter.
        let mut pending = task;
        loop {
            match sender.send_timeout(pending, Duration::from_millis(100)) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(task)) => {
                    pending = task;
                    self.ensure_worker();
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PoolError::Released {
                        name: self.name.clone(),
                    });
                }
            }
        }
    }

    /// Spawns a worker when none is idle and capacity remains.
    fn ensure_worker(self: &Arc<Self>) {
        if self.idle.load(Ordering::Acquire) > 0 {
            return;
        }
        let spawned = self.spawned.load(Ordering::Acquire);
        if spawned >= self.capacity {
            return;
        }
        if self
            .spawned
            .compare_exchange(spawned, spawned + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let pool = Arc::clone(self);
        let label = format!("{}-worker-{}", self.name, spawned);
        let spawn_result = thread::Builder::new().name(label).spawn(move || {
            pool.worker_loop();
        });
        if spawn_result.is_err() {
            self.spawned.fetch_sub(1, Ordering::AcqRel);
            error!(pool = %self.name, "failed to spawn pool worker");
        }
    }

    fn worker_loop(self: Arc<Self>) {
        let expiry = self.config.idle_expiry.unwrap_or(DEFAULT_IDLE_EXPIRY);
        loop {
            self.idle.fetch_add(1, Ordering::AcqRel);
            let received = self.receiver.recv_timeout(expiry);
            self.idle.fetch_sub(1, Ordering::AcqRel);

            match received {
                Ok(task) => self.run_task(task),
                Err(RecvTimeoutError::Timeout) => {
                    // Retire after sitting idle for the expiry window.
                    self.spawned.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.spawned.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            }
        }
    }

    fn run_task(&self, task: Task) {
        let outcome = catch_unwind(AssertUnwindSafe(task));
        match outcome {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let description = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "opaque panic payload".to_string());
                error!(pool = %self.name, panic = %description, "pool task panicked");
                if let Some(handler) = &self.config.panic_handler {
                    handler(&self.name, &description);
                }
            }
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let spawned = self.spawned.load(Ordering::Acquire);
        let idle = self.idle.load(Ordering::Acquire);
        let running = spawned.saturating_sub(idle);
        PoolStats {
            capacity: self.capacity,
            running,
            free: self.capacity.saturating_sub(running),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting tasks; idle workers drain and exit.
    fn release(&self) {
        let mut guard = self.sender.lock().expect("pool sender lock poisoned");
        guard.take();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Registry of named pools.
#[derive(Debug, Default)]
pub struct WorkerPools {
    pools: DashMap<String, Arc<WorkerPool>>,
}

impl WorkerPools {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool registered under `name`, creating it with the
    /// given capacity and options on first use.
    pub fn get_or_create(&self, name: &str, capacity: usize, config: PoolConfig) -> Arc<WorkerPool> {
        self.pools
            .entry(name.to_string())
            .or_insert_with(|| WorkerPool::new(name, capacity, config))
            .clone()
    }

    /// Looks up an existing pool.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Counter snapshot for one pool.
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<PoolStats> {
        self.pools.get(name).map(|entry| entry.value().stats())
    }

    /// Releases one pool: pending tasks drain, workers exit, further
    /// submissions fail.
    pub fn release(&self, name: &str) {
        if let Some((_, pool)) = self.pools.remove(name) {
            pool.release();
        }
    }

    /// Releases every pool.
    pub fn release_all(&self) {
        let names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.release(&name);
        }
    }
}
