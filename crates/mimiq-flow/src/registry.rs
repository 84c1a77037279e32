//! The process-wide queue registry and tombstone set.
//!
//! The registry is an explicitly constructed value threaded into the
//! service facade, never hidden module state, so test instances are
//! independent. The registry lock covers only name-space operations (the
//! queue map and the tombstone set); per-queue operations delegate to the
//! queue's own lock. Lock order is registry before queue, never reversed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mimiq_core::{Clock, Error, LocationPath, OidcSigner, QueueName, Result, TaskName};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::dispatch::Dispatcher;
use crate::queue::{EngineShared, Queue, QueueSnapshot};
use crate::task::{NewTask, TaskSnapshot};

/// Engine-wide options supplied by the process configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Base host for rewriting App Engine targets; absence makes App
    /// Engine dispatch fail non-retryably.
    pub app_engine_emulator_host: Option<String>,
    /// When set, `PurgeQueue` blocks until quiescent and forgets the
    /// queue's tombstoned task names.
    pub hard_reset_on_purge_queue: bool,
}

struct QueueEntry {
    queue: Arc<Queue>,
    worker: JoinHandle<()>,
}

struct RegistryInner {
    queues: HashMap<String, QueueEntry>,
    /// Every task name the emulator has ever issued.
    tombstones: HashSet<String>,
}

/// Process-wide map of queue name to queue, plus the tombstone set.
pub struct Registry {
    shared: Arc<EngineShared>,
    hard_reset_on_purge: bool,
    inner: Mutex<RegistryInner>,
}

impl Registry {
    /// Creates an empty registry.
    ///
    /// Queues created through it spawn their dispatch loops onto the
    /// current tokio runtime.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn Dispatcher>,
        signer: Arc<OidcSigner>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                clock,
                dispatcher,
                signer,
                app_engine_host: options.app_engine_emulator_host,
            }),
            hard_reset_on_purge: options.hard_reset_on_purge_queue,
            inner: Mutex::new(RegistryInner {
                queues: HashMap::new(),
                tombstones: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, name: &QueueName) -> Result<Arc<Queue>> {
        self.lock()
            .queues
            .get(&name.to_string())
            .map(|entry| Arc::clone(&entry.queue))
            .ok_or_else(|| Error::not_found("queue", name.to_string()))
    }

    // ------------------------------------------------------------------
    // Queue operations
    // ------------------------------------------------------------------

    /// Creates a queue and starts its dispatch loop.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for bad configuration, `AlreadyExists` when the
    /// name is taken by a live queue.
    pub fn create_queue(&self, name: QueueName, config: QueueConfig) -> Result<QueueSnapshot> {
        config.validate()?;
        let key = name.to_string();
        let mut inner = self.lock();
        if inner.queues.contains_key(&key) {
            return Err(Error::already_exists("queue", key));
        }
        let queue = Queue::new(name, config, Arc::clone(&self.shared));
        let worker = tokio::spawn(Arc::clone(&queue).run());
        let snapshot = queue.snapshot();
        inner.queues.insert(key.clone(), QueueEntry { queue, worker });
        drop(inner);
        tracing::info!(queue = %key, "queue created");
        Ok(snapshot)
    }

    /// Returns a snapshot of the queue.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue does not exist.
    pub fn get_queue(&self, name: &QueueName) -> Result<QueueSnapshot> {
        Ok(self.queue(name)?.snapshot())
    }

    /// Lists queues under `projects/<P>/locations/<L>`, sorted by name.
    #[must_use]
    pub fn list_queues(&self, parent: &LocationPath) -> Vec<QueueSnapshot> {
        let inner = self.lock();
        let mut snapshots: Vec<QueueSnapshot> = inner
            .queues
            .values()
            .map(|entry| entry.queue.snapshot())
            .filter(|snapshot| snapshot.name.has_parent(parent))
            .collect();
        drop(inner);
        snapshots.sort_by_key(|snapshot| snapshot.name.to_string());
        snapshots
    }

    /// Pauses dispatching; tasks keep accumulating.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue does not exist.
    pub fn pause_queue(&self, name: &QueueName) -> Result<QueueSnapshot> {
        Ok(self.queue(name)?.pause())
    }

    /// Resumes dispatching.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue does not exist.
    pub fn resume_queue(&self, name: &QueueName) -> Result<QueueSnapshot> {
        Ok(self.queue(name)?.resume())
    }

    /// Empties the queue's task set.
    ///
    /// Default semantics are fire-and-forget. With hard reset enabled
    /// this blocks until in-flight dispatches have completed or aborted,
    /// and the queue's tombstoned names become reusable.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue does not exist.
    pub async fn purge_queue(&self, name: &QueueName) -> Result<QueueSnapshot> {
        let queue = self.queue(name)?;
        if self.hard_reset_on_purge {
            queue.purge_and_quiesce().await;
            let prefix = format!("{name}/tasks/");
            self.lock()
                .tombstones
                .retain(|tombstone| !tombstone.starts_with(&prefix));
        } else {
            queue.purge();
        }
        Ok(queue.snapshot())
    }

    /// Purges the queue, stops its dispatch loop, and unregisters it.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue does not exist.
    pub async fn delete_queue(&self, name: &QueueName) -> Result<()> {
        let entry = self
            .lock()
            .queues
            .remove(&name.to_string())
            .ok_or_else(|| Error::not_found("queue", name.to_string()))?;
        entry.queue.begin_shutdown();
        // The loop observed the cancellation; join it before returning so
        // no dispatch for this queue is ever initiated afterwards.
        let _ = entry.worker.await;
        tracing::info!(queue = %name, "queue deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Task operations
    // ------------------------------------------------------------------

    /// Creates a task in the queue, assigning a 16-byte hex id when the
    /// client did not supply one.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing queue, `InvalidArgument` for a malformed
    /// id, `AlreadyExists` when the name was ever issued before.
    pub fn create_task(&self, queue_name: &QueueName, new: NewTask) -> Result<TaskSnapshot> {
        let (queue, task_name) = {
            let mut inner = self.lock();
            let entry = inner
                .queues
                .get(&queue_name.to_string())
                .ok_or_else(|| Error::not_found("queue", queue_name.to_string()))?;
            let queue = Arc::clone(&entry.queue);

            let task_name = match &new.task_id {
                Some(id) => TaskName::new(queue_name.clone(), id.clone())?,
                None => TaskName::generate(queue_name.clone()),
            };
            let key = task_name.to_string();
            if !inner.tombstones.insert(key.clone()) {
                return Err(Error::already_exists("task", key));
            }
            (queue, task_name)
        };

        match queue.insert_task(task_name.clone(), new) {
            Ok(snapshot) => Ok(snapshot),
            Err(error) => {
                // The name was never stored; do not burn it.
                self.lock().tombstones.remove(&task_name.to_string());
                Err(error)
            }
        }
    }

    /// Returns a snapshot of the task.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue or task does not exist.
    pub fn get_task(&self, name: &TaskName) -> Result<TaskSnapshot> {
        self.queue(&name.queue)?
            .get_task(&name.task_id)
            .ok_or_else(|| Error::not_found("task", name.to_string()))
    }

    /// Lists the queue's tasks in creation order.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue does not exist.
    pub fn list_tasks(&self, queue_name: &QueueName) -> Result<Vec<TaskSnapshot>> {
        Ok(self.queue(queue_name)?.list_tasks())
    }

    /// Removes a task; a mid-dispatch outcome is discarded, not retried.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue or task does not exist.
    pub fn delete_task(&self, name: &TaskName) -> Result<()> {
        self.queue(&name.queue)?.delete_task(&name.task_id)
    }

    /// Forces immediate dispatch by rearming the task's timer at now.
    ///
    /// # Errors
    ///
    /// `NotFound` when the queue or task does not exist,
    /// `FailedPrecondition` when the task is mid-dispatch.
    pub fn run_task(&self, name: &TaskName) -> Result<TaskSnapshot> {
        self.queue(&name.queue)?.run_task(&name.task_id)
    }

    /// Stops every dispatch loop. Used for graceful process shutdown.
    pub async fn shutdown(&self) {
        let entries: Vec<QueueEntry> = {
            let mut inner = self.lock();
            inner.queues.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.queue.begin_shutdown();
            let _ = entry.worker.await;
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Registry")
            .field("queues", &inner.queues.len())
            .field("tombstones", &inner.tombstones.len())
            .field("hard_reset_on_purge", &self.hard_reset_on_purge)
            .finish()
    }
}
