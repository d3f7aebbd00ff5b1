//! Dispatcher - a fixed pool of workers fed by a bounded queue.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::Dispatch;

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, TaskError};
use crate::observability::{DispatcherState, DispatcherStats, JobCounters};
use crate::queue::{QueueClosed, TaskQueue};
use crate::task::{BlockingWork, Task, Work};
use crate::worker::{TaskQueueHandle, WorkerGroup};

/// Runs submitted tasks on a fixed number of workers.
///
/// # Lifecycle
/// 1. [`Dispatcher::new`] / [`Dispatcher::builder`]: nothing runs yet, but
///    up to `queue_capacity` submissions are buffered.
/// 2. [`start`](Dispatcher::start) spawns the workers.
/// 3. [`submit`](Dispatcher::submit) and friends enqueue work, waiting while
///    the queue is full.
/// 4. [`stop`](Dispatcher::stop) closes the queue and waits until every task
///    that made it into the queue has been executed.
///
/// `start` and `stop` are idempotent. Submitting after `stop` is a bug in the
/// caller and panics.
///
/// ```ignore
/// let dispatcher = Dispatcher::new("mail", 10, 5);
/// dispatcher.start();
/// dispatcher.submit_work(|| async { send().await }).await?;
/// dispatcher.stop().await;
/// assert_eq!(dispatcher.processed_jobs(), 1);
/// ```
pub struct Dispatcher {
    id: String,
    workers: usize,
    queue: TaskQueueHandle,
    counters: Arc<JobCounters>,
    state: watch::Sender<DispatcherState>,
    group: Mutex<Option<WorkerGroup>>,
    timestamps: Mutex<Timestamps>,
    submit_timeout: Option<Duration>,
    subscriber: Option<Dispatch>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timestamps {
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl Dispatcher {
    /// Create an unstarted dispatcher.
    ///
    /// `id` only labels log records. `queue_capacity` may be 0, in which case
    /// every submission waits for an idle worker.
    ///
    /// # Panics
    /// Panics if `workers` is 0. Use [`Dispatcher::builder`] to get an error instead.
    pub fn new(id: impl Into<String>, workers: usize, queue_capacity: usize) -> Self {
        let id = id.into();
        assert!(workers > 0, "dispatcher `{id}` needs at least one worker");
        Self::assemble(id, workers, queue_capacity, None, None)
    }

    pub fn builder(id: impl Into<String>) -> DispatcherBuilder {
        DispatcherBuilder::new(id)
    }

    pub fn from_config(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        let mut builder = Self::builder(config.id.clone())
            .workers(config.workers)
            .queue_capacity(config.queue_capacity);
        if let Some(timeout) = config.submit_timeout() {
            builder = builder.submit_timeout(timeout);
        }
        builder.build()
    }

    fn assemble(
        id: String,
        workers: usize,
        queue_capacity: usize,
        submit_timeout: Option<Duration>,
        subscriber: Option<Dispatch>,
    ) -> Self {
        let (state, _) = watch::channel(DispatcherState::Unstarted);
        Self {
            id,
            workers,
            queue: Arc::new(TaskQueue::new(queue_capacity)),
            counters: Arc::new(JobCounters::default()),
            state,
            group: Mutex::new(None),
            timestamps: Mutex::new(Timestamps::default()),
            submit_timeout,
            subscriber,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Spawn the workers. Returns once they are spawned, not once they have
    /// begun pulling work.
    ///
    /// Calling `start` again, or after `stop`, only logs a warning.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        // held across the transition so a racing `stop` sees the group
        let mut group = self.group.lock().unwrap_or_else(PoisonError::into_inner);

        let mut previous = DispatcherState::Unstarted;
        let started = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == DispatcherState::Unstarted {
                *state = DispatcherState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            self.log(|| tracing::warn!(dispatcher = %self.id, state = ?previous, "start ignored"));
            return;
        }

        self.log(|| {
            tracing::info!(dispatcher = %self.id, workers = self.workers, "creating workers")
        });
        *group = Some(WorkerGroup::spawn(
            &self.id,
            self.workers,
            Arc::clone(&self.queue),
            Arc::clone(&self.counters),
            self.subscriber.as_ref(),
        ));
        self.with_timestamps(|t| t.started_at = Some(Utc::now()));
    }

    /// Close the queue and wait until every worker has drained it and exited.
    ///
    /// In-flight tasks are never cancelled. If the dispatcher was never
    /// started, tasks still sitting in the queue are dropped unexecuted.
    /// Concurrent or repeated calls all wait for the same drain.
    pub async fn stop(&self) {
        let mut previous = DispatcherState::Unstarted;
        self.state.send_if_modified(|state| {
            previous = *state;
            if state.accepts_tasks() {
                *state = DispatcherState::Draining;
                true
            } else {
                false
            }
        });

        match previous {
            DispatcherState::Unstarted => {
                self.queue.close().await;
                let dropped = self.queue.drain().await.len();
                self.log(|| {
                    tracing::warn!(dispatcher = %self.id, dropped, "stopped before start; queued tasks dropped")
                });
                self.finish();
            }
            DispatcherState::Running => {
                self.queue.close().await;
                let group = self
                    .group
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(group) = group {
                    group.join().await;
                }
                self.log(|| {
                    tracing::info!(
                        dispatcher = %self.id,
                        processed = self.counters.processed(),
                        failed = self.counters.failed(),
                        panicked = self.counters.panicked(),
                        "dispatcher stopped"
                    )
                });
                self.finish();
            }
            DispatcherState::Draining | DispatcherState::Terminated => {
                let mut rx = self.state.subscribe();
                // the sender lives in `self`, so this cannot fail while we hold `&self`
                let _ = rx
                    .wait_for(|state| *state == DispatcherState::Terminated)
                    .await;
            }
        }
    }

    fn finish(&self) {
        self.with_timestamps(|t| t.stopped_at = Some(Utc::now()));
        self.state.send_replace(DispatcherState::Terminated);
    }

    /// Queue a task, waiting while the queue is full.
    ///
    /// Waits indefinitely unless the dispatcher was built with a submit
    /// timeout. Success only means the task was queued, not that it ran.
    ///
    /// # Panics
    /// Panics if `stop` has already been called.
    pub async fn submit<T: Task>(&self, task: T) -> Result<(), DispatchError> {
        self.submit_with(Box::new(task), self.submit_timeout).await
    }

    /// Like [`submit`](Dispatcher::submit), but gives up after `timeout`.
    /// On timeout the task is dropped; resubmitting is up to the caller.
    pub async fn submit_timeout<T: Task>(
        &self,
        task: T,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        self.submit_with(Box::new(task), Some(timeout)).await
    }

    /// Queue an async closure as a task.
    pub async fn submit_work<F, Fut>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.submit(Work::new(f)).await
    }

    /// Queue a synchronous closure as a task. It runs on the blocking pool.
    pub async fn submit_blocking_work<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        self.submit(BlockingWork::new(f)).await
    }

    async fn submit_with(
        &self,
        task: Box<dyn Task>,
        timeout: Option<Duration>,
    ) -> Result<(), DispatchError> {
        let pushed = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.queue.push(task))
                .await
                .map_err(|_| DispatchError::SubmitTimedOut {
                    dispatcher: self.id.clone(),
                    timeout: limit,
                })?,
            None => self.queue.push(task).await,
        };

        if let Err(QueueClosed(task)) = pushed {
            panic!(
                "task `{}` submitted to dispatcher `{}` after stop",
                task.name(),
                self.id
            );
        }
        Ok(())
    }

    /// Number of tasks whose execution has finished, successfully or not.
    ///
    /// May lag behind running workers; the value is final once `stop` returns.
    pub fn processed_jobs(&self) -> u64 {
        self.counters.processed()
    }

    pub fn failed_jobs(&self) -> u64 {
        self.counters.failed()
    }

    pub fn panicked_jobs(&self) -> u64 {
        self.counters.panicked()
    }

    pub async fn stats(&self) -> DispatcherStats {
        let timestamps = self.with_timestamps(|t| *t);
        DispatcherStats {
            id: self.id.clone(),
            state: self.state(),
            workers: self.workers,
            queue_capacity: self.queue.capacity(),
            queued: self.queue.len().await,
            processed: self.counters.processed(),
            failed: self.counters.failed(),
            panicked: self.counters.panicked(),
            started_at: timestamps.started_at,
            stopped_at: timestamps.stopped_at,
        }
    }

    fn with_timestamps<R>(&self, f: impl FnOnce(&mut Timestamps) -> R) -> R {
        let mut timestamps = self
            .timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut timestamps)
    }

    /// Emit log records to the injected subscriber, if there is one.
    fn log(&self, f: impl FnOnce()) {
        match &self.subscriber {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

/// Builder for [`Dispatcher`] with validation instead of panics.
///
/// ```ignore
/// let dispatcher = Dispatcher::builder("ingest")
///     .workers(8)
///     .queue_capacity(0)
///     .submit_timeout(Duration::from_secs(2))
///     .build()?;
/// ```
pub struct DispatcherBuilder {
    id: String,
    workers: usize,
    queue_capacity: usize,
    submit_timeout: Option<Duration>,
    subscriber: Option<Dispatch>,
}

impl DispatcherBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        let defaults = DispatcherConfig::default();
        Self {
            id: id.into(),
            workers: defaults.workers,
            queue_capacity: defaults.queue_capacity,
            submit_timeout: None,
            subscriber: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Default limit applied by [`Dispatcher::submit`].
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }

    /// Send this dispatcher's log records to `subscriber` instead of the
    /// subscriber current at `start`.
    pub fn subscriber(mut self, subscriber: impl Into<Dispatch>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::InvalidConfig(format!(
                "dispatcher `{}` needs at least one worker",
                self.id
            )));
        }
        if self.submit_timeout == Some(Duration::ZERO) {
            return Err(DispatchError::InvalidConfig(format!(
                "dispatcher `{}` submit timeout must be greater than zero",
                self.id
            )));
        }
        Ok(Dispatcher::assemble(
            self.id,
            self.workers,
            self.queue_capacity,
            self.submit_timeout,
            self.subscriber,
        ))
    }
}
