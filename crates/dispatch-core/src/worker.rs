use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument};

use crate::observability::JobCounters;
use crate::queue::TaskQueue;
use crate::task::Task;

pub(crate) type TaskQueueHandle = Arc<TaskQueue<Box<dyn Task>>>;

/// Worker group handle.
/// - workers exit on their own once the queue is closed and drained
/// - `join()` waits for all of them
pub(crate) struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
    subscriber: Option<Dispatch>,
}

impl WorkerGroup {
    /// Spawn `n` workers on the current Tokio runtime.
    ///
    /// Log records go to `subscriber` when given, otherwise to whatever
    /// subscriber is current for the caller.
    pub(crate) fn spawn(
        dispatcher_id: &str,
        n: usize,
        queue: TaskQueueHandle,
        counters: Arc<JobCounters>,
        subscriber: Option<&Dispatch>,
    ) -> Self {
        let mut joins = Vec::with_capacity(n);
        for worker_id in 1..=n {
            let q = Arc::clone(&queue);
            let c = Arc::clone(&counters);

            let join = match subscriber {
                Some(dispatch) => {
                    // the span has to be created under the subscriber that will record it
                    let span = tracing::dispatcher::with_default(dispatch, || {
                        tracing::info_span!("worker", dispatcher = %dispatcher_id, worker_id)
                    });
                    tokio::spawn(
                        worker_loop(worker_id, q, c)
                            .instrument(span)
                            .with_subscriber(dispatch.clone()),
                    )
                }
                None => {
                    let span = tracing::info_span!("worker", dispatcher = %dispatcher_id, worker_id);
                    tokio::spawn(
                        worker_loop(worker_id, q, c)
                            .instrument(span)
                            .with_current_subscriber(),
                    )
                }
            };
            joins.push(join);
        }

        Self {
            joins,
            subscriber: subscriber.cloned(),
        }
    }

    /// Wait for every worker to exit.
    pub(crate) async fn join(self) {
        for join in self.joins {
            if let Err(err) = join.await {
                // only reachable if the runtime cancelled the worker
                let report = || tracing::error!(error = %err, "worker did not exit cleanly");
                match &self.subscriber {
                    Some(dispatch) => tracing::dispatcher::with_default(dispatch, report),
                    None => report(),
                }
            }
        }
    }
}

async fn worker_loop(worker_id: usize, queue: TaskQueueHandle, counters: Arc<JobCounters>) {
    tracing::debug!("worker started");

    while let Some(task) = queue.pop().await {
        let name = task.name().to_owned();
        tracing::debug!(task = %name, "worker started job");

        match AssertUnwindSafe(task.execute()).catch_unwind().await {
            Ok(Ok(())) => counters.record_success(),
            Ok(Err(err)) => {
                tracing::error!(task = %name, error = %err, "task failed");
                counters.record_failure();
            }
            Err(payload) => {
                tracing::error!(task = %name, panic = %panic_message(&*payload), "task panicked");
                counters.record_panic();
            }
        }

        tracing::debug!(task = %name, "worker finished job");
    }

    tracing::debug!(worker_id, "worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
