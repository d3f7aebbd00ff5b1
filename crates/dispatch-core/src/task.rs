//! Units of work accepted by the dispatcher.

use std::future::Future;

use async_trait::async_trait;

use crate::error::TaskError;

/// A unit of work that can be submitted to a [`Dispatcher`](crate::Dispatcher).
///
/// Implement this on your own type when the work carries state. For stateless
/// work, pass a closure to `submit_work` / `submit_blocking_work` instead.
///
/// `execute` consumes the task: once submitted, ownership moves to the queue
/// and then to whichever worker dequeues it.
#[async_trait]
pub trait Task: Send + 'static {
    /// Name used in log records.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError>;
}

/// Adapts an async closure into a [`Task`].
pub struct Work<F> {
    f: F,
}

impl<F, Fut> Work<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Task for Work<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        "work"
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        (self.f)().await
    }
}

/// Adapts a synchronous closure into a [`Task`].
///
/// The closure runs on the runtime's blocking pool, so a slow closure does not
/// hold up the worker's executor thread.
pub struct BlockingWork<F> {
    f: F,
}

impl<F> BlockingWork<F>
where
    F: FnOnce() -> Result<(), TaskError> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Task for BlockingWork<F>
where
    F: FnOnce() -> Result<(), TaskError> + Send + 'static,
{
    fn name(&self) -> &str {
        "blocking_work"
    }

    async fn execute(self: Box<Self>) -> Result<(), TaskError> {
        match tokio::task::spawn_blocking(self.f).await {
            Ok(result) => result,
            // surface the panic on the worker so it is counted like any other
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(TaskError::msg(format!("blocking work cancelled: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Named;

    #[async_trait]
    impl Task for Named {
        async fn execute(self: Box<Self>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn default_name_is_type_name() {
        assert!(Named.name().ends_with("Named"));
    }

    #[tokio::test]
    async fn work_runs_closure_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let task = Work::new({
            let hits = Arc::clone(&hits);
            move || async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        Box::new(task).execute().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocking_work_propagates_error() {
        let task = BlockingWork::new(|| Err(TaskError::msg("nope")));
        let err = Box::new(task).execute().await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
