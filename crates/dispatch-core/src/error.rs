use std::time::Duration;

use thiserror::Error;

/// Errors returned to callers of the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("timed out after {timeout:?} waiting to submit task to dispatcher `{dispatcher}`")]
    SubmitTimedOut { dispatcher: String, timeout: Duration },

    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),
}

/// Failure reported by a task's `execute`.
///
/// Task failures never leave the worker loop: they are logged and counted.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Source(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source(Box::new(err))
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_dispatcher() {
        let err = DispatchError::SubmitTimedOut {
            dispatcher: "ingest".to_string(),
            timeout: Duration::from_millis(250),
        };
        let msg = err.to_string();
        assert!(msg.contains("ingest"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn task_error_keeps_source_message() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = TaskError::new(io);
        assert_eq!(err.to_string(), "disk gone");
        assert_eq!(TaskError::from("boom").to_string(), "boom");
    }
}
