//! dispatch-core
//!
//! A bounded-queue, fixed-worker-count task dispatcher for Tokio.
//!
//! # Modules
//! - **dispatcher**: `Dispatcher` lifecycle (start / submit / stop) and its builder
//! - **task**: `Task` trait plus closure adapters (`Work`, `BlockingWork`)
//! - **queue**: bounded FIFO `TaskQueue` with close and hand-off semantics
//! - **config**: `DispatcherConfig` (serde + environment variables)
//! - **observability**: lifecycle state and stats snapshots
//! - **error**: `DispatchError`, `TaskError`

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observability;
pub mod queue;
pub mod task;

mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{DispatchError, TaskError};
pub use observability::{DispatcherState, DispatcherStats};
pub use queue::{QueueClosed, TaskQueue};
pub use task::{BlockingWork, Task, Work};

// re-exported so implementors don't need their own dependency on it
pub use async_trait::async_trait;
