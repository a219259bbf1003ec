//! Redis Streams task queue for chaptering jobs.
//!
//! This crate provides:
//! - Task submission via Redis Streams, idempotent per video
//! - Worker consumption with retry accounting and crash recovery
//! - Job events via Redis Pub/Sub

pub mod error;
pub mod notify;
pub mod queue;
pub mod task;

pub use error::{QueueError, QueueResult};
pub use notify::NotificationChannel;
pub use queue::{QueueConfig, TaskQueue};
pub use task::ChapterTask;
