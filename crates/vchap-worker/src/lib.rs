//! Chapter generation worker.
//!
//! This crate provides:
//! - Job dispatch (start/cancel/restart) and status inspection
//! - The chaptering pipeline: transcription, generation, validation
//! - A task executor with retry accounting and graceful shutdown
//! - HTTP adapters for the speech-to-text and language-model services

pub mod adapters;
pub mod asr;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod llm;
pub mod logging;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod store;
pub mod validate;

pub use config::WorkerConfig;
pub use dispatcher::Dispatcher;
pub use error::{WorkerError, WorkerResult};
pub use executor::TaskExecutor;
pub use logging::JobLogger;
pub use pipeline::ProcessingContext;
pub use store::MemoryStore;
