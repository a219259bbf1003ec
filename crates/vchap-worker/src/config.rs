//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent chaptering jobs
    pub max_concurrent_jobs: usize,
    /// Hard job timeout; the task future is aborted when it fires
    pub job_timeout: Duration,
    /// Soft job timeout; past this the job is failed cleanly at the next
    /// checkpoint instead of being aborted
    pub soft_timeout: Duration,
    /// Cap on a single notification publish; a slow subscriber must not
    /// stall the pipeline
    pub notify_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary audio files
    pub work_dir: String,
    /// How often the worker scans for orphaned pending tasks
    pub claim_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600),
            soft_timeout: Duration::from_secs(3300),
            notify_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: "/tmp/vchap".to_string(),
            claim_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            job_timeout: Duration::from_secs(
                std::env::var("WORKER_JOB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            soft_timeout: Duration::from_secs(
                std::env::var("WORKER_SOFT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3300),
            ),
            notify_timeout: Duration::from_secs(
                std::env::var("WORKER_NOTIFY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or_else(|_| "/tmp/vchap".to_string()),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
