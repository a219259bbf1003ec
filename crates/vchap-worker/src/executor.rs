//! Task executor.
//!
//! Pulls chaptering tasks off the queue and runs them through the
//! pipeline under a concurrency cap. Owns retry accounting: transient
//! failures below the delivery cap are left for redelivery, everything
//! else becomes a terminal job failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vchap_models::{JobEvent, VideoStatus};
use vchap_queue::{ChapterTask, TaskQueue};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{process_chapter_task, ProcessingContext};
use crate::retry::FailureTracker;

/// Task executor that processes chaptering tasks from the queue.
pub struct TaskExecutor {
    config: WorkerConfig,
    queue: Arc<TaskQueue>,
    ctx: Arc<ProcessingContext>,
    task_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl TaskExecutor {
    pub fn new(config: WorkerConfig, queue: TaskQueue, ctx: ProcessingContext) -> Self {
        let task_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            ctx: Arc::new(ctx),
            task_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run the executor until shutdown is signalled.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_loop();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_tasks() => {
                    if let Err(e) = result {
                        error!("Error consuming tasks: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight tasks to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_tasks()).await;

        info!("Executor stopped");
        Ok(())
    }

    /// Periodically claim tasks stranded by crashed workers.
    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let ctx = Arc::clone(&self.ctx);
        let semaphore = Arc::clone(&self.task_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        // Redelivery pacing: a task is only claimable once it has sat
        // unacked for the queue's visibility timeout
        let min_idle_ms = self.queue.visibility_timeout().as_millis() as u64;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            let mut failures = FailureTracker::new(3);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.claim_pending(&consumer_name, min_idle_ms, 5).await {
                            Ok(tasks) => {
                                failures.record_success();
                                if tasks.is_empty() {
                                    continue;
                                }
                                info!("Claimed {} stranded tasks", tasks.len());
                                for (message_id, task) in tasks {
                                    let Ok(permit) =
                                        Arc::clone(&semaphore).acquire_owned().await
                                    else {
                                        return;
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    let timeout = ctx.config.job_timeout;
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        execute_task(ctx, queue, timeout, message_id, task).await;
                                    });
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim stranded tasks: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    async fn consume_tasks(&self) -> WorkerResult<()> {
        let available = self.task_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let tasks = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if tasks.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} tasks from queue", tasks.len());

        for (message_id, task) in tasks {
            let permit = Arc::clone(&self.task_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::fatal("semaphore closed"))?;
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let timeout = self.config.job_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                execute_task(ctx, queue, timeout, message_id, task).await;
            });
        }

        Ok(())
    }

    async fn wait_for_tasks(&self) {
        loop {
            if self.task_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Run one task with a hard timeout and full retry accounting.
async fn execute_task(
    ctx: Arc<ProcessingContext>,
    queue: Arc<TaskQueue>,
    job_timeout: Duration,
    message_id: String,
    task: ChapterTask,
) {
    info!("Executing task for job {}", task.job_id);

    let result = match tokio::time::timeout(job_timeout, process_chapter_task(&ctx, &task)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::fatal(format!(
            "job timed out after {:?}",
            job_timeout
        ))),
    };

    match result {
        Ok(()) => {
            info!("Task for job {} finished", task.job_id);
            finish_task(&queue, &message_id, &task).await;
        }
        Err(e) if e.is_retryable() => {
            let retry_count = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
            let max_retries = queue.max_retries();

            if retry_count >= max_retries {
                warn!(
                    "Job {} exhausted {} delivery attempts: {}",
                    task.job_id, max_retries, e
                );
                fail_task(
                    &ctx,
                    &task,
                    &format!("failed after {} attempts: {}", max_retries, e),
                )
                .await;
                finish_task(&queue, &message_id, &task).await;
            } else {
                info!(
                    "Job {} will be redelivered (attempt {}/{}): {}",
                    task.job_id, retry_count, max_retries, e
                );
                // Left unacked; claim_pending picks it up after the idle window
            }
        }
        Err(e) => {
            error!("Job {} failed terminally: {}", task.job_id, e);
            fail_task(&ctx, &task, &e.to_string()).await;
            finish_task(&queue, &message_id, &task).await;
        }
    }
}

/// Ack the message and release the per-video single-flight guard.
async fn finish_task(queue: &TaskQueue, message_id: &str, task: &ChapterTask) {
    if let Err(e) = queue.ack(message_id).await {
        error!("Failed to ack task for job {}: {}", task.job_id, e);
    }
    if let Err(e) = queue.clear_dedup(&task.video_id).await {
        warn!(
            "Failed to clear dedup for video {}: {}",
            task.video_id, e
        );
    }
}

/// Record a terminal failure on the job, the video, and the event stream.
async fn fail_task(ctx: &ProcessingContext, task: &ChapterTask, message: &str) {
    match ctx.jobs.get_job(&task.job_id).await {
        Ok(mut job) => {
            job.fail(message, None);
            if let Err(e) = ctx.jobs.update_job(&job).await {
                error!("Failed to persist job {} failure: {}", task.job_id, e);
            }
        }
        Err(e) => error!("Failed to load job {} for failure: {}", task.job_id, e),
    }

    if let Ok(mut video) = ctx.videos.get_video(&task.video_id).await {
        video.set_status(VideoStatus::Failed);
        if let Err(e) = ctx.videos.update_video(&video).await {
            warn!("Failed to update video {} status: {}", task.video_id, e);
        }
    }

    let event = JobEvent::failed(task.job_id.clone(), task.video_id.clone(), message, None);
    if let Err(e) = ctx.notifier.publish(&event).await {
        warn!("Failed to publish failure event for job {}: {}", task.job_id, e);
    }
}
