//! Task queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::task::ChapterTask;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for chaptering tasks
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Max delivery attempts before the failure is terminal
    pub max_retries: u32,
    /// How long an unacked task stays invisible before another worker
    /// may claim it
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vchap:tasks".to_string(),
            consumer_group: "vchap:workers".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "vchap:tasks".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vchap:workers".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Task queue client.
pub struct TaskQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl TaskQueue {
    /// Create a new task queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Submit a chaptering task. Returns the stream message id, which the
    /// dispatcher stores on the job as its opaque task handle.
    ///
    /// Submission is idempotent per video: a `SET NX` dedup key rejects a
    /// second live task for the same video, closing the single-flight race
    /// at the storage layer.
    pub async fn submit(&self, task: &ChapterTask) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(task)?;
        let dedup_key = self.dedup_key(&task.video_id);

        let claimed: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(task.job_id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(3600)
            .query_async(&mut conn)
            .await?;
        if !claimed {
            warn!("Duplicate task rejected for video {}", task.video_id);
            return Err(QueueError::submit_failed(format!(
                "a task is already live for video {}",
                task.video_id
            )));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("key")
            .arg(task.idempotency_key())
            .query_async(&mut conn)
            .await;
        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // Release the guard so a retry is not locked out for the
                // key's full TTL
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(QueueError::Redis(e));
            }
        };

        info!(
            "Submitted task for job {} with message ID {}",
            task.job_id, message_id
        );

        Ok(message_id)
    }

    /// Best-effort revocation of a submitted task.
    ///
    /// Removes the message from the stream so no worker picks it up. A
    /// task that already finished (message gone) is a no-op, not an error.
    /// Revocation is cooperative: an in-flight task is not interrupted and
    /// only observes cancellation at its next checkpoint.
    pub async fn revoke(&self, task_handle: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(task_handle)
            .query_async::<()>(&mut conn)
            .await?;

        let removed: u64 = redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(task_handle)
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            debug!("Revoke of {} was a no-op (task already gone)", task_handle);
        } else {
            info!("Revoked task {}", task_handle);
        }
        Ok(())
    }

    /// Acknowledge a task (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged task: {}", message_id);
        Ok(())
    }

    /// Clear the per-video dedup key so a new task can be submitted.
    /// Called when a task reaches a terminal outcome.
    pub async fn clear_dedup(&self, video_id: &vchap_models::VideoId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.dedup_key(video_id)).await?;
        Ok(())
    }

    fn dedup_key(&self, video_id: &vchap_models::VideoId) -> String {
        format!("vchap:dedup:chapter:{}", video_id)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Consume tasks from the queue.
    /// Returns (message_id, task) pairs.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ChapterTask)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();

                if let Some(redis::Value::BulkString(payload)) = entry.map.get("task") {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<ChapterTask>(&payload_str) {
                        Ok(task) => {
                            debug!("Consumed task for job {}", task.job_id);
                            tasks.push((message_id, task));
                        }
                        Err(e) => {
                            warn!("Failed to parse task payload: {}", e);
                            // Ack the malformed message to prevent reprocessing
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(tasks)
    }

    /// Claim pending tasks that have been idle for too long.
    /// This handles tasks from crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ChapterTask)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut tasks = Vec::new();

        for entry in result.ids {
            let message_id = entry.id.clone();

            if let Some(redis::Value::BulkString(payload)) = entry.map.get("task") {
                let payload_str = String::from_utf8_lossy(payload);
                match serde_json::from_str::<ChapterTask>(&payload_str) {
                    Ok(task) => {
                        info!("Claimed pending task for job {}", task.job_id);
                        tasks.push((message_id, task));
                    }
                    Err(e) => {
                        warn!("Failed to parse claimed task payload: {}", e);
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(tasks)
    }

    /// Increment the delivery attempt count for a task.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = format!("vchap:retry:{}", message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        // Bookkeeping expires after a day
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Max delivery attempts from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// How long an unacked task must sit idle before a claim succeeds.
    pub fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }
}
