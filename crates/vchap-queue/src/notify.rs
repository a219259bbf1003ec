//! Job events via Redis Pub/Sub.

use redis::AsyncCommands;
use tracing::debug;

use vchap_models::{Chapter, JobEvent, JobId, ProcessingStage, VideoId};

use crate::error::QueueResult;

/// Channel for publishing/subscribing to job events.
///
/// Delivery is best-effort and at-most-once. Publishing to a channel with
/// no subscribers is not an error; the event is simply dropped.
pub struct NotificationChannel {
    client: redis::Client,
}

impl NotificationChannel {
    /// Create a new notification channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("jobs:{}", job_id)
    }

    /// Publish a job event.
    pub async fn publish(&self, event: &JobEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing {:?} event to {}", event.kind(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Publish a progress update.
    pub async fn progress(
        &self,
        job_id: &JobId,
        video_id: &VideoId,
        progress: f64,
        message: impl Into<String>,
    ) -> QueueResult<()> {
        self.publish(&JobEvent::progress(
            job_id.clone(),
            video_id.clone(),
            progress,
            message,
        ))
        .await
    }

    /// Publish a stage transition.
    pub async fn stage_changed(
        &self,
        job_id: &JobId,
        video_id: &VideoId,
        new_stage: ProcessingStage,
    ) -> QueueResult<()> {
        self.publish(&JobEvent::stage_changed(
            job_id.clone(),
            video_id.clone(),
            new_stage,
        ))
        .await
    }

    /// Publish a completion event with the final chapter list.
    pub async fn completed(
        &self,
        job_id: &JobId,
        video_id: &VideoId,
        chapters: Vec<Chapter>,
    ) -> QueueResult<()> {
        self.publish(&JobEvent::completed(
            job_id.clone(),
            video_id.clone(),
            chapters,
        ))
        .await
    }

    /// Publish a failure event.
    pub async fn failed(
        &self,
        job_id: &JobId,
        video_id: &VideoId,
        error: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        self.publish(&JobEvent::failed(
            job_id.clone(),
            video_id.clone(),
            error,
            details,
        ))
        .await
    }

    /// Subscribe to events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = JobEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
