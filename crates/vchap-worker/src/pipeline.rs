//! The chaptering pipeline.
//!
//! Drives one task through transcription, generation, validation, and
//! persistence, updating the job record and publishing events along the
//! way. State changes always persist before they are announced, and
//! cancellation is observed at stage boundaries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use vchap_models::{
    format_transcript, transcript_stats, JobEvent, JobUpdate, ProcessingJob, ProcessingStage,
    VideoStatus,
};
use vchap_queue::ChapterTask;

use crate::adapters::{GenerationAdapter, ProgressFn, TranscriptionAdapter};
use crate::config::WorkerConfig;
use crate::dispatcher::NotificationSink;
use crate::engine::ChapterEngine;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::progress::StageWindow;
use crate::store::{ChapterStore, JobStore, VideoStore};
use crate::validate::validate_and_merge;

/// Global progress slice for per-chapter persistence updates.
const CHAPTER_SAVE_LO: f64 = 90.0;
const CHAPTER_SAVE_HI: f64 = 98.0;

/// Everything the pipeline needs to process tasks.
pub struct ProcessingContext {
    pub jobs: Arc<dyn JobStore>,
    pub videos: Arc<dyn VideoStore>,
    pub chapters: Arc<dyn ChapterStore>,
    pub transcriber: Arc<dyn TranscriptionAdapter>,
    pub generator: Arc<dyn GenerationAdapter>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: WorkerConfig,
}

/// Serialized access to one job's record, with persist-then-notify.
///
/// Every mutation goes through the state machine, is written to the
/// store as one whole-record update, and only then announced. A slow or
/// dead subscriber cannot stall the pipeline: publishes are capped by
/// `notify_timeout` and failures are logged, not propagated.
pub struct JobTracker {
    job: Mutex<ProcessingJob>,
    jobs: Arc<dyn JobStore>,
    notifier: Arc<dyn NotificationSink>,
    notify_timeout: Duration,
}

impl JobTracker {
    pub fn new(
        job: ProcessingJob,
        jobs: Arc<dyn JobStore>,
        notifier: Arc<dyn NotificationSink>,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            job: Mutex::new(job),
            jobs,
            notifier,
            notify_timeout,
        }
    }

    /// Apply an update, persist, then publish progress (and a stage
    /// change event when the stage moved).
    pub async fn apply(&self, update: JobUpdate, message: &str) -> WorkerResult<()> {
        let events = {
            let mut job = self.job.lock().await;
            let old_stage = job.stage;
            job.advance(update);
            self.jobs.update_job(&job).await?;

            let mut events = Vec::with_capacity(2);
            if job.stage != old_stage {
                events.push(JobEvent::stage_changed(
                    job.job_id.clone(),
                    job.video_id.clone(),
                    job.stage,
                ));
            }
            events.push(JobEvent::progress(
                job.job_id.clone(),
                job.video_id.clone(),
                job.progress,
                message,
            ));
            events
        };

        for event in events {
            self.publish(event).await;
        }
        Ok(())
    }

    /// Fail the job, persist, publish the failure.
    pub async fn fail(&self, message: &str, details: Option<serde_json::Value>) {
        let event = {
            let mut job = self.job.lock().await;
            job.fail(message, details.clone());
            if let Err(e) = self.jobs.update_job(&job).await {
                warn!("Failed to persist job {} failure: {}", job.job_id, e);
            }
            JobEvent::failed(job.job_id.clone(), job.video_id.clone(), message, details)
        };
        self.publish(event).await;
    }

    /// Complete the job, persist, publish the chapter list.
    pub async fn complete(&self, chapters: Vec<vchap_models::Chapter>) -> WorkerResult<()> {
        let event = {
            let mut job = self.job.lock().await;
            job.complete(Some(chapters.len()));
            self.jobs.update_job(&job).await?;
            JobEvent::completed(job.job_id.clone(), job.video_id.clone(), chapters)
        };
        self.publish(event).await;
        Ok(())
    }

    /// Re-read the stored record and report whether the job was
    /// cancelled out from under us. Adopts the stored terminal state so
    /// later mutations stay absorbed.
    pub async fn refresh_cancelled(&self) -> bool {
        let mut job = self.job.lock().await;
        match self.jobs.get_job(&job.job_id).await {
            Ok(stored) if stored.stage == ProcessingStage::Error => {
                *job = stored;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to refresh job {}: {}", job.job_id, e);
                false
            }
        }
    }

    pub async fn snapshot(&self) -> ProcessingJob {
        self.job.lock().await.clone()
    }

    async fn publish(&self, event: JobEvent) {
        let kind = event.kind();
        match tokio::time::timeout(self.notify_timeout, self.notifier.publish(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to publish {:?} event: {}", kind, e),
            Err(_) => warn!("Publishing {:?} event timed out", kind),
        }
    }
}

/// Bridge a synchronous adapter progress callback onto the tracker.
///
/// Returns the callback plus the forwarding task; drop the callback and
/// await the handle to flush remaining updates.
fn progress_bridge(
    tracker: Arc<JobTracker>,
    stage: ProcessingStage,
    window: StageWindow,
    message: String,
) -> (ProgressFn, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<f64>();

    let handle = tokio::spawn(async move {
        while let Some(local) = rx.recv().await {
            let update = JobUpdate::new()
                .progress(window.map(local))
                .stage_progress(stage, local);
            if let Err(e) = tracker.apply(update, &message).await {
                warn!("Failed to apply progress update: {}", e);
            }
        }
    });

    let callback: ProgressFn = Box::new(move |local| {
        let _ = tx.send(local);
    });

    (callback, handle)
}

/// Process one chaptering task end to end.
///
/// Returns `Ok` on success and on benign early exits (job already
/// terminal). Errors are returned to the executor, which owns retry
/// accounting and terminal failure.
pub async fn process_chapter_task(ctx: &ProcessingContext, task: &ChapterTask) -> WorkerResult<()> {
    let logger = JobLogger::new(&task.job_id, "chaptering");
    let deadline = Instant::now() + ctx.config.soft_timeout;

    let job = ctx.jobs.get_job(&task.job_id).await?;
    if job.is_complete() {
        logger.log_progress("job already terminal, skipping task");
        return Ok(());
    }

    let tracker = Arc::new(JobTracker::new(
        job,
        Arc::clone(&ctx.jobs),
        Arc::clone(&ctx.notifier),
        ctx.config.notify_timeout,
    ));
    logger.log_start("processing chaptering task");

    let mut video = ctx.videos.get_video(&task.video_id).await?;
    video.set_status(VideoStatus::Processing);
    ctx.videos.update_video(&video).await?;

    // Transcription phase: audio extraction then speech-to-text
    tracker
        .apply(
            JobUpdate::new()
                .stage(ProcessingStage::ExtractingAudio)
                .progress(StageWindow::TRANSCRIPTION.start()),
            "Preparing audio",
        )
        .await?;

    let extraction = StageWindow::TRANSCRIPTION.narrow(0.0, 20.0);
    tracker
        .apply(
            JobUpdate::new()
                .progress(extraction.end())
                .stage_progress(ProcessingStage::ExtractingAudio, 100.0),
            "Audio ready",
        )
        .await?;

    if tracker.refresh_cancelled().await {
        logger.log_progress("cancelled before transcription");
        return Ok(());
    }
    check_deadline(deadline)?;

    tracker
        .apply(
            JobUpdate::new().stage(ProcessingStage::GeneratingTranscript),
            "Transcribing audio",
        )
        .await?;

    let (on_progress, bridge) = progress_bridge(
        Arc::clone(&tracker),
        ProcessingStage::GeneratingTranscript,
        StageWindow::TRANSCRIPTION.narrow(20.0, 100.0),
        "Transcribing audio".to_string(),
    );
    let transcription = ctx
        .transcriber
        .transcribe(
            &video.media_path,
            task.config.language.as_deref(),
            task.config.initial_prompt.as_deref(),
            on_progress,
        )
        .await;
    bridge.await.ok();
    let transcription = transcription?;

    let stats = transcript_stats(&transcription.segments);
    logger.log_progress(&format!(
        "transcribed {} segments, {:.0}s of audio",
        stats.total_segments, stats.total_duration
    ));

    if tracker.refresh_cancelled().await {
        logger.log_progress("cancelled before generation");
        return Ok(());
    }
    check_deadline(deadline)?;

    // Generation phase
    tracker
        .apply(
            JobUpdate::new()
                .stage(ProcessingStage::AnalyzingContent)
                .progress(StageWindow::GENERATION.start())
                .metadata("transcript_stats", serde_json::to_value(&stats)?),
            "Analyzing transcript",
        )
        .await?;

    let transcript_text = format_transcript(&transcription.segments);
    if transcript_text.is_empty() {
        return Err(WorkerError::fatal("transcript is empty"));
    }

    tracker
        .apply(
            JobUpdate::new().stage(ProcessingStage::GeneratingChapters),
            "Generating chapters",
        )
        .await?;

    let engine = ChapterEngine::new(Arc::clone(&ctx.generator));
    let (on_progress, bridge) = progress_bridge(
        Arc::clone(&tracker),
        ProcessingStage::GeneratingChapters,
        StageWindow::GENERATION,
        "Generating chapters".to_string(),
    );
    let outcome = engine
        .generate(
            &transcript_text,
            transcription.duration,
            &task.config,
            move |local| on_progress(local),
        )
        .await;
    bridge.await.ok();
    let outcome = outcome?;

    if tracker.refresh_cancelled().await {
        logger.log_progress("cancelled before persistence");
        return Ok(());
    }
    check_deadline(deadline)?;

    // Persistence phase
    tracker
        .apply(
            JobUpdate::new()
                .stage(ProcessingStage::Finalizing)
                .progress(StageWindow::PERSISTENCE.start())
                .metadata(
                    "generation_stats",
                    serde_json::json!({
                        "strategy": outcome.strategy,
                        "attempts": outcome.attempts,
                        "candidates": outcome.candidates.len(),
                    }),
                ),
            "Validating chapters",
        )
        .await?;

    let chapters = validate_and_merge(
        &task.video_id,
        outcome.candidates,
        Some(transcription.duration),
        &task.config,
    );

    ctx.chapters
        .replace_chapters(&task.video_id, &chapters)
        .await?;

    let total = chapters.len();
    let save_window = StageWindow::new(CHAPTER_SAVE_LO, CHAPTER_SAVE_HI);
    for (i, chapter) in chapters.iter().enumerate() {
        let local = (i + 1) as f64 / total as f64 * 100.0;
        tracker
            .apply(
                JobUpdate::new()
                    .progress(save_window.map(local))
                    .stage_progress(ProcessingStage::Finalizing, local),
                &format!("Saved chapter {}/{}: {}", i + 1, total, chapter.title),
            )
            .await?;
    }

    let mut video = video.with_duration(transcription.duration);
    video.set_status(VideoStatus::Completed);
    ctx.videos.update_video(&video).await?;

    tracker.complete(chapters).await?;
    logger.log_completion(&format!("generated {} chapters", total));
    Ok(())
}

fn check_deadline(deadline: Instant) -> WorkerResult<()> {
    if Instant::now() >= deadline {
        Err(WorkerError::fatal("soft timeout exceeded"))
    } else {
        Ok(())
    }
}
