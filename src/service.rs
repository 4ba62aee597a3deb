use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::RuntimeError;
use crate::execution::LifecycleController;
use crate::upload::UploadPipeline;

/// Requests a running service accepts from outside its own loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Force-stop the encoders and carry on with the next slot.
    StopAll,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn log_snapshot(controller: &LifecycleController, pipeline: Option<&UploadPipeline>) {
    let snapshot = controller.snapshot();
    let next: Vec<String> = snapshot
        .upcoming
        .iter()
        .map(|entry| format!("{} @ {}", entry.file_name(), entry.scheduled_at))
        .collect();

    info!(
        status = %snapshot.status,
        queued = snapshot.queued,
        ?next,
        uploading = ?pipeline.and_then(|p| p.current()).map(|task| task.entry.file_name()),
        pending_uploads = pipeline.map_or(0, UploadPipeline::pending),
        "scheduler state"
    );
}

/// Drive the scheduler tick and the upload poll until the schedule and every
/// upload are done, or until Ctrl-C, which force-stops all encoders.
///
/// Both timers and `commands` are served on this one task, so their handlers
/// never overlap.
pub async fn run_service(
    mut controller: LifecycleController,
    mut pipeline: Option<UploadPipeline>,
    config: &SchedulerConfig,
    mut commands: mpsc::Receiver<ServiceCommand>,
) -> Result<(), RuntimeError> {
    let mut scheduler_tick = interval(config.tick);
    scheduler_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut upload_tick = interval(config.upload_poll);
    upload_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    log_snapshot(&controller, pipeline.as_ref());

    loop {
        tokio::select! {
            _ = scheduler_tick.tick() => {
                let outcome = controller.tick(now()).await;
                if let Some(entry) = outcome.handoff {
                    match pipeline.as_mut() {
                        Some(pipeline) => pipeline.enqueue(entry),
                        None => info!(file = %entry.file_name(), "upload disabled, not creating vod"),
                    }
                }
                if outcome.redraw {
                    log_snapshot(&controller, pipeline.as_ref());
                }

                if controller.is_idle() && pipeline.as_ref().map_or(true, UploadPipeline::is_idle) {
                    info!("schedule finished");
                    return Ok(());
                }
            }
            _ = upload_tick.tick(), if pipeline.is_some() => {
                if let Some(pipeline) = pipeline.as_mut() {
                    if let Some(result) = pipeline.poll(now()).await {
                        debug!(?result, "upload task finished");
                    }
                }
            }
            Some(command) = commands.recv() => match command {
                ServiceCommand::StopAll => {
                    warn!("stop requested, stopping all encoder containers");
                    if let Err(e) = controller.stop_all().await {
                        error!(error = %e, "failed to stop encoder containers");
                    }
                    log_snapshot(&controller, pipeline.as_ref());
                }
            },
            _ = &mut ctrl_c => {
                warn!("interrupted, stopping all encoder containers");
                controller.stop_all().await?;
                return Ok(());
            }
        }
    }
}

/// Keep a test-pattern stream running and report its bitrate until it ends or Ctrl-C.
pub async fn run_test_stream(
    mut controller: LifecycleController,
    config: &SchedulerConfig,
) -> Result<(), RuntimeError> {
    if controller.start_test_stream().await.is_none() {
        return Ok(());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = interval(config.tick);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.tick(now()).await;
                if controller.context().active_job().is_none() {
                    return Ok(());
                }
                info!(status = %controller.snapshot().status, "test stream");
            }
            _ = &mut ctrl_c => {
                return controller.stop_test_stream().await;
            }
        }
    }
}
