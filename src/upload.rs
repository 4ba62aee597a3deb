use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::{ApiError, UploadError};
use crate::notify::{Notifier, Severity};
use crate::runtime::{ContainerHandle, ContainerRuntime, RunSpec, VolumeBinding};
use crate::schedule::ScheduleEntry;
use crate::vod::{VodApi, VodId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStage {
    /// The uploader container is transferring the file.
    AwaitingUploader,
    /// Transfer done, looking for the asset the platform created.
    ResolvingVodId {
        attempt: u32,
        next_attempt_at: Option<NaiveDateTime>,
    },
}

/// The upload of one finished stream.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub entry: ScheduleEntry,
    pub handle: ContainerHandle,
    pub stage: UploadStage,
}

/// Turns finished streams into VOD assets attached to their package, one at a time.
pub struct UploadPipeline {
    runtime: Arc<dyn ContainerRuntime>,
    api: Arc<dyn VodApi>,
    notifier: Arc<dyn Notifier>,
    callback_url: String,
    uploader_image: String,
    mount_point: String,
    max_attempts: u32,
    retry_spacing: TimeDelta,
    volume: Option<VolumeBinding>,
    task: Option<UploadTask>,
    pending: VecDeque<ScheduleEntry>,
}

impl UploadPipeline {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        api: Arc<dyn VodApi>,
        notifier: Arc<dyn Notifier>,
        callback_url: impl Into<String>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            runtime,
            api,
            notifier,
            callback_url: callback_url.into(),
            uploader_image: config.uploader_image.clone(),
            mount_point: config.mount_point.clone(),
            max_attempts: config.vod_id_attempts,
            retry_spacing: config.vod_id_retry_spacing,
            volume: None,
            task: None,
            pending: VecDeque::new(),
        }
    }

    /// Host directory mounted into the uploader, the same one the encoder sees.
    pub fn with_volume(mut self, volume: VolumeBinding) -> Self {
        self.volume = Some(volume);

        self
    }

    pub fn enqueue(&mut self, entry: ScheduleEntry) {
        info!(file = %entry.file_name(), pending = self.pending.len(), "upload queued");
        self.pending.push_back(entry);
    }

    pub fn current(&self) -> Option<&UploadTask> {
        self.task.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.task.is_none() && self.pending.is_empty()
    }

    /// Advance the current task by at most one step, or start the next queued one.
    /// Returns the result when a task finishes either way.
    pub async fn poll(&mut self, now: NaiveDateTime) -> Option<Result<VodId, UploadError>> {
        if self.task.is_none() {
            let entry = self.pending.pop_front()?;
            return match self.start(entry.clone()).await {
                Ok(task) => {
                    self.task = Some(task);
                    None
                }
                Err(e) => Some(Err(self.abort(&entry, e))),
            };
        }

        let task = self.task.as_ref()?;

        match task.stage.clone() {
            UploadStage::AwaitingUploader => {
                let handle = task.handle.clone();
                match self.runtime.is_listed(&handle).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(container = %handle, "uploader finished");
                        self.set_stage(UploadStage::ResolvingVodId {
                            attempt: 0,
                            next_attempt_at: None,
                        });
                    }
                    Err(e) => warn!(container = %handle, error = %e, "cannot query uploader"),
                }
                None
            }
            UploadStage::ResolvingVodId {
                attempt,
                next_attempt_at,
            } => {
                if next_attempt_at.is_some_and(|at| now < at) {
                    return None;
                }
                self.resolve(attempt + 1, now).await
            }
        }
    }

    fn set_stage(&mut self, stage: UploadStage) {
        if let Some(task) = self.task.as_mut() {
            task.stage = stage;
        }
    }

    #[instrument(skip_all, fields(file = %entry.file_name()))]
    async fn start(&self, entry: ScheduleEntry) -> Result<UploadTask, UploadError> {
        let target = self
            .api
            .request_upload(&entry.file_name(), &self.callback_url)
            .await?;
        let command = target
            .command()
            .ok_or_else(|| UploadError::MissingCommand(entry.file_name()))?;

        let mut spec = RunSpec::new(
            self.uploader_image.clone(),
            vec!["-c".to_string(), command.to_string()],
        )
        .with_entrypoint("sh")
        .with_working_dir(self.mount_point.clone());
        if let Some(volume) = &self.volume {
            spec = spec.with_volume(volume.clone());
        }

        let handle = self.runtime.run(&spec).await?;
        info!(container = %handle, "uploader dispatched");

        Ok(UploadTask {
            entry,
            handle,
            stage: UploadStage::AwaitingUploader,
        })
    }

    async fn resolve(
        &mut self,
        attempt: u32,
        now: NaiveDateTime,
    ) -> Option<Result<VodId, UploadError>> {
        let task = self.task.clone()?;
        let title = task.entry.title();

        let assets = match self.api.list_vods().await {
            Ok(assets) => assets,
            Err(e) => {
                self.release(&task.handle).await;
                return Some(self.finish(&task.entry, Err(e.into())));
            }
        };

        let Some(asset) = assets.into_iter().find(|asset| asset.title == title) else {
            if attempt >= self.max_attempts {
                let output = self.uploader_output(&task.handle).await;
                error!(%title, %output, "uploader output");
                let e = UploadError::RetryExhausted {
                    title,
                    attempts: attempt,
                    output,
                };
                self.release(&task.handle).await;
                return Some(self.finish(&task.entry, Err(e)));
            }

            warn!(%title, "vod id lookup attempt {attempt} of {} failed", self.max_attempts);
            self.set_stage(UploadStage::ResolvingVodId {
                attempt,
                next_attempt_at: Some(now + self.retry_spacing),
            });
            return None;
        };

        info!(%title, vod = %asset.id, "vod id resolved");
        self.release(&task.handle).await;
        let vod_id = asset.id;
        let attached = match self.attach(&task.entry.package_id, &vod_id).await {
            Ok(()) => Ok(vod_id),
            Err(e) => Err(e.into()),
        };
        Some(self.finish(&task.entry, attached))
    }

    async fn attach(&self, package_id: &str, vod_id: &VodId) -> Result<(), ApiError> {
        let items = self.api.package_content(package_id).await?;
        let content = append_vod(items, vod_id);
        self.api.update_package_content(package_id, content).await
    }

    /// Remove the exited uploader container once nothing needs its log.
    async fn release(&self, handle: &ContainerHandle) {
        if let Err(e) = self.runtime.remove(handle).await {
            warn!(container = %handle, error = %e, "failed to remove uploader container");
        }
    }

    async fn uploader_output(&self, handle: &ContainerHandle) -> String {
        match self.runtime.log_tail(handle, None).await {
            Ok(log) => String::from_utf8_lossy(&log).into_owned(),
            Err(e) => format!("<uploader log unavailable: {e}>"),
        }
    }

    fn finish(
        &mut self,
        entry: &ScheduleEntry,
        result: Result<VodId, UploadError>,
    ) -> Result<VodId, UploadError> {
        self.task = None;
        match result {
            Ok(vod_id) => {
                self.notifier.notify(
                    Severity::Info,
                    &format!(
                        "Uploaded {} as vod {vod_id} into package {}",
                        entry.file_name(),
                        entry.package_id
                    ),
                );
                Ok(vod_id)
            }
            Err(e) => Err(self.abort(entry, e)),
        }
    }

    fn abort(&mut self, entry: &ScheduleEntry, e: UploadError) -> UploadError {
        self.task = None;
        self.notifier.notify(
            Severity::Error,
            &format!("Upload of {} failed: {e}", entry.file_name()),
        );

        e
    }
}

/// The package content with `vod_id` appended. Items come back keyed by
/// `content_id` but must be sent keyed by `id`.
pub fn append_vod(items: Vec<Value>, vod_id: &VodId) -> Vec<Value> {
    let mut content: Vec<Value> = items
        .into_iter()
        .map(|mut item| {
            if let Some(map) = item.as_object_mut() {
                if let Some(id) = map.remove("content_id") {
                    map.insert("id".to_string(), id);
                }
            }
            item
        })
        .collect();

    let position = content.len();
    content.push(json!({
        "type": "vod",
        "position": position,
        "id": vod_id,
    }));

    content
}
