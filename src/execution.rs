use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::config::{Credentials, SchedulerConfig};
use crate::encoder::{self, EncoderCommand, StreamOutcome};
use crate::error::RuntimeError;
use crate::notify::{Notifier, Severity};
use crate::runtime::{self, ContainerHandle, ContainerRuntime, ContainerStatus, RunSpec, VolumeBinding};
use crate::schedule::load::LoadedSchedule;
use crate::schedule::{ScheduleEntry, ScheduleStore};
use crate::vod::VodApi;

/// Number of queued entries exposed to observers.
const UPCOMING_ENTRIES: usize = 10;

/// One-shot purge marker. `Fired` remembers which entry consumed it so the
/// next head entry gets its own purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeFlag {
    Armed,
    Fired(ScheduleEntry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Scheduled(ScheduleEntry),
    TestPattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Started, but not observed running yet.
    Dispatched,
    Active { rate: Option<String> },
}

#[derive(Debug, Clone)]
pub struct StreamJob {
    pub kind: JobKind,
    pub handle: ContainerHandle,
    pub state: JobState,
}

impl StreamJob {
    fn label(&self) -> String {
        match &self.kind {
            JobKind::Scheduled(entry) => entry.file_name(),
            JobKind::TestPattern => "test pattern".to_string(),
        }
    }
}

/// All mutable scheduler state. Owned by the controller; observers get a
/// [SchedulerSnapshot].
#[derive(Debug)]
pub struct SchedulerContext {
    store: ScheduleStore,
    job: Option<StreamJob>,
    purge: PurgeFlag,
    volume: Option<VolumeBinding>,
}

impl SchedulerContext {
    fn new() -> Self {
        Self {
            store: ScheduleStore::new(),
            job: None,
            purge: PurgeFlag::Armed,
            volume: None,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn active_job(&self) -> Option<&StreamJob> {
        self.job.as_ref()
    }

    pub fn purge_flag(&self) -> &PurgeFlag {
        &self.purge
    }

    fn purged(&self, entry: &ScheduleEntry) -> bool {
        matches!(&self.purge, PurgeFlag::Fired(fired) if fired == entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Inactive,
    Waiting,
    Active { rate: Option<String> },
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Inactive => f.write_str("Inactive"),
            StreamStatus::Waiting => f.write_str("Waiting"),
            StreamStatus::Active { rate: Some(rate) } => f.write_str(rate),
            StreamStatus::Active { rate: None } => f.write_str("-/-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub status: StreamStatus,
    pub upcoming: Vec<ScheduleEntry>,
    pub queued: usize,
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Entry whose stream ended successfully and should be uploaded.
    pub handoff: Option<ScheduleEntry>,
    /// The queue or the stream status changed.
    pub redraw: bool,
}

/// Drives scheduled entries through purge, dispatch, monitoring and retirement.
pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntime>,
    api: Option<Arc<dyn VodApi>>,
    notifier: Arc<dyn Notifier>,
    credentials: Credentials,
    config: SchedulerConfig,
    context: SchedulerContext,
}

impl LifecycleController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        api: Option<Arc<dyn VodApi>>,
        notifier: Arc<dyn Notifier>,
        credentials: Credentials,
        config: SchedulerConfig,
    ) -> Self {
        if api.is_none() {
            info!("no platform access configured, dvr purge is disabled");
        }

        Self {
            runtime,
            api,
            notifier,
            credentials,
            config,
            context: SchedulerContext::new(),
        }
    }

    pub fn load(&mut self, schedule: LoadedSchedule) {
        info!(entries = schedule.entries.len(), "schedule loaded");
        self.context.store.load(schedule.entries);
        self.context.volume = Some(schedule.volume);
        self.context.purge = PurgeFlag::Armed;
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.context
    }

    pub fn is_idle(&self) -> bool {
        self.context.job.is_none() && self.context.store.is_empty()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let status = match &self.context.job {
            None => StreamStatus::Inactive,
            Some(StreamJob {
                state: JobState::Dispatched,
                ..
            }) => StreamStatus::Waiting,
            Some(StreamJob {
                state: JobState::Active { rate },
                ..
            }) => StreamStatus::Active { rate: rate.clone() },
        };

        SchedulerSnapshot {
            status,
            upcoming: self.context.store.upcoming(UPCOMING_ENTRIES),
            queued: self.context.store.len(),
        }
    }

    /// Run one scheduler cycle: drop missed slots, purge, dispatch, monitor,
    /// prune, in that order.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if self.context.job.is_none() {
            outcome.redraw |= self.drop_missed(now);
            self.check_purge(now).await;
            outcome.redraw |= self.check_dispatch(now).await;
        }

        if self.context.job.is_some() {
            let (handoff, changed) = self.check_stream().await;
            outcome.handoff = handoff;
            outcome.redraw |= changed;
        }

        if self.context.job.is_some() {
            outcome.redraw |= self.context.store.prune_elapsed(now);
        }

        outcome
    }

    async fn check_purge(&mut self, now: NaiveDateTime) {
        let Some(api) = self.api.as_ref() else {
            return;
        };
        let Some(head) = self.context.store.peek_head() else {
            return;
        };
        if head.time_to_stream(now) >= self.config.purge_window || self.context.purged(head) {
            return;
        }

        let file = head.file_name();
        info!(%file, scheduled_at = %head.scheduled_at, "purging dvr cache");
        self.context.purge = PurgeFlag::Fired(head.clone());
        match api.purge().await {
            Ok(()) => info!(%file, "dvr cache purged"),
            Err(e) => warn!(%file, error = %e, "dvr purge failed"),
        }
    }

    async fn check_dispatch(&mut self, now: NaiveDateTime) -> bool {
        let due = self
            .context
            .store
            .peek_head()
            .is_some_and(|head| head.time_to_stream(now) < self.config.dispatch_window);
        if !due {
            return false;
        }

        // popped whether or not the start works, so one bad slot cannot block the rest
        let Some(entry) = self.context.store.pop_head() else {
            return false;
        };

        let input = format!("{}/{}", self.config.mount_point, entry.file_name());
        let mut spec = RunSpec::new(
            self.config.encoder_image.clone(),
            EncoderCommand::stream(&input, &self.credentials),
        );
        if let Some(volume) = &self.context.volume {
            spec = spec.with_volume(volume.clone());
        }

        match self.runtime.run(&spec).await {
            Ok(handle) => {
                info!(file = %entry.file_name(), container = %handle, "stream dispatched");
                self.notifier.notify(
                    Severity::Info,
                    &format!("Stream start: {} at {}", entry.file_name(), entry.scheduled_at),
                );
                self.context.job = Some(StreamJob {
                    kind: JobKind::Scheduled(entry),
                    handle,
                    state: JobState::Dispatched,
                });
            }
            Err(e) => {
                self.notifier.notify(
                    Severity::Error,
                    &format!("Error starting stream {}: {e}", entry.file_name()),
                );
            }
        }

        true
    }

    fn drop_missed(&mut self, now: NaiveDateTime) -> bool {
        if self.context.job.is_some() {
            return false;
        }

        let missed = self
            .context
            .store
            .drop_missed(now, self.config.dispatch_window);
        for entry in &missed {
            self.notifier.notify(
                Severity::Warning,
                &format!(
                    "Missed stream slot {} at {}, skipping it",
                    entry.file_name(),
                    entry.scheduled_at
                ),
            );
        }

        !missed.is_empty()
    }

    /// Poll the active job. Returns a handoff for a successful scheduled
    /// stream, and whether anything observable changed.
    async fn check_stream(&mut self) -> (Option<ScheduleEntry>, bool) {
        let Some(job) = self.context.job.as_ref() else {
            return (None, false);
        };
        let handle = job.handle.clone();

        let listed = match self.runtime.is_listed(&handle).await {
            Ok(listed) => listed,
            Err(e) => {
                self.notifier.notify(
                    Severity::Error,
                    &format!("Cannot query stream container {handle}: {e}"),
                );
                return (None, false);
            }
        };
        let status = if listed {
            match self.runtime.status(&handle).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(container = %handle, error = %e, "failed to inspect stream container");
                    return (None, false);
                }
            }
        } else {
            ContainerStatus::Exited
        };

        if status == ContainerStatus::Exited {
            return (self.retire().await, true);
        }

        let rate = match self
            .runtime
            .log_tail(&handle, Some(self.config.log_tail_lines))
            .await
        {
            Ok(tail) => encoder::latest_bitrate(&tail),
            Err(e) => {
                debug!(container = %handle, error = %e, "no log tail");
                None
            }
        };

        let state = JobState::Active { rate };
        let changed = self
            .context
            .job
            .as_ref()
            .is_some_and(|job| job.state != state);
        if let Some(job) = self.context.job.as_mut() {
            job.state = state;
        }

        (None, changed)
    }

    /// Classify the finished job, remove its container and clear it.
    async fn retire(&mut self) -> Option<ScheduleEntry> {
        let job = self.context.job.take()?;
        self.context.purge = PurgeFlag::Armed;

        let outcome = match self.runtime.log_tail(&job.handle, None).await {
            Ok(log) => encoder::classify(&log),
            Err(e) => {
                warn!(container = %job.handle, error = %e, "cannot read log of finished stream");
                StreamOutcome::Failure
            }
        };
        self.release(&job.handle).await;

        match outcome {
            StreamOutcome::Interrupted => {
                self.notifier.notify(
                    Severity::Warning,
                    &format!("Stream stopped before its end: {}", job.label()),
                );
                None
            }
            StreamOutcome::Failure => {
                self.notifier
                    .notify(Severity::Error, &format!("Stream failed: {}", job.label()));
                None
            }
            StreamOutcome::Success => {
                self.notifier.notify(
                    Severity::Info,
                    &format!("Stream ended successfully: {}", job.label()),
                );
                match job.kind {
                    JobKind::Scheduled(entry) => Some(entry),
                    JobKind::TestPattern => None,
                }
            }
        }
    }

    async fn release(&self, handle: &ContainerHandle) {
        if let Err(e) = self.runtime.remove(handle).await {
            warn!(container = %handle, error = %e, "failed to remove encoder container");
        }
    }

    /// Force-stop every encoder container and forget the active job. The
    /// schedule keeps running.
    pub async fn stop_all(&mut self) -> Result<usize, RuntimeError> {
        let job = self.context.job.take();
        self.context.purge = PurgeFlag::Armed;

        let stopped = runtime::stop_image(self.runtime.as_ref(), &self.config.encoder_image).await?;
        if let Some(job) = job {
            info!(stream = %job.label(), container = %job.handle, "active stream force-stopped");
            self.release(&job.handle).await;
        }

        if stopped == 0 {
            self.notifier
                .notify(Severity::Info, "No containers are running!");
        } else {
            self.notifier
                .notify(Severity::Info, &format!("Stopped {stopped} containers"));
        }

        Ok(stopped)
    }

    /// Stream a test pattern outside the schedule.
    pub async fn start_test_stream(&mut self) -> Option<ContainerHandle> {
        if self.context.job.is_some() {
            self.notifier
                .notify(Severity::Warning, "A stream is already running!");
            return None;
        }

        let spec = RunSpec::new(
            self.config.encoder_image.clone(),
            EncoderCommand::test_pattern(&self.credentials),
        );
        match self.runtime.run(&spec).await {
            Ok(handle) => {
                info!(container = %handle, "test stream dispatched");
                self.context.job = Some(StreamJob {
                    kind: JobKind::TestPattern,
                    handle: handle.clone(),
                    state: JobState::Dispatched,
                });
                Some(handle)
            }
            Err(e) => {
                self.notifier
                    .notify(Severity::Error, &format!("Error starting test stream: {e}"));
                None
            }
        }
    }

    pub async fn stop_test_stream(&mut self) -> Result<(), RuntimeError> {
        let handle = match &self.context.job {
            Some(StreamJob {
                kind: JobKind::TestPattern,
                handle,
                ..
            }) => handle.clone(),
            _ => {
                self.notifier
                    .notify(Severity::Warning, "No test stream is running!");
                return Ok(());
            }
        };

        self.context.job = None;
        self.runtime.stop(&handle).await?;
        self.release(&handle).await;

        Ok(())
    }
}
