//! In-memory stand-ins for the container runtime, the VOD platform and the
//! operator notification sink.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::{ApiError, RuntimeError};
use crate::notify::{Notifier, Severity};
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerStatus, ContainerSummary, RunSpec};
use crate::vod::{UploadTarget, VodApi, VodAsset};

struct FakeContainer {
    image: String,
    status: ContainerStatus,
    listed: bool,
    log: Vec<u8>,
}

struct RuntimeState {
    available: bool,
    missing_images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    runs: Vec<RunSpec>,
    stopped: Vec<ContainerHandle>,
    removed: Vec<ContainerHandle>,
    next_id: usize,
}

pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                available: true,
                missing_images: HashSet::new(),
                containers: HashMap::new(),
                runs: Vec::new(),
                stopped: Vec::new(),
                removed: Vec::new(),
                next_id: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap()
    }

    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn remove_image(&self, image: &str) {
        self.state().missing_images.insert(image.to_string());
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.state().runs.clone()
    }

    pub fn stopped(&self) -> Vec<ContainerHandle> {
        self.state().stopped.clone()
    }

    pub fn removed(&self) -> Vec<ContainerHandle> {
        self.state().removed.clone()
    }

    pub fn set_log(&self, handle: &ContainerHandle, log: &[u8]) {
        if let Some(container) = self.state().containers.get_mut(&handle.0) {
            container.log = log.to_vec();
        }
    }

    /// The container exits and leaves the active list.
    pub fn finish(&self, handle: &ContainerHandle, log: &[u8]) {
        if let Some(container) = self.state().containers.get_mut(&handle.0) {
            container.status = ContainerStatus::Exited;
            container.listed = false;
            container.log = log.to_vec();
        }
    }

    /// The container drops off the active list while its status still reads `created`.
    pub fn vanish(&self, handle: &ContainerHandle, log: &[u8]) {
        if let Some(container) = self.state().containers.get_mut(&handle.0) {
            container.status = ContainerStatus::Created;
            container.listed = false;
            container.log = log.to_vec();
        }
    }

    fn check_available(&self) -> Result<(), RuntimeError> {
        if self.state().available {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable("runtime down".to_string()))
        }
    }
}

fn no_such_container(handle: &ContainerHandle) -> RuntimeError {
    RuntimeError::NoSuchContainer(handle.0.clone())
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn version(&self) -> Result<String, RuntimeError> {
        self.check_available()?;
        Ok("fake".to_string())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.check_available()?;
        Ok(!self.state().missing_images.contains(image))
    }

    async fn run(&self, spec: &RunSpec) -> Result<ContainerHandle, RuntimeError> {
        self.check_available()?;
        let mut state = self.state();
        if state.missing_images.contains(&spec.image) {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }

        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.runs.push(spec.clone());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                image: spec.image.clone(),
                status: ContainerStatus::Running,
                listed: true,
                log: Vec::new(),
            },
        );

        Ok(ContainerHandle(id))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.check_available()?;
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(&handle.0)
            .ok_or_else(|| no_such_container(handle))?;
        container.status = ContainerStatus::Exited;
        container.listed = false;
        state.stopped.push(handle.clone());

        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.check_available()?;
        let mut state = self.state();
        if state.containers.remove(&handle.0).is_some() {
            state.removed.push(handle.clone());
        }

        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.check_available()?;
        let mut summaries: Vec<_> = self
            .state()
            .containers
            .iter()
            .filter(|(_, container)| container.listed)
            .map(|(id, container)| ContainerSummary {
                handle: ContainerHandle(id.clone()),
                image: container.image.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.handle.0.cmp(&b.handle.0));

        Ok(summaries)
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError> {
        self.check_available()?;
        self.state()
            .containers
            .get(&handle.0)
            .map(|container| container.status)
            .ok_or_else(|| no_such_container(handle))
    }

    async fn log_tail(
        &self,
        handle: &ContainerHandle,
        _lines: Option<usize>,
    ) -> Result<Bytes, RuntimeError> {
        self.check_available()?;
        self.state()
            .containers
            .get(&handle.0)
            .map(|container| Bytes::from(container.log.clone()))
            .ok_or_else(|| no_such_container(handle))
    }
}

/// Scripted responses and recorded calls of [FakeVodApi].
#[derive(Default)]
pub struct ApiState {
    pub purges: usize,
    pub purge_status: Option<StatusCode>,
    pub upload_requests: Vec<(String, String)>,
    pub upload_status: Option<StatusCode>,
    pub curl_command: String,
    /// Consumed one per listing call; an empty queue lists no assets.
    pub listings: VecDeque<Result<Vec<VodAsset>, StatusCode>>,
    pub list_calls: usize,
    pub package: Vec<Value>,
    pub package_status: Option<StatusCode>,
    pub update_status: Option<StatusCode>,
    pub updates: Vec<(String, Vec<Value>)>,
}

#[derive(Default)]
pub struct FakeVodApi {
    state: Mutex<ApiState>,
}

impl FakeVodApi {
    pub fn state(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap()
    }
}

fn scripted(status: Option<StatusCode>, context: &'static str) -> Result<(), ApiError> {
    match status {
        Some(status) => Err(ApiError::Status { context, status }),
        None => Ok(()),
    }
}

#[async_trait]
impl VodApi for FakeVodApi {
    async fn purge(&self) -> Result<(), ApiError> {
        let mut state = self.state();
        state.purges += 1;
        scripted(state.purge_status, "dvr purge")
    }

    async fn request_upload(
        &self,
        source: &str,
        callback_url: &str,
    ) -> Result<UploadTarget, ApiError> {
        let mut state = self.state();
        state
            .upload_requests
            .push((source.to_string(), callback_url.to_string()));
        scripted(state.upload_status, "vod upload request")?;

        Ok(UploadTarget {
            curl_command: Some(state.curl_command.clone()),
        })
    }

    async fn list_vods(&self) -> Result<Vec<VodAsset>, ApiError> {
        let mut state = self.state();
        state.list_calls += 1;
        match state.listings.pop_front() {
            Some(Ok(assets)) => Ok(assets),
            Some(Err(status)) => Err(ApiError::Status {
                context: "vod listing",
                status,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn package_content(&self, _package_id: &str) -> Result<Vec<Value>, ApiError> {
        let state = self.state();
        scripted(state.package_status, "package fetch")?;

        Ok(state.package.clone())
    }

    async fn update_package_content(
        &self,
        package_id: &str,
        content: Vec<Value>,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        scripted(state.update_status, "package update")?;
        state.updates.push((package_id.to_string(), content));

        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(recorded, _)| *recorded == severity)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}
