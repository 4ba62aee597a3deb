use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::error::RuntimeError;
use crate::notify::{Notifier, Severity};

pub mod docker;

/// Opaque id of a container started through a [ContainerRuntime].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short ids are what operators see in `docker ps`
        let short: String = self.0.chars().take(12).collect();
        f.write_str(&short)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
}

/// Host directory made visible inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host: PathBuf,
    pub container: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub handle: ContainerHandle,
    pub image: String,
}

/// What to start: an image, the argv handed to its entrypoint, and mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub command: Vec<String>,
    pub volumes: Vec<VolumeBinding>,
    pub working_dir: Option<String>,
    pub entrypoint: Option<String>,
}

impl RunSpec {
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            volumes: Vec::new(),
            working_dir: None,
            entrypoint: None,
        }
    }

    pub fn with_volume(mut self, volume: VolumeBinding) -> Self {
        self.volumes.push(volume);

        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());

        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = Some(working_dir.into());

        self
    }
}

/// Starts, stops and observes detached containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn version(&self) -> Result<String, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn run(&self, spec: &RunSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Delete a container and its log. Removing an unknown container succeeds.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Containers the runtime currently considers active.
    async fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError>;

    /// Combined stdout/stderr; `lines = None` returns the whole log.
    async fn log_tail(
        &self,
        handle: &ContainerHandle,
        lines: Option<usize>,
    ) -> Result<Bytes, RuntimeError>;

    async fn is_listed(&self, handle: &ContainerHandle) -> Result<bool, RuntimeError> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|summary| &summary.handle == handle))
    }
}

/// Stop every active container whose image name contains `image`.
pub async fn stop_image(runtime: &dyn ContainerRuntime, image: &str) -> Result<usize, RuntimeError> {
    let containers = runtime.list().await?;
    let mut stopped = 0;
    for summary in containers.iter().filter(|summary| summary.image.contains(image)) {
        match runtime.stop(&summary.handle).await {
            Ok(()) => stopped += 1,
            Err(e) => warn!(container = %summary.handle, error = %e, "failed to stop container"),
        }
    }

    Ok(stopped)
}

/// Check that the runtime is reachable, the encoder image is installed and no
/// other encoder container is already running. Every failed check is reported.
pub async fn preflight(runtime: &dyn ContainerRuntime, image: &str, notifier: &dyn Notifier) -> bool {
    if let Err(e) = runtime.version().await {
        notifier.notify(Severity::Error, &format!("Container runtime is not running: {e}"));
        return false;
    }

    let mut ok = true;
    match runtime.image_exists(image).await {
        Ok(true) => {}
        Ok(false) => {
            notifier.notify(Severity::Error, &format!("{image} not found in local images!"));
            ok = false;
        }
        Err(e) => {
            notifier.notify(Severity::Error, &format!("Failed to inspect {image}: {e}"));
            ok = false;
        }
    }

    match runtime.list().await {
        Ok(containers) => {
            let running = containers
                .iter()
                .filter(|summary| summary.image.contains(image))
                .count();
            if running != 0 {
                notifier.notify(
                    Severity::Error,
                    &format!("{running} other containers with image {image} are running, please stop them"),
                );
                ok = false;
            }
        }
        Err(e) => {
            notifier.notify(Severity::Error, &format!("Failed to list containers: {e}"));
            ok = false;
        }
    }

    ok
}
