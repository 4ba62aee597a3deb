use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as EngineError;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{debug, instrument, warn};

use crate::error::RuntimeError;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerStatus, ContainerSummary, RunSpec};

/// What a failed engine call was about, so a 404 can be named.
enum Subject<'a> {
    Engine,
    Image(&'a str),
    Container(&'a ContainerHandle),
}

/// [ContainerRuntime] talking to the local Docker engine API.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Use the local socket, or `DOCKER_HOST` when set. The engine is not
    /// contacted until the first call.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self { docker })
    }
}

/// Map an engine error onto the runtime error taxonomy. Anything that is not
/// an answer from the daemon means the daemon could not be reached.
fn classify(err: EngineError, operation: &'static str, subject: Subject<'_>) -> RuntimeError {
    match err {
        EngineError::DockerResponseServerError {
            status_code: 404,
            message,
        } => match subject {
            Subject::Image(image) => RuntimeError::ImageNotFound(image.to_string()),
            Subject::Container(handle) => RuntimeError::NoSuchContainer(handle.0.clone()),
            Subject::Engine => RuntimeError::Engine {
                operation,
                status: 404,
                message,
            },
        },
        EngineError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Engine {
            operation,
            status: status_code,
            message,
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

fn parse_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(
            ContainerStateStatusEnum::RUNNING
            | ContainerStateStatusEnum::RESTARTING
            | ContainerStateStatusEnum::PAUSED,
        ) => ContainerStatus::Running,
        _ => ContainerStatus::Exited,
    }
}

fn container_config(spec: &RunSpec) -> Config<String> {
    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|volume| format!("{}:{}", volume.host.display(), volume.container))
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        entrypoint: spec.entrypoint.clone().map(|entrypoint| vec![entrypoint]),
        working_dir: spec.working_dir.clone(),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn version(&self) -> Result<String, RuntimeError> {
        self.docker
            .ping()
            .await
            .map_err(|e| classify(e, "ping", Subject::Engine))?;
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| classify(e, "version", Subject::Engine))?;

        Ok(version.version.unwrap_or_default())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, "inspect image", Subject::Image(image)) {
                RuntimeError::ImageNotFound(_) => Ok(false),
                e => Err(e),
            },
        }
    }

    #[instrument(skip_all, fields(image = %spec.image))]
    async fn run(&self, spec: &RunSpec) -> Result<ContainerHandle, RuntimeError> {
        debug!(command = ?spec.command, "creating container");

        // the engine never pulls on create, a missing image is a 404
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
            .await
            .map_err(|e| classify(e, "create", Subject::Image(&spec.image)))?;
        for warning in &created.warnings {
            warn!(%warning, "engine warning");
        }
        let handle = ContainerHandle(created.id);

        if let Err(e) = self
            .docker
            .start_container(&handle.0, None::<StartContainerOptions<String>>)
            .await
        {
            let e = classify(e, "start", Subject::Container(&handle));
            if let Err(cleanup) = self.remove(&handle).await {
                warn!(container = %handle, error = %cleanup, "failed to remove unstarted container");
            }
            return Err(e);
        }

        Ok(handle)
    }

    #[instrument(skip_all, fields(container = %handle))]
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(&handle.0, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // already stopped
            Err(EngineError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(classify(e, "stop", Subject::Container(handle))),
        }
    }

    #[instrument(skip_all, fields(container = %handle))]
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&handle.0, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => match classify(e, "remove", Subject::Container(handle)) {
                RuntimeError::NoSuchContainer(_) => Ok(()),
                e => Err(e),
            },
        }
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| classify(e, "list", Subject::Engine))?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                Some(ContainerSummary {
                    handle: ContainerHandle(container.id?),
                    image: container.image.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus, RuntimeError> {
        let inspected = self
            .docker
            .inspect_container(&handle.0, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(e, "inspect", Subject::Container(handle)))?;

        Ok(parse_status(inspected.state.and_then(|state| state.status)))
    }

    async fn log_tail(
        &self,
        handle: &ContainerHandle,
        lines: Option<usize>,
    ) -> Result<Bytes, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: lines.map_or_else(|| "all".to_string(), |lines| lines.to_string()),
            ..Default::default()
        };
        let stream = self.docker.logs(&handle.0, Some(options));
        futures::pin_mut!(stream);

        // ffmpeg reports progress on stderr, so both streams matter
        let mut log = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| classify(e, "logs", Subject::Container(handle)))? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => log.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(log.freeze())
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::path::PathBuf;

    use bollard::errors::Error as EngineError;
    use bollard::models::ContainerStateStatusEnum;

    use crate::error::RuntimeError;
    use crate::runtime::docker::{classify, container_config, parse_status, Subject};
    use crate::runtime::{ContainerHandle, ContainerStatus, RunSpec, VolumeBinding};

    fn server_error(status_code: u16, message: &str) -> EngineError {
        EngineError::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    pub fn test_unreachable_engine_is_unavailable() {
        let err = EngineError::IOError {
            err: io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied while trying to connect to the Docker daemon socket",
            ),
        };

        assert!(matches!(
            classify(err, "create", Subject::Image("ffmpeg:1.0")),
            RuntimeError::Unavailable(_)
        ));
    }

    #[test]
    pub fn test_not_found_names_the_subject() {
        let err = classify(
            server_error(404, "No such image: ffmpeg:1.0"),
            "create",
            Subject::Image("ffmpeg:1.0"),
        );
        assert!(matches!(err, RuntimeError::ImageNotFound(image) if image == "ffmpeg:1.0"));

        let handle = ContainerHandle("abc".to_string());
        let err = classify(
            server_error(404, "No such container: abc"),
            "stop",
            Subject::Container(&handle),
        );
        assert!(matches!(err, RuntimeError::NoSuchContainer(id) if id == "abc"));
    }

    #[test]
    pub fn test_other_daemon_errors_keep_status() {
        let err = classify(server_error(409, "conflict"), "start", Subject::Engine);

        assert!(matches!(
            err,
            RuntimeError::Engine {
                operation: "start",
                status: 409,
                ..
            }
        ));
    }

    #[test]
    pub fn test_parse_status() {
        assert_eq!(
            parse_status(Some(ContainerStateStatusEnum::CREATED)),
            ContainerStatus::Created
        );
        assert_eq!(
            parse_status(Some(ContainerStateStatusEnum::RUNNING)),
            ContainerStatus::Running
        );
        assert_eq!(
            parse_status(Some(ContainerStateStatusEnum::EXITED)),
            ContainerStatus::Exited
        );
        assert_eq!(
            parse_status(Some(ContainerStateStatusEnum::DEAD)),
            ContainerStatus::Exited
        );
        assert_eq!(parse_status(None), ContainerStatus::Exited);
    }

    #[test]
    pub fn test_container_config() {
        let spec = RunSpec::new("curlimages/curl:latest", vec!["-c".to_string(), "curl -T a".to_string()])
            .with_volume(VolumeBinding {
                host: PathBuf::from("/data/videos"),
                container: "/vids".to_string(),
            })
            .with_entrypoint("sh")
            .with_working_dir("/vids");

        let config = container_config(&spec);

        assert_eq!(config.image.as_deref(), Some("curlimages/curl:latest"));
        assert_eq!(config.entrypoint, Some(vec!["sh".to_string()]));
        assert_eq!(config.cmd, Some(vec!["-c".to_string(), "curl -T a".to_string()]));
        assert_eq!(config.working_dir.as_deref(), Some("/vids"));
        assert_eq!(
            config.host_config.and_then(|host| host.binds),
            Some(vec!["/data/videos:/vids".to_string()])
        );
    }

    #[test]
    pub fn test_container_config_without_mounts() {
        let config = container_config(&RunSpec::new("ffmpeg:1.0", vec!["ffmpeg".to_string()]));

        assert_eq!(config.entrypoint, None);
        assert_eq!(config.host_config.and_then(|host| host.binds), None);
    }
}
