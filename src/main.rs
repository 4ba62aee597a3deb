use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamsched::config::StreamSettings;
use streamsched::execution::LifecycleController;
use streamsched::notify::{Notifier, Severity, TracingNotifier};
use streamsched::runtime::docker::DockerEngine;
use streamsched::runtime::{preflight, stop_image, ContainerRuntime};
use streamsched::schedule::load::load_schedule;
use streamsched::service::{run_service, run_test_stream, ServiceCommand};
use streamsched::upload::UploadPipeline;
use streamsched::vod::http::HttpVodApi;
use streamsched::vod::VodApi;

#[derive(Parser)]
#[command(about = "Schedules unattended live streams and uploads them as VOD")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a schedule until every slot has streamed and been uploaded.
    ///
    /// SIGUSR1 force-stops the current stream and moves on to the next slot.
    Run {
        /// JSON schedule file.
        schedule: PathBuf,

        #[command(flatten)]
        settings: StreamSettings,
    },
    /// Stream a test pattern to the configured endpoint.
    TestStream {
        #[command(flatten)]
        settings: StreamSettings,
    },
    /// Check that the container runtime and the encoder image are ready.
    Check {
        #[arg(long, env = "STREAM_ENCODER_IMAGE", default_value = "ffmpeg:1.0")]
        encoder_image: String,
    },
    /// Force-stop every encoder container. A running scheduler treats the
    /// stopped stream as interrupted and does not upload it.
    StopAll {
        #[arg(long, env = "STREAM_ENCODER_IMAGE", default_value = "ffmpeg:1.0")]
        encoder_image: String,
    },
}

/// Turn SIGUSR1 into [ServiceCommand::StopAll] for the running service.
#[cfg(unix)]
fn forward_stop_signal(commands: mpsc::Sender<ServiceCommand>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut stop = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    tokio::spawn(async move {
        while stop.recv().await.is_some() {
            if commands.send(ServiceCommand::StopAll).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn forward_stop_signal(_commands: mpsc::Sender<ServiceCommand>) -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerEngine::connect().context("connecting to the docker engine")?);
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

    match cli.command {
        Command::Run { schedule, settings } => {
            let config = settings.scheduler_config();
            let schedule = load_schedule(&schedule, Local::now().naive_local(), &config.mount_point)
                .with_context(|| format!("loading schedule {}", schedule.display()))?;

            if !preflight(runtime.as_ref(), &config.encoder_image, notifier.as_ref()).await {
                warn!("preflight checks failed, streams may not start");
            }

            let api = settings
                .api_access()
                .map(|access| Arc::new(HttpVodApi::new(access)) as Arc<dyn VodApi>);
            let pipeline = match (&api, &settings.callback_url) {
                (Some(api), Some(callback_url)) => Some(
                    UploadPipeline::new(
                        runtime.clone(),
                        api.clone(),
                        notifier.clone(),
                        callback_url.clone(),
                        &config,
                    )
                    .with_volume(schedule.volume.clone()),
                ),
                _ => {
                    info!("api key, channel, base url or callback url missing, vod upload is disabled");
                    None
                }
            };

            let mut controller = LifecycleController::new(
                runtime,
                api,
                notifier,
                settings.credentials(),
                config.clone(),
            );
            controller.load(schedule);

            let (commands, receiver) = mpsc::channel(4);
            forward_stop_signal(commands)?;

            run_service(controller, pipeline, &config, receiver).await?;
        }
        Command::TestStream { settings } => {
            let config = settings.scheduler_config();
            let controller = LifecycleController::new(
                runtime,
                None,
                notifier,
                settings.credentials(),
                config.clone(),
            );

            run_test_stream(controller, &config).await?;
        }
        Command::Check { encoder_image } => {
            if !preflight(runtime.as_ref(), &encoder_image, notifier.as_ref()).await {
                bail!("preflight checks failed");
            }
            info!("container runtime ready");
        }
        Command::StopAll { encoder_image } => {
            let stopped = stop_image(runtime.as_ref(), &encoder_image).await?;
            notifier.notify(Severity::Info, &format!("Stopped {stopped} containers"));
        }
    }

    Ok(())
}
