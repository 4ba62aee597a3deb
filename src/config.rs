use std::time::Duration;

use chrono::TimeDelta;
use clap::Args;

/// Publishing credentials for the RTMP endpoint plus optional platform access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub rtmp_url: String,
    pub user: String,
    pub password: String,
    pub play_path: String,
    pub api_key: Option<String>,
    pub channel_id: Option<String>,
}

impl Credentials {
    /// Platform access, if every piece of it was configured. Without it purge
    /// and upload are disabled.
    pub fn api(&self, base_url: Option<&str>) -> Option<ApiAccess> {
        Some(ApiAccess {
            base_url: base_url?.to_string(),
            api_key: self.api_key.clone()?,
            channel_id: self.channel_id.clone()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiAccess {
    pub base_url: String,
    pub api_key: String,
    pub channel_id: String,
}

/// Timing windows and images used by the scheduler and the upload pipeline.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub encoder_image: String,
    pub uploader_image: String,
    pub mount_point: String,
    pub tick: Duration,
    pub upload_poll: Duration,
    pub purge_window: TimeDelta,
    pub dispatch_window: TimeDelta,
    pub log_tail_lines: usize,
    pub vod_id_attempts: u32,
    pub vod_id_retry_spacing: TimeDelta,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            encoder_image: "ffmpeg:1.0".to_string(),
            uploader_image: "curlimages/curl:latest".to_string(),
            mount_point: "/vids".to_string(),
            tick: Duration::from_secs(1),
            upload_poll: Duration::from_millis(10),
            purge_window: TimeDelta::minutes(10),
            dispatch_window: TimeDelta::seconds(20),
            log_tail_lines: 1,
            vod_id_attempts: 5,
            vod_id_retry_spacing: TimeDelta::seconds(10),
        }
    }
}

/// Settings read from the command line, the environment, or a `.env` file.
#[derive(Args, Debug, Clone)]
pub struct StreamSettings {
    #[arg(long, env = "STREAM_RTMP_URL")]
    pub rtmp_url: String,

    #[arg(long, env = "STREAM_USER")]
    pub user: String,

    #[arg(long, env = "STREAM_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "STREAM_PLAYPATH")]
    pub play_path: String,

    #[arg(long, env = "STREAM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "STREAM_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Base URL of the VOD platform REST API.
    #[arg(long, env = "STREAM_API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Public URL the platform notifies once an upload is ingested.
    #[arg(long, env = "STREAM_CALLBACK_URL")]
    pub callback_url: Option<String>,

    #[arg(long, env = "STREAM_ENCODER_IMAGE", default_value = "ffmpeg:1.0")]
    pub encoder_image: String,

    #[arg(long, env = "STREAM_UPLOADER_IMAGE", default_value = "curlimages/curl:latest")]
    pub uploader_image: String,
}

impl StreamSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            rtmp_url: self.rtmp_url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            play_path: self.play_path.clone(),
            api_key: self.api_key.clone(),
            channel_id: self.channel_id.clone(),
        }
    }

    pub fn api_access(&self) -> Option<ApiAccess> {
        self.credentials().api(self.api_base_url.as_deref())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            encoder_image: self.encoder_image.clone(),
            uploader_image: self.uploader_image.clone(),
            ..SchedulerConfig::default()
        }
    }
}
