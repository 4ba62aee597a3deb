use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

pub mod http;

/// Asset id as handed out by the VOD platform, numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VodId {
    Number(u64),
    Text(String),
}

impl fmt::Display for VodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VodId::Number(id) => write!(f, "{id}"),
            VodId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VodAsset {
    pub id: VodId,
    #[serde(default)]
    pub title: String,
}

/// Where and how to push a file: the platform answers with a ready-made curl invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadTarget {
    #[serde(rename = "curl-command", default)]
    pub curl_command: Option<String>,
}

impl UploadTarget {
    /// The command to run, if the platform sent a usable one.
    pub fn command(&self) -> Option<&str> {
        self.curl_command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
    }
}

/// The remote REST calls used around a broadcast.
#[async_trait]
pub trait VodApi: Send + Sync {
    /// Clear the channel's DVR cache.
    async fn purge(&self) -> Result<(), ApiError>;

    async fn request_upload(&self, source: &str, callback_url: &str)
        -> Result<UploadTarget, ApiError>;

    async fn list_vods(&self) -> Result<Vec<VodAsset>, ApiError>;

    /// Current content items of a package, as returned by the platform.
    async fn package_content(&self, package_id: &str) -> Result<Vec<Value>, ApiError>;

    async fn update_package_content(
        &self,
        package_id: &str,
        content: Vec<Value>,
    ) -> Result<(), ApiError>;
}
