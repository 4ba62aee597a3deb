use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::ApiAccess;
use crate::error::ApiError;
use crate::vod::{UploadTarget, VodApi, VodAsset};

/// [VodApi] talking to the platform's REST interface.
#[derive(Clone)]
pub struct HttpVodApi {
    http_client: Client,
    access: ApiAccess,
}

impl HttpVodApi {
    pub fn new(access: ApiAccess) -> Self {
        Self {
            http_client: Client::new(),
            access,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.access.base_url.trim_end_matches('/'), path)
    }

    fn key(&self) -> [(&'static str, &str); 1] {
        [("apikey", self.access.api_key.as_str())]
    }
}

fn ensure_success(response: Response, context: &'static str) -> Result<Response, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status { context, status });
    }

    Ok(response)
}

/// Pull `content.data` out of a package document.
fn package_items(body: Value) -> Result<Vec<Value>, ApiError> {
    match body.pointer("/content/data") {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(ApiError::Malformed(
            "package response has no content.data array".to_string(),
        )),
    }
}

#[async_trait]
impl VodApi for HttpVodApi {
    #[instrument(skip_all, fields(channel = %self.access.channel_id))]
    async fn purge(&self) -> Result<(), ApiError> {
        let url = self.url(&format!("/channel/{}/webdvr/purge", self.access.channel_id));
        let response = self.http_client.put(&url).query(&self.key()).send().await?;
        ensure_success(response, "dvr purge")?;

        Ok(())
    }

    #[instrument(skip_all, fields(source = source))]
    async fn request_upload(
        &self,
        source: &str,
        callback_url: &str,
    ) -> Result<UploadTarget, ApiError> {
        let body = json!({
            "source": source,
            "callback_url": callback_url,
            "upload_type": "curl",
            "auto_encoding": false,
        });
        let response = self
            .http_client
            .post(self.url("/vod"))
            .query(&self.key())
            .json(&body)
            .send()
            .await?;
        let body: Value = ensure_success(response, "vod upload request")?.json().await?;
        debug!(%body, "upload target");

        serde_json::from_value(body).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    #[instrument(skip_all)]
    async fn list_vods(&self) -> Result<Vec<VodAsset>, ApiError> {
        let response = self
            .http_client
            .get(self.url("/vod"))
            .query(&self.key())
            .query(&[("_format", "JSON")])
            .send()
            .await?;
        let body: Value = ensure_success(response, "vod listing")?.json().await?;

        match body.get("data") {
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|e| ApiError::Malformed(e.to_string())),
            None => Err(ApiError::Malformed(
                "vod listing has no data field".to_string(),
            )),
        }
    }

    #[instrument(skip_all, fields(package = package_id))]
    async fn package_content(&self, package_id: &str) -> Result<Vec<Value>, ApiError> {
        let response = self
            .http_client
            .get(self.url(&format!("/package/{package_id}")))
            .query(&self.key())
            .query(&[("_format", "JSON")])
            .send()
            .await?;
        let body: Value = ensure_success(response, "package fetch")?.json().await?;

        package_items(body)
    }

    #[instrument(skip_all, fields(package = package_id, items = content.len()))]
    async fn update_package_content(
        &self,
        package_id: &str,
        content: Vec<Value>,
    ) -> Result<(), ApiError> {
        let response = self
            .http_client
            .put(self.url(&format!("/package/{package_id}/content")))
            .query(&self.key())
            .json(&json!({ "content": content }))
            .send()
            .await?;
        ensure_success(response, "package update")?;

        Ok(())
    }
}
