//! Client for the external CDN batch-upload API.

use crate::config::CdnConfig;
use crate::error::CdnError;

use serde::{Deserialize, Serialize};

/// One file the CDN pulled and deployed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployedFile {
    pub deployed_url: String,
    pub file: String,
    pub sha: String,
    pub size: u64,
}

/// Response body of a batch upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CdnUploadResponse {
    pub files: Vec<DeployedFile>,
    pub cdn_base: String,
}

/// Anything that can take a batch of fetchable URLs and deploy them.
pub trait UploadService: Send + Sync + 'static {
    fn upload(
        &self,
        urls: &[String],
    ) -> impl std::future::Future<Output = Result<CdnUploadResponse, CdnError>> + Send;
}

/// reqwest-backed upload client.
#[derive(Debug, Clone)]
pub struct CdnClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl CdnClient {
    pub fn new(config: &CdnConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

impl UploadService for CdnClient {
    /// POST the URLs as a JSON array. The CDN fetches every URL before it
    /// answers, so a successful return means the proxy tokens were used.
    async fn upload(&self, urls: &[String]) -> Result<CdnUploadResponse, CdnError> {
        tracing::debug!(count = urls.len(), url = %self.url, "submitting batch to CDN");

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(urls)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CdnError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|error| CdnError::Decode(error.to_string()))
    }
}
