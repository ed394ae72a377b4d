use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::client::ClientError;
use crate::models::api::{AnalyzeRequest, AnalyzeResponse, ResponseStatus, StatusResponse};

/// The two server calls an analysis session makes.
#[async_trait]
pub trait AnalysisEndpoint: Send + Sync {
    /// `POST /scans/{scan_id}/analyze`
    async fn trigger(
        &self,
        scan_id: &str,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeResponse, ClientError>;

    /// `GET /scans/{scan_id}/analysis-status?imageIndex=N`
    async fn fetch_status(
        &self,
        scan_id: &str,
        image_index: u32,
    ) -> Result<StatusResponse, ClientError>;
}

/// reqwest-backed client for the analysis API.
///
/// `base_url` includes the API prefix, e.g. `http://localhost:3000/api/v1`.
#[derive(Clone)]
pub struct AnalysisApi {
    http: Client,
    base_url: String,
}

impl AnalysisApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AnalysisEndpoint for AnalysisApi {
    async fn trigger(
        &self,
        scan_id: &str,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/scans/{}/analyze", self.base_url, scan_id))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // The server answers failures with an error envelope; surface its
        // message rather than the bare status code when there is one.
        if let Ok(parsed) = serde_json::from_str::<AnalyzeResponse>(&body) {
            if parsed.status == ResponseStatus::Error {
                return Err(ClientError::Rejected(
                    parsed
                        .message
                        .unwrap_or_else(|| "Analysis request was rejected".to_string()),
                ));
            }
        }

        decode(status, body)
    }

    async fn fetch_status(
        &self,
        scan_id: &str,
        image_index: u32,
    ) -> Result<StatusResponse, ClientError> {
        let response = self
            .http
            .get(format!("{}/scans/{}/analysis-status", self.base_url, scan_id))
            .query(&[("imageIndex", image_index)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        decode(status, body)
    }
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: String) -> Result<T, ClientError> {
    if !status.is_success() {
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(ClientError::Decode)
}
