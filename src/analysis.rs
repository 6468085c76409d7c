//! Client for the third-party video analysis service.
//!
//! # Wire Format
//!
//! One `POST` per video, JSON both ways:
//!
//! ```text
//! Authorization: Bearer <token>
//! X-Nb-Workspace: <workspace>
//! Accept: application/json
//!
//! {"type": "video", "external_id": "I-264530", "filename": "I-264530.mp4",
//!  "title": "...", "source": {"type": "URL", "url": "https://..."},
//!  "analysis_parameters": {"transcript_language": "en",
//!                          "audio_channel_mapping": "left", "tasks": ["mxt"]}}
//! ```
//!
//! The response's `analysis_request_id` is the job id. A non-2xx answer, an
//! undecodable body or a missing id is a failed submission.

use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::error::AnalysisError;
use crate::models::PendingRecord;
use crate::utils::{looks_truncated, truncate_for_log};

pub const WORKSPACE_HEADER: &str = "X-Nb-Workspace";

/// Per-request parameters sent with every submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub workspace: String,
    pub transcript_language: String,
    pub audio_channel_mapping: String,
    pub tasks: Vec<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            workspace: "demo-en".to_string(),
            transcript_language: "en".to_string(),
            audio_channel_mapping: "left".to_string(),
            tasks: vec!["mxt".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisParameters {
    pub transcript_language: String,
    pub audio_channel_mapping: String,
    pub tasks: Vec<String>,
}

/// Submission payload for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub external_id: String,
    pub filename: String,
    pub title: String,
    pub source: MediaSource,
    pub analysis_parameters: AnalysisParameters,
}

impl AnalysisRequest {
    pub fn new(record: &PendingRecord, settings: &AnalysisSettings) -> Self {
        Self {
            kind: "video",
            external_id: record.source_id.clone(),
            filename: format!("{}.mp4", record.source_id),
            title: record.title.clone(),
            source: MediaSource {
                kind: "URL",
                url: record.download_url.clone(),
            },
            analysis_parameters: AnalysisParameters {
                transcript_language: settings.transcript_language.clone(),
                audio_channel_mapping: settings.audio_channel_mapping.clone(),
                tasks: settings.tasks.clone(),
            },
        }
    }
}

/// Submission contract used by the submitter.
pub trait AnalysisClient {
    /// Submit one video and return the service's job id.
    async fn submit(&self, request: &AnalysisRequest) -> Result<String, AnalysisError>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    analysis_request_id: Option<serde_json::Value>,
}

/// Extract the job id from a response body. Numeric ids are accepted too.
pub fn parse_job_id(body: &str) -> Result<String, AnalysisError> {
    let response: SubmitResponse = serde_json::from_str(body).inspect_err(|e| {
        if looks_truncated(e) {
            warn!(body = %truncate_for_log(body, 200), "Analysis response looks truncated");
        }
    })?;

    match response.analysis_request_id {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => Ok(id),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AnalysisError::MissingJobId),
    }
}

/// [`AnalysisClient`] over HTTPS.
pub struct HttpAnalysisClient {
    client: Client,
    url: String,
    token: String,
    workspace: String,
}

impl std::fmt::Debug for HttpAnalysisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAnalysisClient")
            .field("url", &self.url)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl HttpAnalysisClient {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        workspace: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
            workspace: workspace.into(),
        })
    }
}

impl AnalysisClient for HttpAnalysisClient {
    #[instrument(level = "info", skip_all, fields(external_id = %request.external_id))]
    async fn submit(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        let t0 = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .header(WORKSPACE_HEADER, &self.workspace)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%status, elapsed_ms = t0.elapsed().as_millis(), "Analysis service answered");

        if !status.is_success() {
            return Err(AnalysisError::Status {
                status,
                body: truncate_for_log(&body, 300),
            });
        }
        parse_job_id(&body)
    }
}
