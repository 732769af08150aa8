use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::schemas::{
    ErrorBody, FinalSubmitRequest, FinalSubmitResponse, ProblemPayload, RunProblemRequest,
    RunProblemResponse,
};
use crate::services::grading_backend::{BackendError, GradingBackend};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct HttpGradingBackend {
    client: Client,
    api_root: String,
}

impl HttpGradingBackend {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.backend().api_root(),
            Duration::from_secs(settings.backend().connect_timeout_seconds),
            Duration::from_secs(settings.backend().request_timeout_seconds),
        )
    }

    /// `api_root` is the base URL including the route prefix, e.g.
    /// `http://localhost:5000/api/coding-assessment`.
    pub fn new(api_root: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .context("Failed to build grading backend HTTP client")?;

        Ok(Self { client, api_root: api_root.trim_end_matches('/').to_string() })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path.trim_start_matches('/'))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(path, request_id = %request_id, "Calling grading backend");

        let response = self
            .client
            .post(self.endpoint(path))
            .header(REQUEST_ID_HEADER, &request_id)
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        decode_response(response).await
    }
}

#[async_trait]
impl GradingBackend for HttpGradingBackend {
    async fn fetch_problems(&self, drive_id: &str) -> Result<Vec<ProblemPayload>, BackendError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(drive_id, request_id = %request_id, "Fetching problems");

        let response = self
            .client
            .get(self.endpoint("problem"))
            .query(&[("drive_id", drive_id)])
            .header(REQUEST_ID_HEADER, &request_id)
            .send()
            .await
            .map_err(|err| BackendError::Transport(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            let message = error_message(response).await;
            return Err(BackendError::NotFound(message));
        }

        decode_response(response).await
    }

    async fn run_problem(
        &self,
        request: &RunProblemRequest,
    ) -> Result<RunProblemResponse, BackendError> {
        self.post_json("submission/submit-question", request).await
    }

    async fn final_submit(
        &self,
        request: &FinalSubmitRequest,
    ) -> Result<FinalSubmitResponse, BackendError> {
        self.post_json("submission/final-submit", request).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let message = error_message(response).await;
        return Err(BackendError::Status { status: status.as_u16(), message });
    }

    let raw_body = response.text().await.map_err(|err| BackendError::Transport(err.to_string()))?;
    serde_json::from_str::<T>(&raw_body).map_err(|err| {
        BackendError::Protocol(format!("{err} (status {status}): {}", truncate(&raw_body, 200)))
    })
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let raw_body = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&raw_body)
        .ok()
        .and_then(|body| body.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            if raw_body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                truncate(&raw_body, 200)
            }
        })
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
