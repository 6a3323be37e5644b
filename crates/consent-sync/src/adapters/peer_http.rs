//! HTTP client for the controller's subject-data endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use shared_types::SubjectId;
use tracing::debug;

use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::PeerDataSource;

pub struct HttpPeerDataSource {
    http_client: reqwest::Client,
    controller_url: String,
    bearer_token: Option<String>,
}

impl HttpPeerDataSource {
    pub fn new(controller_url: &str, bearer_token: Option<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http_client,
            controller_url: controller_url.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    /// `{controller}/processors/subject/{subjectId}/data`
    pub fn subject_url(&self, subject: &SubjectId) -> String {
        format!(
            "{}/processors/subject/{}/data",
            self.controller_url,
            subject.as_str()
        )
    }
}

#[async_trait]
impl PeerDataSource for HttpPeerDataSource {
    async fn fetch_subject_data(&self, subject: &SubjectId) -> WorkflowResult<Value> {
        let fail = |reason: String| WorkflowError::PeerFetch {
            subject: subject.clone(),
            reason,
        };

        let url = self.subject_url(subject);
        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("controller responded with {status}")));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| fail(format!("invalid JSON body: {e}")))?;
        debug!(subject = %subject, "[peer] Fetched subject data from controller");
        Ok(body)
    }
}
