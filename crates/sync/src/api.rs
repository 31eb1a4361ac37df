//! REST client for the imperative Job API.
//!
//! Wraps the Job API's HTTP endpoints (create, list, get, cancel)
//! using [`reqwest`]. Responses are full job records; the caller
//! merges them wholesale into the cache.

use std::sync::Arc;

use serde::Serialize;
use testlab_core::job::{Job, JobType};

use crate::auth::CredentialSource;

/// HTTP client for the Job API.
pub struct JobApi {
    client: reqwest::Client,
    api_url: String,
    credentials: Arc<dyn CredentialSource>,
}

/// Request body for `POST /api/jobs`.
#[derive(Debug, Serialize)]
struct CreateJobBody<'a> {
    #[serde(rename = "type")]
    job_type: JobType,
    parameters: &'a serde_json::Value,
}

/// Errors from the Job API layer.
#[derive(Debug, thiserror::Error)]
pub enum JobApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The Job API returned a non-2xx status code.
    #[error("Job API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// No bearer token is available (logged out).
    #[error("No credential available")]
    NoCredential,
}

impl JobApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:3000`.
    pub fn new(api_url: String, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            credentials,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: String,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            client,
            api_url,
            credentials,
        }
    }

    /// Launch a new job. Returns the created record.
    pub async fn create_job(
        &self,
        job_type: JobType,
        parameters: &serde_json::Value,
    ) -> Result<Job, JobApiError> {
        let body = CreateJobBody {
            job_type,
            parameters,
        };
        let response = self
            .client
            .post(format!("{}/api/jobs", self.api_url))
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the full job collection, newest first.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, JobApiError> {
        let response = self
            .client
            .get(format!("{}/api/jobs", self.api_url))
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch a single job record.
    pub async fn get_job(&self, job_id: &str) -> Result<Job, JobApiError> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{}", self.api_url, job_id))
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the server to cancel a queued or running job.
    ///
    /// The resulting `job:stopped` notification (or the next refetch)
    /// carries the state change back into the cache.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), JobApiError> {
        let response = self
            .client
            .post(format!("{}/api/jobs/{}/cancel", self.api_url, job_id))
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    fn bearer(&self) -> Result<String, JobApiError> {
        self.credentials.bearer().ok_or(JobApiError::NoCredential)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`JobApiError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, JobApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), JobApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
