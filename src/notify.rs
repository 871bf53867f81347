use crate::error::{Stage, UploadError};
use crate::upload::{http_error, StorageLocation};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct JobRequest<'a> {
    pub input: &'a [StorageLocation],
}

/// Workflow trigger posted after a successful upload
pub struct JobNotifier {
    http: reqwest::Client,
    job_url: String,
}

impl JobNotifier {
    pub fn new(http: reqwest::Client, job_url: impl Into<String>) -> Self {
        Self {
            http,
            job_url: job_url.into(),
        }
    }

    /// Trigger the workflow for uploaded objects. The result arrives later over the
    /// realtime channel, not in this response.
    pub async fn notify(&self, locations: &[StorageLocation]) -> Result<(), UploadError> {
        if locations.is_empty() {
            tracing::debug!("No locations to notify");
            return Ok(());
        }

        tracing::info!("Triggering job for {} object(s)", locations.len());

        let response = self
            .http
            .post(&self.job_url)
            .json(&JobRequest { input: locations })
            .send()
            .await
            .map_err(|source| UploadError::Transport {
                stage: Stage::Notify,
                source,
            })?;

        if !response.status().is_success() {
            return Err(http_error(Stage::Notify, response).await);
        }
        Ok(())
    }
}
