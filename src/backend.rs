use crate::error::UploadError;
use crate::notify::JobNotifier;
use crate::upload::{StorageLocation, UploadClient};

/// The remote side of an upload cycle: presign, PUT, then trigger the job
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn presign(&self, object_key: &str, content_type: &str) -> Result<String, UploadError>;

    async fn put(&self, url: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<(), UploadError>;

    async fn notify(&self, locations: &[StorageLocation]) -> Result<(), UploadError>;
}

pub struct HttpBackend {
    uploads: UploadClient,
    jobs: JobNotifier,
}

impl HttpBackend {
    pub fn new(presign_url: &str, job_url: &str) -> Result<Self, UploadError> {
        let http = reqwest::Client::new();
        Ok(Self {
            uploads: UploadClient::new(http.clone(), presign_url)?,
            jobs: JobNotifier::new(http, job_url),
        })
    }
}

impl Backend for HttpBackend {
    async fn presign(&self, object_key: &str, content_type: &str) -> Result<String, UploadError> {
        self.uploads
            .request_upload_target(object_key, content_type)
            .await
    }

    async fn put(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), UploadError> {
        self.uploads.upload(url, bytes, content_type).await
    }

    async fn notify(&self, locations: &[StorageLocation]) -> Result<(), UploadError> {
        self.jobs.notify(locations).await
    }
}
