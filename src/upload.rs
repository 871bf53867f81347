use crate::error::{Stage, UploadError};
use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use url::Url;

/// Response fields that may carry the presigned URL, checked in order
pub const PRESIGN_URL_FIELDS: [&str; 4] = ["url", "uploadUrl", "presignedUrl", "signedUrl"];

/// Where an uploaded object lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub key: String,
}

/// Object key for a single camera capture
pub fn capture_key(connection_id: &str) -> String {
    format!("{connection_id}/{connection_id}.jpg")
}

/// Object key for a user-selected file
pub fn file_key(connection_id: &str, original_name: &str) -> String {
    format!("{}/{}", connection_id, sanitize_file_name(original_name))
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Pull the presigned URL out of a presign response body
pub fn extract_presigned_url(body: &serde_json::Value) -> Result<String, UploadError> {
    PRESIGN_URL_FIELDS
        .iter()
        .filter_map(|field| body.get(field))
        .filter_map(|value| value.as_str())
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or(UploadError::MalformedPresign)
}

/// Derive bucket and key from a virtual-hosted presigned URL
/// (`https://{bucket}.{host}/{encoded-key}?...`)
pub fn location_from_url(presigned: &str) -> Result<StorageLocation, UploadError> {
    let invalid = || UploadError::InvalidLocation(presigned.to_string());

    let url = Url::parse(presigned).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?;
    let bucket = host.split('.').next().filter(|b| !b.is_empty()).ok_or_else(invalid)?;

    // `Url` resolves dot segments, which would rewrite keys like `a/../b.jpg`
    let path = raw_path(presigned).ok_or_else(invalid)?;
    let key = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| invalid())?
        .into_owned();
    if key.is_empty() {
        return Err(invalid());
    }

    Ok(StorageLocation {
        bucket: bucket.to_string(),
        key,
    })
}

/// Path of `url` as written, without the leading slash, query or fragment
fn raw_path(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let path = &rest[rest.find('/')?..];
    let end = path.find(|c: char| c == '?' || c == '#').unwrap_or(path.len());
    Some(&path[1..end])
}

/// Read a failing response into an `UploadError::Http`
pub(crate) async fn http_error(stage: Stage, response: reqwest::Response) -> UploadError {
    let status = response.status().as_u16();
    let body = response.text().await.ok().filter(|text| !text.is_empty());
    UploadError::Http {
        stage,
        status,
        body,
    }
}

pub struct UploadClient {
    http: reqwest::Client,
    presign_url: Url,
}

impl UploadClient {
    pub fn new(http: reqwest::Client, presign_url: &str) -> Result<Self, UploadError> {
        let presign_url = Url::parse(presign_url)
            .map_err(|_| UploadError::InvalidEndpoint(presign_url.to_string()))?;
        Ok(Self { http, presign_url })
    }

    /// Build the presign GET URL for an object key
    pub fn presign_request_url(&self, object_key: &str, content_type: Option<&str>) -> Url {
        let file_name = object_key.rsplit('/').next().unwrap_or(object_key);

        let mut url = self.presign_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("fileName", file_name);
            query.append_pair("key", object_key);
            if let Some(content_type) = content_type {
                query.append_pair("contentType", content_type);
            }
        }
        url
    }

    pub async fn request_upload_target(
        &self,
        object_key: &str,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let url = self.presign_request_url(object_key, Some(content_type));
        tracing::debug!("Requesting presigned URL for {}", object_key);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| UploadError::Transport {
                stage: Stage::Presign,
                source,
            })?;

        if !response.status().is_success() {
            return Err(http_error(Stage::Presign, response).await);
        }

        let body: serde_json::Value =
            response.json().await.map_err(|_| UploadError::MalformedPresign)?;
        extract_presigned_url(&body)
    }

    pub async fn upload(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let span = tracing::debug_span!("put_object", size = bytes.len());

        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .instrument(span)
            .await
            .map_err(|source| UploadError::Transport {
                stage: Stage::Upload,
                source,
            })?;

        if !response.status().is_success() {
            return Err(http_error(Stage::Upload, response).await);
        }
        Ok(())
    }
}
