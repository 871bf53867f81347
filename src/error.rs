use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Step of the upload cycle an HTTP failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Presign,
    Upload,
    Notify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Presign => "presign request",
            Stage::Upload => "upload",
            Stage::Notify => "job trigger",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera access failed: {0}")]
    Access(String),

    #[error("camera is not ready yet")]
    NotOpen,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("video frame is not ready yet, please wait a moment")]
    FrameNotReady,

    #[error("nothing has been captured yet")]
    NothingCaptured,

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a readable image: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to write {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{stage} failed with HTTP {status}{}", body_suffix(.body))]
    Http {
        stage: Stage,
        status: u16,
        body: Option<String>,
    },

    #[error("{stage} request failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    #[error("presign response has no upload URL field")]
    MalformedPresign,

    #[error("cannot derive a storage location from {0}")]
    InvalidLocation(String),

    #[error("invalid endpoint URL {0}")]
    InvalidEndpoint(String),

    #[error("no connection id yet, wait for the realtime channel to connect")]
    NoConnectionIdentity,

    #[error("nothing to upload")]
    NothingToUpload,

    #[error("an upload is already in progress")]
    InProgress,
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(text) if !text.is_empty() => format!(": {text}"),
        _ => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid realtime URL {0}")]
    InvalidUrl(String),

    #[error("realtime channel is not connected")]
    NotConnected,

    #[error("failed to send realtime message: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("roll an expression first")]
    NotRolled,

    #[error("wait for the expression to be picked")]
    StillSpinning,

    #[error("the capture window has closed, roll again")]
    WindowClosed,

    #[error("the expression game is turned off")]
    Disabled,
}

/// Everything a session action can surface as a user alert
#[derive(Debug, Error)]
pub enum BoothError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Gate(#[from] GateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_includes_status_and_body() {
        let err = UploadError::Http {
            stage: Stage::Upload,
            status: 403,
            body: Some("SignatureDoesNotMatch".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "upload failed with HTTP 403: SignatureDoesNotMatch"
        );
    }

    #[test]
    fn http_error_without_body() {
        let err = UploadError::Http {
            stage: Stage::Notify,
            status: 500,
            body: None,
        };
        assert_eq!(err.to_string(), "job trigger failed with HTTP 500");
    }
}
