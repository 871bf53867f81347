use super::{CameraProvider, CaptureSource, Facing};
use crate::config::CameraConfig;
use crate::error::CameraError;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    ready: bool,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera =
            Camera::new(index, requested).map_err(|e| CameraError::Access(e.to_string()))?;

        camera
            .open_stream()
            .map_err(|e| CameraError::Access(e.to_string()))?;

        tracing::info!("Webcam initialized successfully");

        Ok(Self {
            camera,
            ready: false,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage, CameraError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| CameraError::Access(format!("failed to capture frame: {e}")))?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::Access(format!("failed to decode frame: {e}")))?;

        self.ready = true;
        Ok(decoded)
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        if !self.ready {
            return None;
        }
        let resolution = self.camera.resolution();
        match (resolution.width(), resolution.height()) {
            (0, _) | (_, 0) => None,
            dims => Some(dims),
        }
    }

    fn stop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", e);
        }
    }
}

/// Maps a facing to a configured device index
pub struct NokhwaProvider {
    config: CameraConfig,
}

impl NokhwaProvider {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn device_for(&self, facing: Facing) -> u32 {
        match facing {
            Facing::Front => self.config.front_device,
            Facing::Back => self.config.back_device,
        }
    }
}

impl CameraProvider for NokhwaProvider {
    fn open(&mut self, facing: Facing) -> Result<Box<dyn CaptureSource>, CameraError> {
        let device = self.device_for(facing);
        let mut capture = WebcamCapture::new(device, self.config.width, self.config.height)?;

        // Warm up so `resolution` reports the negotiated frame size
        if let Err(e) = capture.capture_frame() {
            tracing::debug!("First frame not available yet: {}", e);
        }

        Ok(Box::new(capture))
    }
}
