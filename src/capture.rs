use crate::camera::Facing;
use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};

/// Where the buffered image came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOrigin {
    Live,
    /// Local test image used while no camera is open
    Fallback,
}

/// The single in-memory capture surface
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    pub image: RgbImage,
    pub origin: CaptureOrigin,
}

impl CaptureBuffer {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A selected file waiting for upload
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub path: PathBuf,
    /// Original file name, unsanitized
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub dimensions: (u32, u32),
}

/// Scale `(width, height)` so neither side exceeds `max_dimension`, keeping aspect ratio.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let larger = width.max(height);
    if larger <= max_dimension || larger == 0 {
        return (width, height);
    }

    let scale = f64::from(max_dimension) / f64::from(larger);
    let scaled = |side: u32| -> u32 {
        let value = (f64::from(side) * scale).round() as u32;
        value.clamp(1, max_dimension)
    };

    if width >= height {
        (max_dimension, scaled(height))
    } else {
        (scaled(width), max_dimension)
    }
}

/// Resize a frame into a fresh buffer, mirroring it for the front camera so the saved
/// image matches the preview
pub fn render_frame(frame: &RgbImage, facing: Facing, max_dimension: u32) -> RgbImage {
    let _span = tracing::debug_span!("render_frame").entered();

    let (width, height) = frame.dimensions();
    let (target_w, target_h) = target_dimensions(width, height, max_dimension);

    let mut canvas = if (target_w, target_h) != (width, height) {
        imageops::resize(frame, target_w, target_h, imageops::FilterType::Lanczos3)
    } else {
        frame.clone()
    };

    if facing == Facing::Front {
        imageops::flip_horizontal_in_place(&mut canvas);
    }

    canvas
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    image.write_with_encoder(encoder)?;
    Ok(bytes)
}

/// Photo file name for a capture taken at `at`
pub fn photo_file_name(at: DateTime<Utc>) -> String {
    format!("photo_{}.jpg", at.format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

/// Write the buffer as a JPEG into `dir`, returning the written path
pub fn save_capture(
    buffer: &CaptureBuffer,
    dir: &Path,
    quality: u8,
    at: DateTime<Utc>,
) -> Result<PathBuf, CaptureError> {
    let bytes = encode_jpeg(&buffer.image, quality)?;
    let path = dir.join(photo_file_name(at));
    std::fs::write(&path, bytes).map_err(|source| CaptureError::Save {
        path: path.clone(),
        source,
    })?;

    tracing::info!("Saved capture to {}", path.display());
    Ok(path)
}

/// Load the local fallback image used when there is no camera
pub fn load_fallback(path: &Path) -> Result<RgbImage, CaptureError> {
    let image = image::open(path).map_err(|source| CaptureError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Read and decode each selected file, in order
pub fn load_selection(paths: &[PathBuf]) -> Result<Vec<PendingFile>, CaptureError> {
    paths.iter().map(|path| load_file(path)).collect()
}

fn load_file(path: &Path) -> Result<PendingFile, CaptureError> {
    let bytes = std::fs::read(path).map_err(|source| CaptureError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let decoded = image::load_from_memory(&bytes).map_err(|source| CaptureError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let content_type = mime_guess::from_path(path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    tracing::debug!(
        "Selected {} ({}, {}x{})",
        name,
        content_type,
        decoded.width(),
        decoded.height()
    );

    Ok(PendingFile {
        path: path.to_path_buf(),
        name,
        bytes,
        content_type,
        dimensions: (decoded.width(), decoded.height()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn small_frames_are_not_scaled() {
        assert_eq!(target_dimensions(640, 480, 1280), (640, 480));
        assert_eq!(target_dimensions(1280, 720, 1280), (1280, 720));
    }

    #[test]
    fn landscape_and_portrait_are_bounded() {
        assert_eq!(target_dimensions(1920, 1080, 1280), (1280, 720));
        assert_eq!(target_dimensions(1080, 1920, 1280), (720, 1280));
        assert_eq!(target_dimensions(4000, 4000, 1000), (1000, 1000));
    }

    #[test]
    fn aspect_ratio_is_preserved_within_a_pixel() {
        for &(w, h) in &[(3024, 4032), (1921, 1079), (5000, 3), (7, 4999), (1366, 768)] {
            for &max in &[1, 64, 500, 1280] {
                let (tw, th) = target_dimensions(w, h, max);
                assert!(tw <= max && th <= max, "{w}x{h} -> {tw}x{th} > {max}");
                assert!(tw >= 1 && th >= 1);

                let expected_h = f64::from(tw) * f64::from(h) / f64::from(w);
                let expected_w = f64::from(th) * f64::from(w) / f64::from(h);
                if w >= h {
                    assert!((f64::from(th) - expected_h).abs() <= 1.0 || th == 1);
                } else {
                    assert!((f64::from(tw) - expected_w).abs() <= 1.0 || tw == 1);
                }
            }
        }
    }

    #[test]
    fn front_capture_is_mirror_of_back_capture() {
        let frame = gradient(1600, 900);

        let back = render_frame(&frame, Facing::Back, 800);
        let front = render_frame(&frame, Facing::Front, 800);

        assert_eq!(back.dimensions(), (800, 450));
        assert_eq!(front, imageops::flip_horizontal(&back));
        assert_ne!(front, back);
    }

    #[test]
    fn render_does_not_blend_with_previous_capture() {
        let first = render_frame(&RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])), Facing::Back, 10);
        let second = render_frame(&RgbImage::from_pixel(10, 10, Rgb([0, 0, 255])), Facing::Back, 10);

        assert_ne!(first, second);
        assert!(second.pixels().all(|p| *p == Rgb([0, 0, 255])));
    }

    #[test]
    fn photo_file_name_has_no_colons() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 9).unwrap();
        let name = photo_file_name(at);
        assert_eq!(name, "photo_2026-03-01T14-05-09-000Z.jpg");
    }

    #[test]
    fn save_writes_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer {
            image: gradient(32, 24),
            origin: CaptureOrigin::Live,
        };

        let path = save_capture(&buffer, dir.path(), 90, Utc::now()).unwrap();
        let reread = image::open(&path).unwrap();
        assert_eq!((reread.width(), reread.height()), (32, 24));
    }

    #[test]
    fn selection_keeps_order_and_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("b side.png");
        let second = dir.path().join("a.jpg");
        gradient(8, 6).save(&first).unwrap();
        gradient(4, 3).save(&second).unwrap();

        let files = load_selection(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "b side.png");
        assert_eq!(files[0].content_type, "image/png");
        assert_eq!(files[0].dimensions, (8, 6));
        assert_eq!(files[1].content_type, "image/jpeg");
    }

    #[test]
    fn selection_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.jpg");
        let not_image = dir.path().join("notes.png");
        std::fs::write(&not_image, b"hello").unwrap();

        assert!(matches!(
            load_selection(&[missing]),
            Err(CaptureError::FileRead { .. })
        ));
        assert!(matches!(
            load_selection(&[not_image]),
            Err(CaptureError::Decode { .. })
        ));
    }
}
