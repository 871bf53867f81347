mod webcam;

pub use webcam::{NokhwaProvider, WebcamCapture};

use crate::error::CameraError;
use image::RgbImage;

/// Which way the active camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    /// User-facing, shown mirrored
    Front,
    #[default]
    Back,
}

impl Facing {
    pub fn toggle(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

/// An open camera stream
pub trait CaptureSource {
    /// Grab the current frame
    fn capture_frame(&mut self) -> Result<RgbImage, CameraError>;

    /// Frame dimensions, `None` until the first frame has arrived
    fn resolution(&self) -> Option<(u32, u32)>;

    /// Release the device
    fn stop(&mut self);
}

/// Opens camera streams for a requested facing
pub trait CameraProvider {
    fn open(&mut self, facing: Facing) -> Result<Box<dyn CaptureSource>, CameraError>;
}

/// Single owner of the camera stream
pub struct CameraController<P: CameraProvider> {
    provider: P,
    stream: Option<Box<dyn CaptureSource>>,
    facing: Facing,
}

impl<P: CameraProvider> CameraController<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            stream: None,
            facing: Facing::default(),
        }
    }

    /// Open the camera with the given facing, replacing any stream already open.
    ///
    /// On failure the controller is left closed.
    pub fn open(&mut self, facing: Facing) -> Result<(), CameraError> {
        self.facing = facing;
        self.stop();

        match self.provider.open(facing) {
            Ok(stream) => {
                tracing::info!("Camera opened ({:?})", facing);
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Camera open failed: {}", e);
                Err(e)
            }
        }
    }

    /// Release the stream. Does nothing when already stopped.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!("Camera stopped");
        }
    }

    /// Flip facing and reopen
    pub fn switch(&mut self) -> Result<(), CameraError> {
        let next = self.facing.toggle();
        self.open(next)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Preview is mirrored for the front camera
    pub fn mirrored(&self) -> bool {
        self.is_open() && self.facing == Facing::Front
    }

    pub fn switch_label(&self) -> &'static str {
        match self.facing {
            Facing::Back => "switch to front",
            Facing::Front => "switch to back",
        }
    }

    pub fn stream_mut(&mut self) -> Option<&mut (dyn CaptureSource + 'static)> {
        self.stream.as_deref_mut()
    }
}

impl<P: CameraProvider> Drop for CameraController<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Frames handed out by `FakeProvider`
    pub struct FakeStream {
        pub frame: Option<RgbImage>,
        pub stopped: Rc<RefCell<u32>>,
    }

    impl CaptureSource for FakeStream {
        fn capture_frame(&mut self) -> Result<RgbImage, CameraError> {
            self.frame.clone().ok_or(CameraError::NotOpen)
        }

        fn resolution(&self) -> Option<(u32, u32)> {
            self.frame.as_ref().map(|f| f.dimensions())
        }

        fn stop(&mut self) {
            *self.stopped.borrow_mut() += 1;
        }
    }

    #[derive(Default)]
    pub struct FakeProvider {
        pub frame: Option<RgbImage>,
        pub deny: bool,
        pub opened: Vec<Facing>,
        pub stopped: Rc<RefCell<u32>>,
    }

    impl FakeProvider {
        pub fn with_frame(frame: RgbImage) -> Self {
            Self {
                frame: Some(frame),
                ..Self::default()
            }
        }
    }

    impl CameraProvider for FakeProvider {
        fn open(&mut self, facing: Facing) -> Result<Box<dyn CaptureSource>, CameraError> {
            if self.deny {
                return Err(CameraError::Access("permission denied".to_string()));
            }
            self.opened.push(facing);
            Ok(Box::new(FakeStream {
                frame: self.frame.clone(),
                stopped: self.stopped.clone(),
            }))
        }
    }
}
