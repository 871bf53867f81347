use crate::backend::Backend;
use crate::camera::{CameraController, CameraProvider, Facing};
use crate::capture::{self, CaptureBuffer, CaptureOrigin, PendingFile};
use crate::config::BoothConfig;
use crate::error::{BoothError, CameraError, CaptureError, ChannelError, GateError, UploadError};
use crate::game::{ExpressionGate, GateEvent};
use crate::realtime::{ChannelEvent, ChannelState, InboundKind, MessageLog, RealtimeChannel};
use crate::timer::earliest;
use crate::upload::{self, StorageLocation};
use crate::wait::{UploadWait, WaitEvent, WaitState};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CAPTURE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OpenCamera,
    SwitchCamera,
    StopCamera,
    /// The booth went to the background
    VisibilityHidden,
    Capture,
    Save,
    SelectFiles(Vec<PathBuf>),
    Upload,
    Reset,
    Roll,
    /// Raw text to push over the realtime channel
    Send(String),
    Channel(ChannelEvent),
}

/// Which actions are currently available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub snap: bool,
    pub stop: bool,
    pub switch: bool,
    pub save: bool,
    pub upload: bool,
    pub mirrored: bool,
    pub switch_label: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Alert(String),
    Controls(Controls),
    Preview {
        label: String,
        width: u32,
        height: u32,
    },
    Saved(PathBuf),
    Badge(ChannelState),
    ConnectionId(String),
    Log(Vec<String>),
    Gate(GateEvent),
    Countdown(u64),
    WaitChanged(WaitState),
    Uploaded(Vec<StorageLocation>),
    Result { download_url: String },
}

/// One object of an upload cycle, encoded and keyed
#[derive(Debug, Clone)]
struct Asset {
    key: String,
    bytes: Vec<u8>,
    content_type: String,
}

/// The network half of an upload cycle. It runs apart from the session, so timers and
/// channel traffic keep flowing while requests are in flight.
pub struct UploadJob<B> {
    id: u64,
    backend: Rc<B>,
    assets: Vec<Asset>,
}

/// How an `UploadJob` ended, handed back through `Session::upload_finished`
#[derive(Debug)]
pub struct UploadOutcome {
    id: u64,
    result: Result<Vec<StorageLocation>, BoothError>,
}

impl<B: Backend> UploadJob<B> {
    pub async fn run(self) -> UploadOutcome {
        let result = send_all(&*self.backend, self.assets).await;
        UploadOutcome {
            id: self.id,
            result,
        }
    }
}

/// presign -> PUT for each asset in order, then one job trigger
async fn send_all<B: Backend>(
    backend: &B,
    assets: Vec<Asset>,
) -> Result<Vec<StorageLocation>, BoothError> {
    let mut locations = Vec::with_capacity(assets.len());

    for asset in assets {
        let url = backend.presign(&asset.key, &asset.content_type).await?;
        let location = upload::location_from_url(&url)?;
        backend.put(&url, asset.bytes, &asset.content_type).await?;
        debug!("Stored {}/{}", location.bucket, location.key);
        locations.push(location);
    }

    backend.notify(&locations).await?;
    Ok(locations)
}

/// Owns every piece of mutable booth state. UI input and channel traffic come in as
/// `Event`s and everything the UI should show goes out as `UiEvent`s. Errors never escape
/// `handle`, they become alerts.
pub struct Session<P: CameraProvider, B: Backend> {
    config: BoothConfig,
    camera: CameraController<P>,
    backend: Rc<B>,
    channel: Option<RealtimeChannel>,
    capture: Option<CaptureBuffer>,
    pending_files: Vec<PendingFile>,
    fallback: Option<RgbImage>,
    connection_id: Option<String>,
    log: MessageLog,
    gate: Option<ExpressionGate>,
    wait: UploadWait,
    rng: StdRng,
    last_controls: Option<Controls>,
    upload_seq: u64,
    /// Id of the upload whose outcome is still expected
    in_flight: Option<u64>,
    queued_upload: Option<UploadJob<B>>,
}

impl<P: CameraProvider, B: Backend> Session<P, B> {
    pub fn new(config: BoothConfig, provider: P, backend: B) -> Self {
        Self::with_rng(config, provider, backend, StdRng::from_entropy())
    }

    pub fn with_rng(config: BoothConfig, provider: P, backend: B, rng: StdRng) -> Self {
        let gate = config
            .game
            .enabled
            .then(|| ExpressionGate::new(&config.game));
        let wait = UploadWait::new(config.wait.timeout());

        Self {
            config,
            camera: CameraController::new(provider),
            backend: Rc::new(backend),
            channel: None,
            capture: None,
            pending_files: Vec::new(),
            fallback: None,
            connection_id: None,
            log: MessageLog::default(),
            gate,
            wait,
            rng,
            last_controls: None,
            upload_seq: 0,
            in_flight: None,
            queued_upload: None,
        }
    }

    /// Image captured while no camera is open
    pub fn set_fallback(&mut self, image: RgbImage) {
        self.fallback = Some(image);
    }

    /// Take ownership of the realtime channel; it is closed on teardown
    pub fn attach_channel(&mut self, channel: RealtimeChannel) {
        self.channel = Some(channel);
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn wait_state(&self) -> &WaitState {
        self.wait.state()
    }

    pub fn capture(&self) -> Option<&CaptureBuffer> {
        self.capture.as_ref()
    }

    pub fn pending_files(&self) -> &[PendingFile] {
        &self.pending_files
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn camera_open(&self) -> bool {
        self.camera.is_open()
    }

    pub fn controls(&self) -> Controls {
        let open = self.camera.is_open();
        let has_payload = self.capture.is_some() || !self.pending_files.is_empty();
        Controls {
            snap: open || self.fallback.is_some(),
            stop: open,
            switch: open,
            save: self.capture.is_some(),
            upload: has_payload && self.connection_id.is_some() && self.in_flight.is_none(),
            mirrored: self.camera.mirrored(),
            switch_label: self.camera.switch_label(),
        }
    }

    /// Earliest pending timer across the gate and the upload wait
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.gate.as_ref().and_then(ExpressionGate::deadline),
            self.wait.deadline(),
        ])
    }

    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<UiEvent> {
        let mut ui = Vec::new();

        let result = match event {
            Event::OpenCamera => self.open_camera(self.camera.facing()),
            Event::SwitchCamera => self.switch_camera(),
            Event::StopCamera | Event::VisibilityHidden => {
                self.camera.stop();
                Ok(())
            }
            Event::Capture => self.take_photo(now, &mut ui),
            Event::Save => self.save(&mut ui),
            Event::SelectFiles(paths) => self.select_files(&paths, &mut ui),
            Event::Upload => self.start_upload(now, &mut ui),
            Event::Reset => {
                self.reset(&mut ui);
                Ok(())
            }
            Event::Roll => self.roll(now, &mut ui),
            Event::Send(text) => self.send(text),
            Event::Channel(event) => {
                self.on_channel(event, &mut ui);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("{}", e);
            ui.push(UiEvent::Alert(e.to_string()));
        }

        self.push_controls(&mut ui);
        ui
    }

    /// Fire every timer that has come due by `now`
    pub fn on_timer(&mut self, now: Instant) -> Vec<UiEvent> {
        let mut ui = Vec::new();

        if let Some(gate) = self.gate.as_mut() {
            while gate.deadline().is_some_and(|deadline| deadline <= now) {
                match gate.on_expire(now, &mut self.rng) {
                    Some(event) => ui.push(UiEvent::Gate(event)),
                    None => break,
                }
            }
        }

        while self.wait.deadline().is_some_and(|deadline| deadline <= now) {
            match self.wait.on_expire(now) {
                Some(WaitEvent::Countdown(left)) => ui.push(UiEvent::Countdown(left)),
                Some(WaitEvent::Failed) => ui.push(UiEvent::WaitChanged(WaitState::Failed)),
                Some(WaitEvent::Done { .. }) | None => break,
            }
        }

        self.push_controls(&mut ui);
        ui
    }

    /// The upload started by the last `Event::Upload`, to be run by the caller
    pub fn take_upload(&mut self) -> Option<UploadJob<B>> {
        self.queued_upload.take()
    }

    /// Apply the outcome of an upload job. Outcomes of abandoned uploads are dropped.
    pub fn upload_finished(&mut self, outcome: UploadOutcome) -> Vec<UiEvent> {
        let mut ui = Vec::new();

        if self.in_flight != Some(outcome.id) {
            debug!("Dropping outcome of abandoned upload {}", outcome.id);
            return ui;
        }
        self.in_flight = None;

        match outcome.result {
            Ok(locations) => {
                info!("Uploaded {} object(s)", locations.len());
                self.pending_files.clear();
                ui.push(UiEvent::Uploaded(locations));
            }
            Err(e) => {
                warn!("{}", e);
                ui.push(UiEvent::Alert(e.to_string()));
                // a wait that already timed out keeps showing that
                if *self.wait.state() == WaitState::Pending {
                    self.wait.reset();
                    ui.push(UiEvent::WaitChanged(WaitState::Idle));
                }
            }
        }

        self.push_controls(&mut ui);
        ui
    }

    /// Release the camera, disarm timers, close the channel
    pub async fn teardown(&mut self) {
        self.queued_upload = None;
        self.in_flight = None;
        self.camera.stop();
        self.wait.clear();
        if let Some(gate) = self.gate.as_mut() {
            gate.cancel();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        info!("Session torn down");
    }

    fn push_controls(&mut self, ui: &mut Vec<UiEvent>) {
        let controls = self.controls();
        if self.last_controls != Some(controls) {
            self.last_controls = Some(controls);
            ui.push(UiEvent::Controls(controls));
        }
    }

    fn open_camera(&mut self, facing: Facing) -> Result<(), BoothError> {
        self.camera.open(facing)?;
        Ok(())
    }

    fn switch_camera(&mut self) -> Result<(), BoothError> {
        if !self.camera.is_open() {
            return Err(CameraError::NotOpen.into());
        }
        self.camera.switch()?;
        Ok(())
    }

    /// Current frame plus how to orient it
    fn grab_frame(&mut self) -> Result<(RgbImage, Facing, CaptureOrigin), BoothError> {
        let facing = self.camera.facing();
        if let Some(stream) = self.camera.stream_mut() {
            if stream.resolution().is_none() {
                return Err(CaptureError::FrameNotReady.into());
            }
            let frame = stream.capture_frame()?;
            if frame.width() == 0 || frame.height() == 0 {
                return Err(CaptureError::FrameNotReady.into());
            }
            return Ok((frame, facing, CaptureOrigin::Live));
        }

        match &self.fallback {
            Some(image) => Ok((image.clone(), Facing::Back, CaptureOrigin::Fallback)),
            None => Err(CameraError::NotOpen.into()),
        }
    }

    fn take_photo(&mut self, now: Instant, ui: &mut Vec<UiEvent>) -> Result<(), BoothError> {
        let (frame, facing, origin) = self.grab_frame()?;

        if let Some(gate) = self.gate.as_mut() {
            let expression = gate.try_capture(now)?;
            ui.push(UiEvent::Gate(GateEvent::Captured(expression)));
        }

        let image = capture::render_frame(&frame, facing, self.config.capture.max_dimension);
        let buffer = CaptureBuffer { image, origin };
        let (width, height) = buffer.dimensions();
        debug!("Captured {}x{} ({:?})", width, height, buffer.origin);

        self.capture = Some(buffer);
        self.pending_files.clear();
        ui.push(UiEvent::Preview {
            label: "capture".to_string(),
            width,
            height,
        });
        Ok(())
    }

    fn save(&mut self, ui: &mut Vec<UiEvent>) -> Result<(), BoothError> {
        let buffer = self.capture.as_ref().ok_or(CaptureError::NothingCaptured)?;
        let path = capture::save_capture(
            buffer,
            &self.config.capture.output_dir,
            self.config.capture.jpeg_quality,
            chrono::Utc::now(),
        )?;
        ui.push(UiEvent::Saved(path));
        Ok(())
    }

    fn select_files(&mut self, paths: &[PathBuf], ui: &mut Vec<UiEvent>) -> Result<(), BoothError> {
        let files = capture::load_selection(paths)?;
        if files.is_empty() {
            return Ok(());
        }

        for file in &files {
            ui.push(UiEvent::Preview {
                label: file.name.clone(),
                width: file.dimensions.0,
                height: file.dimensions.1,
            });
        }

        info!("{} file(s) selected for upload", files.len());
        self.pending_files = files;
        self.capture = None;
        Ok(())
    }

    fn start_upload(&mut self, now: Instant, ui: &mut Vec<UiEvent>) -> Result<(), BoothError> {
        if self.in_flight.is_some() {
            return Err(UploadError::InProgress.into());
        }
        let connection_id = self
            .connection_id
            .clone()
            .ok_or(UploadError::NoConnectionIdentity)?;
        let assets = self.collect_assets(&connection_id)?;

        self.upload_seq += 1;
        let id = self.upload_seq;
        info!("Upload {} started with {} object(s)", id, assets.len());
        self.in_flight = Some(id);
        self.queued_upload = Some(UploadJob {
            id,
            backend: Rc::clone(&self.backend),
            assets,
        });

        if let WaitEvent::Countdown(left) = self.wait.start(now) {
            ui.push(UiEvent::WaitChanged(WaitState::Pending));
            ui.push(UiEvent::Countdown(left));
        }
        Ok(())
    }

    /// Picked files win over the capture buffer
    fn collect_assets(&self, connection_id: &str) -> Result<Vec<Asset>, BoothError> {
        if !self.pending_files.is_empty() {
            let assets = self
                .pending_files
                .iter()
                .map(|file| {
                    let key = upload::file_key(connection_id, &file.name);
                    debug!("Queued {} as {}", file.path.display(), key);
                    Asset {
                        key,
                        bytes: file.bytes.clone(),
                        content_type: file.content_type.clone(),
                    }
                })
                .collect();
            return Ok(assets);
        }

        let buffer = self.capture.as_ref().ok_or(UploadError::NothingToUpload)?;
        let bytes = capture::encode_jpeg(&buffer.image, self.config.capture.jpeg_quality)?;
        Ok(vec![Asset {
            key: upload::capture_key(connection_id),
            bytes,
            content_type: CAPTURE_CONTENT_TYPE.to_string(),
        }])
    }

    fn reset(&mut self, ui: &mut Vec<UiEvent>) {
        self.queued_upload = None;
        self.in_flight = None;
        self.wait.reset();
        self.pending_files.clear();
        self.capture = None;
        if let Some(gate) = self.gate.as_mut() {
            gate.cancel();
        }
        ui.push(UiEvent::WaitChanged(WaitState::Idle));
    }

    fn roll(&mut self, now: Instant, ui: &mut Vec<UiEvent>) -> Result<(), BoothError> {
        let gate = self.gate.as_mut().ok_or(GateError::Disabled)?;
        if let Some(event) = gate.start(now, &mut self.rng) {
            ui.push(UiEvent::Gate(event));
        }
        Ok(())
    }

    fn send(&mut self, text: String) -> Result<(), BoothError> {
        let channel = self.channel.as_ref().ok_or(ChannelError::NotConnected)?;
        channel.send(text)?;
        Ok(())
    }

    fn on_channel(&mut self, event: ChannelEvent, ui: &mut Vec<UiEvent>) {
        match event {
            ChannelEvent::State(state) => ui.push(UiEvent::Badge(state)),
            ChannelEvent::SendFailed(reason) => {
                warn!("Realtime send failed: {}", reason);
                ui.push(UiEvent::Alert(ChannelError::Send(reason).to_string()));
            }
            ChannelEvent::Message(message) => {
                if let Some(id) = &message.connection_id {
                    if self.connection_id.as_deref() != Some(id.as_str()) {
                        info!("Connection id: {}", id);
                    }
                    self.connection_id = Some(id.clone());
                    ui.push(UiEvent::ConnectionId(id.clone()));
                }

                self.log.push(message.raw.clone());
                ui.push(UiEvent::Log(
                    self.log.entries().map(str::to_string).collect(),
                ));

                if let InboundKind::ImageComplete { download_url } = message.kind {
                    if let Some(WaitEvent::Done { download_url }) =
                        self.wait.complete(&download_url)
                    {
                        ui.push(UiEvent::WaitChanged(self.wait.state().clone()));
                        ui.push(UiEvent::Result { download_url });
                    }
                }
            }
        }
    }
}
