use anyhow::{Context, Result};
use clap::Parser;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use photobooth::backend::HttpBackend;
use photobooth::camera::NokhwaProvider;
use photobooth::capture;
use photobooth::command::{self, Command, HELP};
use photobooth::game::GateEvent;
use photobooth::realtime::{ChannelState, RealtimeChannel};
use photobooth::session::{Controls, UploadOutcome};
use photobooth::timer::sleep_until;
use photobooth::wait::WaitState;
use photobooth::{BoothConfig, Event, Session, UiEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Presign endpoint
    #[arg(long, env = "PHOTOBOOTH_PRESIGN_URL")]
    presign_url: Option<String>,

    /// Job trigger endpoint
    #[arg(long, env = "PHOTOBOOTH_JOB_URL")]
    job_url: Option<String>,

    /// Realtime WebSocket endpoint
    #[arg(long, env = "WS_URL")]
    ws_url: Option<String>,

    /// Device index of the front camera
    #[arg(long)]
    front_device: Option<u32>,

    /// Device index of the back camera
    #[arg(long)]
    back_device: Option<u32>,

    /// Largest side of a captured photo in pixels
    #[arg(long)]
    max_dimension: Option<u32>,

    /// Image to capture when no camera is open
    #[arg(long)]
    fallback_image: Option<PathBuf>,

    /// Directory for saved photos
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Skip the expression game, capture any time
    #[arg(long)]
    no_game: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> Result<BoothConfig> {
        let mut config = match &self.config {
            Some(path) => BoothConfig::load(path)?,
            None => BoothConfig::default(),
        };

        if let Some(url) = self.presign_url {
            config.presign_url = url;
        }
        if let Some(url) = self.job_url {
            config.job_url = url;
        }
        if let Some(url) = self.ws_url {
            config.ws_url = url;
        }
        if let Some(device) = self.front_device {
            config.camera.front_device = device;
        }
        if let Some(device) = self.back_device {
            config.camera.back_device = device;
        }
        if let Some(max) = self.max_dimension {
            config.capture.max_dimension = max;
        }
        if let Some(path) = self.fallback_image {
            config.capture.fallback_image = Some(path);
        }
        if let Some(dir) = self.output_dir {
            config.capture.output_dir = dir;
        }
        if self.no_game {
            config.game.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let _ =
        rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    let config = args.into_config().context("Invalid configuration")?;

    tracing::info!("Photobooth starting");
    tracing::info!("Presign: {}", config.presign_url);
    tracing::info!("Jobs: {}", config.job_url);
    tracing::info!("Realtime: {}", config.ws_url);

    let backend = HttpBackend::new(&config.presign_url, &config.job_url)
        .context("Failed to set up upload backend")?;
    let provider = NokhwaProvider::new(config.camera.clone());

    let fallback = match &config.capture.fallback_image {
        Some(path) => Some(
            capture::load_fallback(path)
                .with_context(|| format!("Failed to load fallback image {}", path.display()))?,
        ),
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel(64);
    let channel = RealtimeChannel::connect(&config.ws_url, events_tx)
        .context("Failed to start realtime channel")?;

    let mut session = Session::new(config, provider, backend);
    if let Some(image) = fallback {
        session.set_fallback(image);
    }
    session.attach_channel(channel);

    println!("{HELP}");
    run(&mut session, events_rx).await?;

    session.teardown().await;
    tracing::info!("Photobooth stopped");
    Ok(())
}

async fn run(
    session: &mut Session<NokhwaProvider, HttpBackend>,
    mut events_rx: mpsc::Receiver<photobooth::realtime::ChannelEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // An abandoned upload still runs to the end; its outcome is then dropped
    let mut uploads: FuturesUnordered<LocalBoxFuture<'static, UploadOutcome>> =
        FuturesUnordered::new();

    loop {
        let deadline = session.next_deadline();

        let ui = tokio::select! {
            biased;

            Some(event) = events_rx.recv() => {
                session.handle(Event::Channel(event), Instant::now())
            }

            Some(outcome) = uploads.next() => session.upload_finished(outcome),

            () = sleep_until(deadline) => session.on_timer(Instant::now()),

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match command::parse(&line) {
                    Ok(Command::Event(event)) => session.handle(event, Instant::now()),
                    Ok(Command::ShowLog) => {
                        for (i, entry) in session.log().entries().enumerate() {
                            println!("  {:>2}. {}", i + 1, entry);
                        }
                        continue;
                    }
                    Ok(Command::Help) => {
                        println!("{HELP}");
                        continue;
                    }
                    Ok(Command::Quit) => break,
                    Err(message) => {
                        if !message.is_empty() {
                            println!("{message}");
                        }
                        continue;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        };

        for event in &ui {
            render(event);
        }

        // Runs alongside the loop so timers and channel traffic keep flowing
        if let Some(job) = session.take_upload() {
            uploads.push(job.run().boxed_local());
        }
    }

    Ok(())
}

fn render(event: &UiEvent) {
    match event {
        UiEvent::Alert(message) => println!("[!] {message}"),
        UiEvent::Controls(controls) => println!("[controls] {}", describe_controls(controls)),
        UiEvent::Preview {
            label,
            width,
            height,
        } => println!("[preview] {label} {width}x{height}"),
        UiEvent::Saved(path) => println!("[saved] {}", path.display()),
        UiEvent::Badge(state) => {
            let badge = match state {
                ChannelState::Disconnected => "disconnected",
                ChannelState::Connecting => "connecting",
                ChannelState::Connected => "connected",
            };
            println!("[realtime] {badge}");
        }
        UiEvent::ConnectionId(id) => println!("[realtime] connection id {id}"),
        UiEvent::Log(entries) => {
            if let Some(latest) = entries.first() {
                println!("[message] {latest}");
            }
        }
        UiEvent::Gate(event) => match event {
            GateEvent::Spinning(expression) => print!("\r[roll] {}  ", expression.icon),
            GateEvent::Selected(expression) => {
                println!("\r[roll] {} {}!", expression.icon, expression.label);
            }
            GateEvent::WindowOpened {
                expression,
                seconds,
            } => println!(
                "[roll] make a {} face, snap within {}s",
                expression.label, seconds
            ),
            GateEvent::Countdown(left) => println!("[roll] {left}s"),
            GateEvent::TimedOut => println!("[roll] too slow, roll again"),
            GateEvent::Captured(expression) => println!("[roll] got your {} face", expression.label),
        },
        UiEvent::Countdown(left) => {
            if *left % 10 == 0 || *left <= 5 {
                println!("[waiting] {left}s");
            }
        }
        UiEvent::WaitChanged(state) => match state {
            WaitState::Idle => {}
            WaitState::Pending => println!("[waiting] uploading..."),
            WaitState::Done { .. } => println!("[done]"),
            WaitState::Failed => println!("[failed] no result arrived in time"),
        },
        UiEvent::Uploaded(locations) => {
            for location in locations {
                println!("[uploaded] s3://{}/{}", location.bucket, location.key);
            }
        }
        UiEvent::Result { download_url } => println!("[result] {download_url}"),
    }
}

fn describe_controls(controls: &Controls) -> String {
    let flag = |name: &str, on: bool| if on { name.to_string() } else { format!("-{name}") };
    format!(
        "{} {} {} {} {} ({}{})",
        flag("snap", controls.snap),
        flag("stop", controls.stop),
        flag("switch", controls.switch),
        flag("save", controls.save),
        flag("upload", controls.upload),
        controls.switch_label,
        if controls.mirrored { ", mirrored" } else { "" }
    )
}
