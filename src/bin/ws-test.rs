use anyhow::{anyhow, Context, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use std::process::ExitCode;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use url::Url;

const DEFAULT_URL: &str = "ws://localhost:3001";

/// Connect to a realtime endpoint, optionally send one payload, print what comes back
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL to connect to
    #[arg(short, long, env = "WS_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Text to send once connected (nothing is sent by default)
    #[arg(
        short,
        long,
        visible_alias = "data",
        alias = "payload",
        short_alias = 'd',
        env = "WS_PAYLOAD"
    )]
    message: Option<String>,

    /// Parse the message as JSON and send it re-serialized
    #[arg(long)]
    json: bool,

    /// Close the connection after this many milliseconds
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    close: u64,

    /// Keep the connection open until the server closes it
    #[arg(long)]
    no_close: bool,

    /// Handshake timeout in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    timeout: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

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

    ExitCode::from(exit_status(&run(args).await))
}

/// 0 once the connection has closed, 1 for anything that stopped it from working
fn exit_status(result: &Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

fn endpoint(raw: &str) -> Result<Url> {
    Url::parse(raw)
        .ok()
        .filter(|url| matches!(url.scheme(), "ws" | "wss"))
        .ok_or_else(|| anyhow!("pass a valid ws:// or wss:// URL, got '{}'", raw))
}

async fn run(args: Args) -> Result<()> {
    let url = endpoint(&args.url)?;

    info!("Connecting to {} (handshake timeout {}ms)", url, args.timeout);

    let (socket, _response) = tokio::time::timeout(
        Duration::from_millis(args.timeout),
        connect_async(url.as_str()),
    )
    .await
    .context("WebSocket handshake timed out")?
    .context("WebSocket handshake failed")?;

    info!("Connected");
    let (mut write, mut read) = socket.split();

    if let Some(raw) = &args.message {
        let payload = if args.json {
            match normalize_json(raw) {
                Ok(json) => json,
                Err(e) => {
                    warn!("--json given but the message is not JSON ({}), sending it as is", e);
                    raw.clone()
                }
            }
        } else {
            raw.clone()
        };

        info!("Sending payload: {}", payload);
        write
            .send(Message::text(payload))
            .await
            .context("Failed to send payload")?;
    }

    let auto_close = (!args.no_close).then(|| Duration::from_millis(args.close));
    let close_timer = async move {
        match auto_close {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(close_timer);
    let mut closing = false;

    loop {
        tokio::select! {
            () = &mut close_timer, if !closing => {
                info!("Auto closing after {}ms", args.close);
                closing = true;
                write
                    .send(Message::Close(None))
                    .await
                    .context("Failed to send close frame")?;
            }

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => info!("Message: {}", text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    info!("Message: {}", String::from_utf8_lossy(&data));
                }
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) => info!("Closed: code {} reason '{}'", frame.code, frame.reason),
                        None => info!("Closed without a close frame"),
                    }
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("WebSocket error"),
                None => {
                    info!("Connection closed");
                    return Ok(());
                }
            },
        }
    }
}

/// Re-serialize `raw` as compact JSON, keeping key order
fn normalize_json(raw: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_compacted_in_order() {
        assert_eq!(
            normalize_json(r#"{ "action": "ping",  "n": [1, 2] }"#).unwrap(),
            r#"{"action":"ping","n":[1,2]}"#
        );
        assert!(normalize_json("not json").is_err());
    }

    #[test]
    fn payload_aliases_parse() {
        let args = Args::try_parse_from(["ws-test", "-d", "hi", "--no-close"]).unwrap();
        assert_eq!(args.message.as_deref(), Some("hi"));
        assert!(args.no_close);

        let args = Args::try_parse_from(["ws-test", "--payload", "x", "--close", "250"]).unwrap();
        assert_eq!(args.message.as_deref(), Some("x"));
        assert_eq!(args.close, 250);
        assert_eq!(args.timeout, 5_000);
    }

    #[test]
    fn only_websocket_schemes_are_endpoints() {
        assert!(endpoint("ws://localhost:3001").is_ok());
        assert!(endpoint("wss://example.com/dev").is_ok());
        assert!(endpoint("http://example.com").is_err());
        assert!(endpoint("not a url").is_err());
    }

    #[tokio::test]
    async fn invalid_url_exits_with_failure() {
        for url in ["http://x", "not a url"] {
            let args = Args::try_parse_from(["ws-test", "-u", url]).unwrap();
            let result = run(args).await;

            let err = result.as_ref().unwrap_err();
            assert!(err.to_string().contains("ws://"), "{err}");
            assert_eq!(exit_status(&result), 1);
        }
        assert_eq!(exit_status(&Ok(())), 0);
    }
}
