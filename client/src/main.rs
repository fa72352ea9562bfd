//! `LinguaCall` Client - Main Entry Point
//!
//! Headless call participant: joins the configured room with synthetic
//! media and logs everything the room reports.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use lc_client::media::{StreamManager, SyntheticCapture};
use lc_client::signaling::WebSocketChannel;
use lc_client::translation::NoSpeechCapture;
use lc_client::webrtc::WebRtcPeerFactory;
use lc_client::{Config, RoomCoordinator, RoomEvent};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lc_client=debug".into());
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        room = %config.room_code,
        "Starting LinguaCall client"
    );

    let streams = Arc::new(StreamManager::new(
        Arc::new(SyntheticCapture),
        config.retry_policy(),
    ));
    let channel = Arc::new(WebSocketChannel::connect(
        &config.signaling_url,
        config.reconnect_policy(),
    )?);
    let peers = Arc::new(WebRtcPeerFactory::new(config.ice_servers())?);

    let (mut room, mut events) = RoomCoordinator::new(
        config.room_config(),
        streams,
        channel,
        peers,
        Box::new(NoSpeechCapture),
    );
    room.join().await?;

    let (handle, task) = room.spawn();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Err(e) = handle.leave() {
        warn!("Room already closed: {}", e);
    }
    task.await?;

    Ok(())
}

fn log_event(event: &RoomEvent) {
    match event {
        RoomEvent::MediaFailed { message } => warn!(%message, "Media failure"),
        RoomEvent::PeerDegraded { participant_id } => {
            warn!(remote_id = %participant_id, "Peer connection degraded");
        }
        RoomEvent::SubtitleShown {
            participant_id,
            translated,
            ..
        } => info!(remote_id = %participant_id, %translated, "Caption"),
        other => info!(event = ?other, "Room event"),
    }
}
