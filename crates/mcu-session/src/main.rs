//! MCU Session Replay
//!
//! Drives a meeting session against a dry-run media engine. Engine events are
//! read from stdin as JSON lines (see [`mcu_session::messages::EngineEvent`])
//! and every command the session issues is logged instead of executed.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (JSON when `MCU_LOG_JSON=true`)
//! 3. Start the session with the dry-run engine
//! 4. Replay stdin until EOF or Ctrl+C
//! 5. Shut the session down and wait for teardown

#![warn(clippy::pedantic)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common::engine::{
    MediaEngine, NetworkMonitor, PublishParams, SubscribeParams, UnsubscribeFlags,
};
use common::error::Result as EngineResult;
use common::types::{ChannelId, NetworkStatus, ParticipantId, RoomId, StreamType, SurfaceHandle};
use mcu_session::messages::EngineEvent;
use mcu_session::{Config, MeetingSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Surface handle the dry-run engine renders to.
const REPLAY_SURFACE: SurfaceHandle = SurfaceHandle(1);

/// Engine that accepts every command and logs it.
#[derive(Debug, Default)]
struct DryRunEngine {
    next_channel: AtomicU32,
}

#[async_trait]
impl MediaEngine for DryRunEngine {
    async fn create_pull_channel(&self) -> EngineResult<ChannelId> {
        let n = self.next_channel.fetch_add(1, Ordering::Relaxed) + 1;
        let channel_id = ChannelId::new(format!("pull-{n}"));
        info!(target: "mcu.replay.engine", channel_id = %channel_id, "create_pull_channel");
        Ok(channel_id)
    }

    async fn destroy_channel(&self, channel_id: &ChannelId) -> EngineResult<()> {
        info!(target: "mcu.replay.engine", channel_id = %channel_id, "destroy_channel");
        Ok(())
    }

    async fn start_publish(&self, params: PublishParams) -> EngineResult<()> {
        info!(
            target: "mcu.replay.engine",
            stream_type = %params.stream_type,
            audio = ?params.audio,
            video = ?params.video,
            "start_publish"
        );
        Ok(())
    }

    async fn stop_publish(
        &self,
        _account: &ParticipantId,
        _room_id: &RoomId,
        stream_type: StreamType,
    ) -> EngineResult<()> {
        info!(target: "mcu.replay.engine", stream_type = %stream_type, "stop_publish");
        Ok(())
    }

    async fn subscribe_stream(
        &self,
        channel_id: &ChannelId,
        _room_id: &RoomId,
        params: SubscribeParams,
    ) -> EngineResult<()> {
        info!(
            target: "mcu.replay.engine",
            channel_id = %channel_id,
            account = %params.account,
            stream_type = %params.stream_type,
            video = params.video,
            audio = params.audio,
            "subscribe_stream"
        );
        Ok(())
    }

    async fn unsubscribe_stream(
        &self,
        channel_id: &ChannelId,
        account: &ParticipantId,
        _room_id: &RoomId,
        stream_type: StreamType,
        flags: UnsubscribeFlags,
    ) -> EngineResult<()> {
        info!(
            target: "mcu.replay.engine",
            channel_id = %channel_id,
            account = %account,
            stream_type = %stream_type,
            full_screen = flags.full_screen,
            "unsubscribe_stream"
        );
        Ok(())
    }

    async fn add_canvas(
        &self,
        account: Option<&ParticipantId>,
        _room_id: &RoomId,
        stream_type: StreamType,
        surface: SurfaceHandle,
    ) -> EngineResult<()> {
        info!(
            target: "mcu.replay.engine",
            account = account.map_or("<composite>", ParticipantId::as_str),
            stream_type = %stream_type,
            surface = surface.0,
            "add_canvas"
        );
        Ok(())
    }

    async fn remove_canvas(&self, surface: SurfaceHandle) -> EngineResult<()> {
        debug!(target: "mcu.replay.engine", surface = surface.0, "remove_canvas");
        Ok(())
    }

    async fn add_preview(&self, surface: SurfaceHandle) -> EngineResult<()> {
        info!(target: "mcu.replay.engine", surface = surface.0, "add_preview");
        Ok(())
    }

    async fn is_stream_pulled(
        &self,
        _channel_id: &ChannelId,
        _room_id: &RoomId,
        _account: &ParticipantId,
        _stream_type: StreamType,
    ) -> EngineResult<bool> {
        Ok(false)
    }
}

/// Network status fixed for the whole replay.
struct StaticNetwork(NetworkStatus);

impl StaticNetwork {
    fn from_env() -> Self {
        let status = match std::env::var("MCU_REPLAY_NETWORK").as_deref() {
            Ok("cellular") => NetworkStatus::Cellular,
            Ok("unavailable") => NetworkStatus::Unavailable,
            _ => NetworkStatus::Wifi,
        };
        Self(status)
    }
}

impl NetworkMonitor for StaticNetwork {
    fn status(&self) -> NetworkStatus {
        self.0
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_filter.as_str().into());
    let json = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    let network = StaticNetwork::from_env();
    info!(
        session_id = %config.session_id,
        network = network.0.as_str(),
        "Starting MCU session replay"
    );

    let (handle, task) = MeetingSession::start(
        &config,
        config.identity(),
        REPLAY_SURFACE,
        Arc::new(DryRunEngine::default()),
        Arc::new(network),
    )
    .await
    .context("Session setup failed")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut replayed = 0u64;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping replay");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EngineEvent>(&line) {
                    Ok(event) => {
                        handle.notify(event).await?;
                        replayed += 1;
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed event line"),
                }
            }
        }
    }

    handle.ping().await?;
    handle.shutdown();
    task.await.context("Session task failed")?;

    info!(events = replayed, "MCU session replay finished");
    Ok(())
}
