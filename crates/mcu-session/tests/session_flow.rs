//! Integration tests for the session reactor.
//!
//! Drives a full `MeetingSession` through the handle with a mock engine and
//! paused time: channel lifecycle, reconnection timing, first-frame
//! arbitration and the layout/microphone projections.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use common::engine::MediaEngine;
use common::types::{ChannelId, DeviceState, StreamInfo, StreamType};
use mcu_session::layout::PixelRect;
use mcu_session::messages::EngineEvent;
use mcu_session::render::RenderTarget;
use mcu_session::state::{ChannelState, PublishStreamState, PullStreamState};
use mcu_session::{Config, MeetingSession, SessionError, SessionHandle};
use mcu_test_utils::{
    pull_channel, publish_channel, EngineCall, MockEngine, MockNetwork, TEST_ACCOUNT, TEST_ROOM,
    TEST_SURFACE,
};
use tokio::task::JoinHandle;

// ============================================================================
// Helpers
// ============================================================================

async fn start_session(
    engine: MockEngine,
    network: MockNetwork,
) -> (SessionHandle, Arc<MockEngine>, JoinHandle<()>) {
    let engine = Arc::new(engine);
    let config = Config::new(TEST_ROOM, TEST_ACCOUNT);
    let (handle, task) = MeetingSession::start(
        &config,
        config.identity(),
        TEST_SURFACE,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::new(network),
    )
    .await
    .expect("session starts");
    (handle, engine, task)
}

async fn notify_state(handle: &SessionHandle, channel_id: ChannelId, state: ChannelState) {
    handle
        .notify(EngineEvent::channel_state(channel_id, state))
        .await
        .unwrap();
    handle.ping().await.unwrap();
}

/// Let spawned tasks run without crossing any session timer.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================================================
// Startup and teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_startup_sequence() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    let calls = engine.calls();
    assert_eq!(calls[0], EngineCall::RemoveCanvas(TEST_SURFACE));
    assert_eq!(calls[1], EngineCall::AddPreview(TEST_SURFACE));
    assert!(matches!(calls[2], EngineCall::StartPublish(_)));
    assert_eq!(calls[3], EngineCall::CreatePullChannel);

    assert_eq!(handle.publish_state(), PublishStreamState::Connecting);
    assert_eq!(handle.pull_state(), PullStreamState::Creating);
    assert_eq!(handle.render_target(), RenderTarget::SelfPreview);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_on_empty_room() {
    let engine = Arc::new(MockEngine::accepting());
    let config = Config::new("", TEST_ACCOUNT);

    let result = MeetingSession::start(
        &config,
        config.identity(),
        TEST_SURFACE,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::new(MockNetwork::wifi()),
    )
    .await;

    let Err(err) = result else {
        unreachable!("empty room must fail setup");
    };
    assert!(err.is_fatal());
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let (handle, engine, task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    notify_state(&handle, publish_channel(), ChannelState::Failed).await;
    handle.shutdown();
    task.await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    // Only the teardown stop; the retry never ran
    assert_eq!(engine.stop_publish_count(), 1);
    assert_eq!(engine.start_publish_count(), 1);
    assert_eq!(engine.destroy_count(), 1);
    assert_eq!(handle.pull_state(), PullStreamState::Closed);
    assert!(matches!(
        handle.notify(EngineEvent::MicrophoneSoundLevel { level: 1 }).await,
        Err(SessionError::Closed)
    ));
}

// ============================================================================
// Channel lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pull_connected_twice_subscribes_once() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    notify_state(&handle, pull_channel(1), ChannelState::Checking).await;
    notify_state(&handle, pull_channel(1), ChannelState::Connected).await;
    notify_state(&handle, pull_channel(1), ChannelState::Connected).await;
    settle().await;

    assert_eq!(engine.subscribe_count(), 1);
    assert_eq!(engine.subscribe_params()[0].stream_type, StreamType::Mcu);
    assert_eq!(handle.pull_state(), PullStreamState::Streaming);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_offline_publish_failures_retry_at_flat_delay() {
    let (handle, engine, _task) =
        start_session(MockEngine::accepting(), MockNetwork::offline()).await;

    notify_state(&handle, publish_channel(), ChannelState::Failed).await;
    assert_eq!(handle.reconnect_attempts(&publish_channel()), 1);
    notify_state(&handle, publish_channel(), ChannelState::Failed).await;
    assert_eq!(handle.reconnect_attempts(&publish_channel()), 2);

    tokio::time::sleep(Duration::from_millis(4990)).await;
    assert_eq!(engine.stop_publish_count(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    // The second schedule superseded the first: exactly one retry
    assert_eq!(engine.stop_publish_count(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(engine.start_publish_count(), 2);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_connected_cancels_publish_retry() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    notify_state(&handle, publish_channel(), ChannelState::Failed).await;
    assert_eq!(handle.publish_state(), PublishStreamState::Failed);
    notify_state(&handle, publish_channel(), ChannelState::Connected).await;

    assert_eq!(handle.reconnect_attempts(&publish_channel()), 0);
    assert_eq!(handle.publish_state(), PublishStreamState::Connected);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.stop_publish_count(), 0);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_republish_uses_current_media_flags() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    handle.set_media_enabled(false, true).await.unwrap();
    notify_state(&handle, publish_channel(), ChannelState::Disconnected).await;
    assert_eq!(handle.publish_state(), PublishStreamState::Disconnected);

    // 300ms wifi backoff plus 500ms settle
    tokio::time::sleep(Duration::from_millis(900)).await;

    let last_publish = engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::StartPublish(params) => Some(params),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last_publish.audio, DeviceState::Mute);
    assert_eq!(last_publish.video, DeviceState::Open);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_pull_failure_recreates_channel() {
    let (handle, engine, _task) =
        start_session(MockEngine::accepting(), MockNetwork::cellular()).await;

    notify_state(&handle, pull_channel(1), ChannelState::Failed).await;
    assert_eq!(handle.pull_state(), PullStreamState::Failed);

    // 800ms cellular backoff plus 500ms settle
    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(engine.destroy_count(), 1);
    assert_eq!(engine.create_count(), 2);
    assert_eq!(
        handle.subscribe_channels().borrow().pull_channel_id,
        Some(pull_channel(2))
    );

    // Late notification from the retired channel is dropped
    notify_state(&handle, pull_channel(1), ChannelState::Connected).await;
    settle().await;
    assert_eq!(engine.subscribe_count(), 0);

    notify_state(&handle, pull_channel(2), ChannelState::Connected).await;
    settle().await;
    assert_eq!(engine.subscribe_count(), 1);
    assert_eq!(handle.pull_state(), PullStreamState::Streaming);
    handle.shutdown();
}

// ============================================================================
// First-frame arbitration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_composite_first_frame_forwarded_once() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;
    let mut frames = handle.composite_first_frames();

    for _ in 0..2 {
        handle
            .notify(EngineEvent::first_frame(StreamInfo::composite()))
            .await
            .unwrap();
    }
    handle.ping().await.unwrap();
    settle().await;

    assert_eq!(frames.recv().await.unwrap(), StreamInfo::composite());
    assert!(frames.try_recv().is_err());
    assert_eq!(handle.render_target(), RenderTarget::Composite);
    assert_eq!(engine.canvas_accounts(), vec![None]);

    // Grace window saw its frame: no fallback render
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.add_canvas_count(), 1);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_composite_first_frame_switches_without_observer() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    for _ in 0..2 {
        handle
            .notify(EngineEvent::first_frame(StreamInfo::composite()))
            .await
            .unwrap();
    }
    handle.ping().await.unwrap();
    settle().await;

    // Well inside the 1.5s grace window
    assert_eq!(handle.render_target(), RenderTarget::Composite);
    assert_eq!(engine.canvas_accounts(), vec![None]);

    // A late subscriber sees the single forwarded frame
    let latest = handle.latest_composite_first_frame();
    assert_eq!(*latest.borrow(), Some(StreamInfo::composite()));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(engine.add_canvas_count(), 1);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_grace_fallback_renders_composite() {
    let (handle, engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(handle.render_target(), RenderTarget::SelfPreview);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.render_target(), RenderTarget::Composite);
    assert_eq!(engine.canvas_accounts(), vec![None]);
    handle.shutdown();
}

// ============================================================================
// Layout and microphone projections
// ============================================================================

fn rect(id: &str, x: i32, width: i32) -> PixelRect {
    PixelRect {
        participant_id: id.into(),
        stream_type: StreamType::Main,
        x,
        y: 0,
        width,
        height: 1080,
    }
}

#[tokio::test(start_paused = true)]
async fn test_layout_projection_ignores_empty_update() {
    let (handle, _engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;
    let mut layout = handle.subscribe_layout();

    handle
        .notify(EngineEvent::MeetingLayoutChanged {
            rects: vec![rect("bob", 0, 960), rect("carol", 960, 960)],
        })
        .await
        .unwrap();
    handle
        .notify(EngineEvent::MeetingLayoutChanged { rects: Vec::new() })
        .await
        .unwrap();
    handle.ping().await.unwrap();

    assert!(layout.has_changed().unwrap());
    let rects = layout.borrow_and_update().clone();
    assert_eq!(rects.len(), 2);
    assert!((rects[1].x - 0.5).abs() < f32::EPSILON);
    assert_eq!(handle.layout_rects(), rects);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_mic_level_smoothing() {
    let (handle, _engine, _task) = start_session(MockEngine::accepting(), MockNetwork::wifi()).await;

    for level in [100, 100, 100, 0] {
        handle
            .notify(EngineEvent::MicrophoneSoundLevel { level })
            .await
            .unwrap();
    }
    handle.ping().await.unwrap();

    let level = *handle.mic_level().borrow();
    assert_eq!(level.smoothed, 45);
    assert_eq!(level.average, 75);
    handle.shutdown();
}
