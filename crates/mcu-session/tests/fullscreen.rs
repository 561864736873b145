//! Integration tests for full-screen transitions and tap gestures.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use common::engine::{MediaEngine, SubscribeParams};
use common::types::{ParticipantId, StreamInfo, StreamType};
use mcu_session::gesture::TapEvent;
use mcu_session::layout::PixelRect;
use mcu_session::messages::EngineEvent;
use mcu_session::render::{RenderTarget, TransitionOutcome};
use mcu_session::state::ChannelState;
use mcu_session::{Config, MeetingSession, SessionHandle};
use mcu_test_utils::{
    pull_channel, EngineCall, MockEngine, MockNetwork, TestParticipant, TEST_ACCOUNT, TEST_ROOM,
    TEST_SURFACE,
};
use tokio::task::JoinHandle;

/// Default full-screen debounce window.
const DEBOUNCE: Duration = Duration::from_millis(800);

async fn start_session(engine: MockEngine) -> (SessionHandle, Arc<MockEngine>, JoinHandle<()>) {
    let engine = Arc::new(engine);
    let config = Config::new(TEST_ROOM, TEST_ACCOUNT);
    let (handle, task) = MeetingSession::start(
        &config,
        config.identity(),
        TEST_SURFACE,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::new(MockNetwork::wifi()),
    )
    .await
    .expect("session starts");
    (handle, engine, task)
}

/// Two side-by-side participants: bob on the left half, carol on the right.
async fn publish_layout(handle: &SessionHandle) {
    let rect = |id: &str, x: i32| PixelRect {
        participant_id: id.into(),
        stream_type: StreamType::Main,
        x,
        y: 0,
        width: 960,
        height: 1080,
    };
    handle
        .notify(EngineEvent::MeetingLayoutChanged {
            rects: vec![rect("bob", 0), rect("carol", 960)],
        })
        .await
        .unwrap();
    handle.ping().await.unwrap();
}

fn bob() -> ParticipantId {
    ParticipantId::new("bob")
}

#[tokio::test(start_paused = true)]
async fn test_enter_subscribes_then_attaches_on_first_frame() {
    let (handle, engine, _task) = start_session(MockEngine::accepting()).await;
    let mut frames = handle.participant_first_frames();

    let outcome = handle.enter_full_screen(bob(), StreamType::Main).await;
    assert_eq!(outcome, TransitionOutcome::Applied);
    assert_eq!(handle.current_render_user_id(), Some(bob()));
    assert_eq!(
        engine.subscribe_params(),
        vec![SubscribeParams::video_only(bob(), StreamType::Main)]
    );

    // A stale frame from someone else is not attached
    let carol = TestParticipant::new("carol").stream();
    handle.notify(EngineEvent::first_frame(carol)).await.unwrap();
    handle
        .notify(EngineEvent::first_frame(StreamInfo::new("bob", StreamType::Main)))
        .await
        .unwrap();
    handle.ping().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(frames.recv().await.unwrap().account.as_str(), "carol");
    assert_eq!(frames.recv().await.unwrap().account.as_str(), "bob");
    assert_eq!(engine.canvas_accounts(), vec![Some(bob())]);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_exit_unsubscribes_and_returns_to_composite() {
    let (handle, engine, _task) = start_session(
        MockEngine::builder()
            .with_pulled("bob", StreamType::Share)
            .build(),
    )
    .await;

    assert_eq!(
        handle.enter_full_screen(bob(), StreamType::Share).await,
        TransitionOutcome::Applied
    );
    tokio::time::sleep(DEBOUNCE).await;
    assert_eq!(handle.exit_full_screen().await, TransitionOutcome::Applied);

    assert_eq!(handle.render_target(), RenderTarget::Composite);
    assert_eq!(handle.current_render_user_id(), None);
    let unsubscribes: Vec<_> = engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Unsubscribe {
                channel_id,
                account,
                stream_type,
                flags,
                ..
            } => Some((channel_id, account, stream_type, flags)),
            _ => None,
        })
        .collect();
    assert_eq!(unsubscribes.len(), 1);
    let (channel_id, account, stream_type, flags) = &unsubscribes[0];
    assert_eq!(*channel_id, pull_channel(1));
    assert_eq!(*account, bob());
    assert_eq!(*stream_type, StreamType::Share);
    assert!(flags.video && !flags.audio && flags.full_screen);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_exit_reenables_composite_subscription() {
    let (handle, engine, _task) = start_session(MockEngine::accepting()).await;
    handle
        .notify(EngineEvent::channel_state(pull_channel(1), ChannelState::Connected))
        .await
        .unwrap();
    handle.ping().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.subscribe_count(), 1);

    handle.enter_full_screen(bob(), StreamType::Main).await;
    tokio::time::sleep(DEBOUNCE).await;
    handle.exit_full_screen().await;

    // After a full-screen exit the next CONNECTED subscribes the composite again
    handle
        .notify(EngineEvent::channel_state(pull_channel(1), ChannelState::Connected))
        .await
        .unwrap();
    handle.ping().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let composite_subscribes = engine.count_calls(|c| {
        matches!(c, EngineCall::Subscribe { params, .. } if params.stream_type == StreamType::Mcu)
    });
    assert_eq!(composite_subscribes, 2);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_enter_and_exit_make_one_transition() {
    let (handle, _engine, _task) = start_session(
        MockEngine::builder()
            .with_pulled("bob", StreamType::Main)
            .add_canvas_latency(Duration::from_millis(100))
            .build(),
    )
    .await;

    let (enter, exit) = tokio::join!(
        handle.enter_full_screen(bob(), StreamType::Main),
        handle.exit_full_screen(),
    );

    let started = [enter, exit].iter().filter(|o| o.started()).count();
    assert_eq!(started, 1, "enter={enter:?} exit={exit:?}");
    let user = handle.current_render_user_id();
    assert!(user.is_none() || user == Some(bob()));
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_double_tap_toggles_full_screen() {
    let (handle, _engine, _task) = start_session(MockEngine::accepting()).await;
    publish_layout(&handle).await;
    let mut taps = handle.subscribe_taps();

    assert_eq!(handle.tap(0.25, 0.5).await, None);
    assert_eq!(handle.tap(0.25, 0.5).await, Some(TransitionOutcome::Applied));
    assert_eq!(handle.current_render_user_id(), Some(bob()));

    // The pending single tap is never confirmed
    tokio::time::sleep(DEBOUNCE).await;
    assert_eq!(taps.recv().await.unwrap(), TapEvent::DoubleTap { x: 0.25, y: 0.5 });
    assert!(taps.try_recv().is_err());

    handle.tap(0.75, 0.5).await;
    assert_eq!(handle.tap(0.75, 0.5).await, Some(TransitionOutcome::Applied));
    assert_eq!(handle.current_render_user_id(), None);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_double_tap_on_carol() {
    let (handle, _engine, _task) = start_session(MockEngine::accepting()).await;
    publish_layout(&handle).await;

    handle.tap(0.9, 0.1).await;
    handle.tap(0.9, 0.1).await;

    assert_eq!(
        handle.render_target(),
        RenderTarget::FullScreen {
            participant: ParticipantId::new("carol"),
            stream_type: StreamType::Main,
        }
    );
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_double_tap_outside_layout_does_nothing() {
    let (handle, engine, _task) = start_session(MockEngine::accepting()).await;
    engine.clear_calls();

    handle.tap(0.5, 0.5).await;
    assert_eq!(handle.tap(0.5, 0.5).await, None);
    assert!(engine.calls().is_empty());
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_single_tap_confirmed_after_timeout() {
    let (handle, _engine, _task) = start_session(MockEngine::accepting()).await;
    let mut taps = handle.subscribe_taps();

    assert_eq!(handle.tap(0.3, 0.7).await, None);
    tokio::time::sleep(Duration::from_millis(299)).await;
    assert!(taps.try_recv().is_err());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(taps.try_recv().unwrap(), TapEvent::SingleTap { x: 0.3, y: 0.7 });
    handle.shutdown();
}
