//! Meeting session reactor.
//!
//! One `MeetingSession` runs per joined room. It owns the mailbox that engine
//! notifications are delivered to and processes them strictly in arrival
//! order. User gestures go straight to the render arbiter through the
//! [`SessionHandle`]; the arbiter's gate serializes them.
//!
//! # Lifecycle
//!
//! 1. [`MeetingSession::start`] validates the identity, renders the self
//!    preview, arms the composite first-frame window, starts publishing and
//!    creates the pull channel.
//! 2. The reactor handles [`SessionMessage`]s until the handle is shut down
//!    or every handle is dropped.
//! 3. Teardown cancels all timers, stops publishing and destroys the pull
//!    channel.

use crate::channel::ChannelStateMachine;
use crate::config::Config;
use crate::errors::SessionError;
use crate::first_frame::{FirstFrameArbiter, FirstFrameOutcome};
use crate::gesture::{TapClassifier, TapDecision, TapEvent};
use crate::layout::{self, LayoutRect, LayoutTracker};
use crate::messages::{EngineEvent, SessionMessage};
use crate::render::{RenderArbiter, RenderSettings, RenderTarget, TransitionOutcome};
use crate::state::{ChannelSnapshot, PublishStreamState, PullStreamState};
use crate::volume::{MicLevel, VolumeProcessor};
use common::engine::{MediaEngine, NetworkMonitor};
use common::types::{ChannelId, ParticipantId, RoomId, StreamInfo, StreamType, SurfaceHandle};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox capacity of the session reactor.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// Buffered tap events per observer.
const TAP_EVENT_CAPACITY: usize = 16;

/// Room and local account a session joins with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub room_id: RoomId,
    pub account: ParticipantId,
}

impl SessionIdentity {
    pub fn new(room_id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            room_id: RoomId::new(room_id),
            account: ParticipantId::new(account),
        }
    }

    /// Both the room id and the account must be non-empty.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.room_id.is_blank() {
            return Err(SessionError::Setup("room id is empty".to_string()));
        }
        if self.account.is_blank() {
            return Err(SessionError::Setup("account is empty".to_string()));
        }
        Ok(())
    }
}

/// Handle to a running [`MeetingSession`].
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
    channels: ChannelStateMachine,
    render: RenderArbiter,
    first_frame: Arc<FirstFrameArbiter>,
    layout: watch::Receiver<Vec<LayoutRect>>,
    mic_level: watch::Receiver<MicLevel>,
    taps: broadcast::Sender<TapEvent>,
    gestures: Arc<Mutex<TapClassifier>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Deliver an engine notification to the reactor.
    pub async fn notify(&self, event: EngineEvent) -> Result<(), SessionError> {
        self.send(SessionMessage::Event(event)).await
    }

    /// Device flags used by the next (re)publish.
    pub async fn set_media_enabled(&self, audio: bool, video: bool) -> Result<(), SessionError> {
        self.send(SessionMessage::SetMedia { audio, video }).await
    }

    /// Resolves once every message sent before it has been handled.
    pub async fn ping(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionMessage::Ping { respond_to: tx }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn send(&self, message: SessionMessage) -> Result<(), SessionError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn enter_full_screen(
        &self,
        participant: ParticipantId,
        stream_type: StreamType,
    ) -> TransitionOutcome {
        self.render.enter_full_screen(participant, stream_type).await
    }

    pub async fn exit_full_screen(&self) -> TransitionOutcome {
        let outcome = self.render.exit_full_screen().await;
        if outcome == TransitionOutcome::Applied {
            self.channels.clear_subscription_guard();
        }
        outcome
    }

    /// Feed a tap at a proportional view position.
    ///
    /// A double tap toggles full screen and returns the transition outcome;
    /// `None` means no transition was attempted.
    pub async fn tap(&self, x: f32, y: f32) -> Option<TransitionOutcome> {
        let decision = self
            .gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_tap(Instant::now(), x, y);

        match decision {
            TapDecision::DoubleTap => {
                let _ = self.taps.send(TapEvent::DoubleTap { x, y });
                self.on_double_tap(x, y).await
            }
            TapDecision::PendingSingle { generation } => {
                self.confirm_single_tap_later(generation);
                None
            }
        }
    }

    async fn on_double_tap(&self, x: f32, y: f32) -> Option<TransitionOutcome> {
        if self.render.target().is_full_screen() {
            return Some(self.exit_full_screen().await);
        }

        let hit = layout::participant_at(&self.layout.borrow(), x, y)
            .map(|rect| (rect.participant_id.clone(), rect.stream_type));
        let Some((participant, stream_type)) = hit else {
            debug!(target: "mcu.gesture", x, y, "Double tap outside any participant");
            return None;
        };
        Some(self.enter_full_screen(participant, stream_type).await)
    }

    fn confirm_single_tap_later(&self, generation: u64) {
        let gestures = Arc::clone(&self.gestures);
        let taps = self.taps.clone();
        let token = self.cancel_token.clone();
        let timeout = gestures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timeout();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let confirmed = gestures
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .confirm_single(generation);
                    if let Some((x, y)) = confirmed {
                        debug!(target: "mcu.gesture", x, y, "Single tap confirmed");
                        let _ = taps.send(TapEvent::SingleTap { x, y });
                    }
                }
            }
        });
    }

    pub fn publish_state(&self) -> PublishStreamState {
        self.channels.publish_state()
    }

    pub fn pull_state(&self) -> PullStreamState {
        self.channels.pull_state()
    }

    pub fn subscribe_channels(&self) -> watch::Receiver<ChannelSnapshot> {
        self.channels.subscribe()
    }

    pub fn reconnect_attempts(&self, channel_id: &ChannelId) -> u32 {
        self.channels.reconnect_attempts(channel_id)
    }

    pub fn render_target(&self) -> RenderTarget {
        self.render.target()
    }

    pub fn subscribe_render_target(&self) -> watch::Receiver<RenderTarget> {
        self.render.subscribe()
    }

    /// Participant shown full screen, if any.
    pub fn current_render_user_id(&self) -> Option<ParticipantId> {
        self.render.render_user_id()
    }

    pub fn layout_rects(&self) -> Vec<LayoutRect> {
        self.layout.borrow().clone()
    }

    pub fn subscribe_layout(&self) -> watch::Receiver<Vec<LayoutRect>> {
        self.layout.clone()
    }

    pub fn composite_first_frames(&self) -> broadcast::Receiver<StreamInfo> {
        self.first_frame.subscribe_composite()
    }

    /// Latest composite first frame, replayed to late subscribers.
    pub fn latest_composite_first_frame(&self) -> watch::Receiver<Option<StreamInfo>> {
        self.first_frame.watch_composite()
    }

    pub fn participant_first_frames(&self) -> broadcast::Receiver<StreamInfo> {
        self.first_frame.subscribe_participant()
    }

    pub fn mic_level(&self) -> watch::Receiver<MicLevel> {
        self.mic_level.clone()
    }

    pub fn subscribe_taps(&self) -> broadcast::Receiver<TapEvent> {
        self.taps.subscribe()
    }

    /// Stop the session. The reactor tears the channels down and exits.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}

/// The session reactor.
pub struct MeetingSession {
    session_id: String,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    channels: ChannelStateMachine,
    render: RenderArbiter,
    first_frame: Arc<FirstFrameArbiter>,
    layout: LayoutTracker,
    layout_tx: watch::Sender<Vec<LayoutRect>>,
    volume: VolumeProcessor,
    mic_tx: watch::Sender<MicLevel>,
    reference_width: u32,
    reference_height: u32,
    messages_processed: u64,
}

impl MeetingSession {
    /// Join the room and spawn the reactor.
    ///
    /// Setup failures are returned here and nothing is spawned. Every later
    /// failure is contained inside the session.
    #[instrument(skip_all, name = "mcu.session.start", fields(session_id = %config.session_id))]
    pub async fn start(
        config: &Config,
        identity: SessionIdentity,
        surface: SurfaceHandle,
        engine: Arc<dyn MediaEngine>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Result<(SessionHandle, JoinHandle<()>), SessionError> {
        identity.validate()?;

        let cancel_token = CancellationToken::new();
        let timings = config.timings;
        let first_frame = Arc::new(FirstFrameArbiter::new());
        let channels = ChannelStateMachine::new(
            Arc::clone(&engine),
            network,
            identity.clone(),
            timings.settle_delay,
            cancel_token.clone(),
        );
        let render = RenderArbiter::new(
            RenderSettings::new(identity.room_id.clone(), surface, &timings),
            engine,
            Arc::clone(&first_frame),
            channels.subscribe(),
            cancel_token.child_token(),
        );

        info!(target: "mcu.session", room_id = %identity.room_id, "Starting meeting session");

        if !render.render_self_preview().await {
            warn!(target: "mcu.session", "Self preview could not be rendered");
        }
        render.arm_composite_window().await;
        channels.start_publish().await;
        channels.create_pull_channel().await;

        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (layout_tx, layout_rx) = watch::channel(Vec::new());
        let (mic_tx, mic_rx) = watch::channel(MicLevel::default());
        let (taps, _) = broadcast::channel(TAP_EVENT_CAPACITY);

        let session = Self {
            session_id: config.session_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            channels: channels.clone(),
            render: render.clone(),
            first_frame: Arc::clone(&first_frame),
            layout: LayoutTracker::new(),
            layout_tx,
            volume: VolumeProcessor::default(),
            mic_tx,
            reference_width: config.reference_width,
            reference_height: config.reference_height,
            messages_processed: 0,
        };
        let task_handle = tokio::spawn(session.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            session_id: config.session_id.clone(),
            channels,
            render,
            first_frame,
            layout: layout_rx,
            mic_level: mic_rx,
            taps,
            gestures: Arc::new(Mutex::new(TapClassifier::new(timings.double_tap_timeout))),
        };

        Ok((handle, task_handle))
    }

    #[instrument(skip_all, name = "mcu.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(target: "mcu.session", "Meeting session started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "mcu.session", "Meeting session received cancellation signal");
                    break;
                }
                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(target: "mcu.session", "Session mailbox closed, exiting");
                        break;
                    };
                    self.handle_message(message).await;
                    self.messages_processed += 1;
                }
            }
        }

        self.teardown().await;
        info!(
            target: "mcu.session",
            messages_processed = self.messages_processed,
            "Meeting session stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Event(event) => self.handle_event(event).await,
            SessionMessage::SetMedia { audio, video } => {
                self.channels.set_media_enabled(audio, video);
            }
            SessionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        debug!(target: "mcu.session", event = event.name(), "Engine event");

        match event {
            EngineEvent::ChannelStateUpdate { channel_id, state } => {
                self.channels.on_channel_state_update(&channel_id, state);
            }
            EngineEvent::FirstRemoteFrameDecoded {
                account,
                stream_type,
            } => {
                self.handle_first_frame(StreamInfo {
                    account,
                    stream_type,
                })
                .await;
            }
            EngineEvent::MeetingLayoutChanged { rects } => {
                let normalized =
                    layout::normalize(&rects, self.reference_width, self.reference_height);
                match self.layout.apply(normalized) {
                    Some(diff) => {
                        debug!(
                            target: "mcu.layout",
                            added = diff.added.len(),
                            removed = diff.removed.len(),
                            "Layout updated"
                        );
                        self.layout_tx.send_replace(self.layout.rects().to_vec());
                    }
                    None => {
                        debug!(target: "mcu.layout", "Empty layout update ignored");
                    }
                }
            }
            EngineEvent::MicrophoneSoundLevel { level } => {
                self.mic_tx.send_replace(self.volume.process(level));
            }
        }
    }

    async fn handle_first_frame(&self, info: StreamInfo) {
        let is_composite = info.is_composite();
        match self.first_frame.on_first_frame(info, is_composite).await {
            FirstFrameOutcome::CompositeForwarded(_) => {
                let render = self.render.clone();
                tokio::spawn(async move {
                    render.render_composite("first_frame").await;
                });
            }
            FirstFrameOutcome::Participant(info) => {
                if self.render.render_user_id().as_ref() != Some(&info.account) {
                    debug!(
                        target: "mcu.session",
                        stream_type = %info.stream_type,
                        "Participant first frame is not the full-screen target"
                    );
                    return;
                }
                let render = self.render.clone();
                tokio::spawn(async move {
                    render.attach_participant(&info).await;
                });
            }
            FirstFrameOutcome::CompositeDuplicate | FirstFrameOutcome::CompositeForwardFailed => {}
        }
    }

    async fn teardown(&mut self) {
        self.cancel_token.cancel();
        self.first_frame.close().await;
        self.render.shutdown();
        self.channels.teardown().await;
        self.receiver.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcu_test_utils::{MockEngine, MockNetwork, TEST_SURFACE};

    #[test]
    fn test_identity_validation() {
        assert!(SessionIdentity::new("room-1", "alice").validate().is_ok());

        let err = SessionIdentity::new("", "alice").validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("room id"));

        let err = SessionIdentity::new("room-1", " ").validate().unwrap_err();
        assert!(matches!(err, SessionError::Setup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_issues_no_engine_calls() {
        let engine = Arc::new(MockEngine::accepting());
        let config = Config::new("", "alice");

        let result = MeetingSession::start(
            &config,
            config.identity(),
            TEST_SURFACE,
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            Arc::new(MockNetwork::wifi()),
        )
        .await;

        assert!(matches!(result, Err(SessionError::Setup(_))));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let engine = Arc::new(MockEngine::accepting());
        let config = Config::new("room-1", "alice");

        let (handle, task) = MeetingSession::start(
            &config,
            config.identity(),
            TEST_SURFACE,
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            Arc::new(MockNetwork::wifi()),
        )
        .await
        .unwrap();

        assert_eq!(engine.add_preview_count(), 1);
        assert_eq!(engine.start_publish_count(), 1);
        assert_eq!(engine.create_count(), 1);
        assert_eq!(handle.pull_state(), PullStreamState::Creating);
        assert_eq!(
            handle.subscribe_channels().borrow().pull_channel_id,
            Some(ChannelId::new("pull-1"))
        );
        handle.ping().await.unwrap();

        handle.shutdown();
        task.await.unwrap();

        assert!(handle.is_closed());
        assert_eq!(engine.stop_publish_count(), 1);
        assert_eq!(engine.destroy_count(), 1);
        assert!(matches!(handle.ping().await, Err(SessionError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mic_level_projection() {
        let engine = Arc::new(MockEngine::accepting());
        let config = Config::new("room-1", "alice");
        let (handle, _task) = MeetingSession::start(
            &config,
            config.identity(),
            TEST_SURFACE,
            engine,
            Arc::new(MockNetwork::wifi()),
        )
        .await
        .unwrap();

        handle
            .notify(EngineEvent::MicrophoneSoundLevel { level: 100 })
            .await
            .unwrap();
        handle.ping().await.unwrap();

        assert_eq!(*handle.mic_level().borrow(), MicLevel { smoothed: 30, average: 100 });
        handle.shutdown();
    }
}
