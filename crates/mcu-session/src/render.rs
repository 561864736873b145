//! Full-screen render arbiter.
//!
//! Owns what the single render surface shows: the local self preview, the
//! composite stream, or one participant full screen. Full-screen transitions
//! go through a non-reentrant gate plus a debounce window; a request that
//! finds the gate held is dropped, never queued.
//!
//! Every render-apply runs as a spawned job bounded by a hard timeout and
//! retried once. A new render command aborts the in-flight ungated job for the
//! surface. Gated transitions release the gate from a drop guard, so success,
//! failure and cancellation all end with the gate open.

use crate::config::Timings;
use crate::errors::SessionError;
use crate::first_frame::FirstFrameArbiter;
use crate::observability::metrics;
use crate::state::ChannelSnapshot;
use common::engine::{MediaEngine, SubscribeParams, UnsubscribeFlags};
use common::types::{ChannelId, ParticipantId, RoomId, StreamInfo, StreamType, SurfaceHandle};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Attempts per render-apply (the first try plus one retry).
pub const RENDER_APPLY_ATTEMPTS: u32 = 2;

/// What the render surface shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RenderTarget {
    #[default]
    SelfPreview,
    Composite,
    FullScreen {
        participant: ParticipantId,
        stream_type: StreamType,
    },
}

impl RenderTarget {
    /// Participant shown full screen, if any.
    pub fn render_user_id(&self) -> Option<&ParticipantId> {
        match self {
            Self::FullScreen { participant, .. } => Some(participant),
            Self::SelfPreview | Self::Composite => None,
        }
    }

    pub fn is_full_screen(&self) -> bool {
        matches!(self, Self::FullScreen { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SelfPreview => "self_preview",
            Self::Composite => "composite",
            Self::FullScreen { .. } => "full_screen",
        }
    }
}

/// Result of a full-screen transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Render-apply gave up after its retry; state rolled back.
    Failed,
    /// Aborted by a newer render command or session shutdown.
    Cancelled,
    /// Another transition holds the gate.
    GateHeld,
    /// Too soon after the previous transition.
    Debounced,
    /// Empty participant id.
    Ignored,
}

impl TransitionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::GateHeld => "gate_held",
            Self::Debounced => "debounced",
            Self::Ignored => "ignored",
        }
    }

    /// True if the request started a transition.
    pub fn started(self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Cancelled)
    }
}

/// Render settings derived from the session configuration.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub room_id: RoomId,
    pub surface: SurfaceHandle,
    pub apply_timeout: Duration,
    pub retry_delay: Duration,
    pub debounce: Duration,
    pub first_frame_grace: Duration,
}

impl RenderSettings {
    pub fn new(room_id: RoomId, surface: SurfaceHandle, timings: &Timings) -> Self {
        Self {
            room_id,
            surface,
            apply_timeout: timings.render_apply_timeout,
            retry_delay: timings.render_retry_delay,
            debounce: timings.fullscreen_debounce,
            first_frame_grace: timings.first_frame_grace,
        }
    }
}

struct RenderJob {
    handle: AbortHandle,
    gated: bool,
}

/// Render surface owner. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RenderArbiter {
    inner: Arc<RenderInner>,
}

struct RenderInner {
    engine: Arc<dyn MediaEngine>,
    first_frame: Arc<FirstFrameArbiter>,
    channels: watch::Receiver<ChannelSnapshot>,
    settings: RenderSettings,
    target: watch::Sender<RenderTarget>,
    gate: AtomicBool,
    last_transition: Mutex<Option<Instant>>,
    render_job: Mutex<Option<RenderJob>>,
    grace_job: Mutex<Option<AbortHandle>>,
    cancel_token: CancellationToken,
}

/// Holds the transition gate; releases it on drop.
struct GateGuard {
    inner: Arc<RenderInner>,
}

impl GateGuard {
    fn try_acquire(inner: &Arc<RenderInner>) -> Option<Self> {
        inner
            .gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                inner: Arc::clone(inner),
            })
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.inner.gate.store(false, Ordering::Release);
    }
}

/// Reverts an optimistic full-screen target unless disarmed.
struct FullScreenRollback {
    inner: Arc<RenderInner>,
    participant: ParticipantId,
    fallback: RenderTarget,
    armed: bool,
}

impl FullScreenRollback {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FullScreenRollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let participant = &self.participant;
        let fallback = &self.fallback;
        let rolled_back = self.inner.target.send_if_modified(|t| {
            if t.render_user_id() == Some(participant) {
                *t = fallback.clone();
                true
            } else {
                false
            }
        });
        if rolled_back {
            warn!(
                target: "mcu.render",
                fallback = fallback.label(),
                "Full-screen render rolled back"
            );
        }
    }
}

impl RenderArbiter {
    pub fn new(
        settings: RenderSettings,
        engine: Arc<dyn MediaEngine>,
        first_frame: Arc<FirstFrameArbiter>,
        channels: watch::Receiver<ChannelSnapshot>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (target, _) = watch::channel(RenderTarget::default());
        Self {
            inner: Arc::new(RenderInner {
                engine,
                first_frame,
                channels,
                settings,
                target,
                gate: AtomicBool::new(false),
                last_transition: Mutex::new(None),
                render_job: Mutex::new(None),
                grace_job: Mutex::new(None),
                cancel_token,
            }),
        }
    }

    pub fn target(&self) -> RenderTarget {
        self.inner.target.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderTarget> {
        self.inner.target.subscribe()
    }

    /// Participant currently shown full screen.
    pub fn render_user_id(&self) -> Option<ParticipantId> {
        self.inner.target.borrow().render_user_id().cloned()
    }

    pub fn is_transition_in_progress(&self) -> bool {
        self.inner.gate.load(Ordering::Acquire)
    }

    /// Show one participant full screen.
    #[instrument(skip_all, fields(stream_type = %stream_type))]
    pub async fn enter_full_screen(
        &self,
        participant: ParticipantId,
        stream_type: StreamType,
    ) -> TransitionOutcome {
        let outcome = self.enter(participant, stream_type).await;
        metrics::record_fullscreen_transition("enter", outcome.as_str());
        outcome
    }

    async fn enter(&self, participant: ParticipantId, stream_type: StreamType) -> TransitionOutcome {
        if participant.is_blank() {
            debug!(target: "mcu.render", "Ignoring full-screen request without participant");
            return TransitionOutcome::Ignored;
        }
        let gate = match self.begin_transition("enter") {
            Ok(gate) => gate,
            Err(outcome) => return outcome,
        };

        let target = RenderTarget::FullScreen {
            participant: participant.clone(),
            stream_type,
        };
        let previous = self.inner.target.send_replace(target.clone());
        let rollback = FullScreenRollback {
            inner: Arc::clone(&self.inner),
            participant,
            fallback: if previous.is_full_screen() {
                RenderTarget::Composite
            } else {
                previous
            },
            armed: true,
        };
        info!(target: "mcu.render", "Entering full screen");

        let inner = Arc::clone(&self.inner);
        self.inner
            .run_job(true, async move {
                let _gate = gate;
                let applied = inner.apply_with_retry(&target).await;
                if applied {
                    rollback.disarm();
                }
                applied
            })
            .await
    }

    /// Leave full screen and return to the composite.
    #[instrument(skip_all)]
    pub async fn exit_full_screen(&self) -> TransitionOutcome {
        let outcome = self.exit().await;
        metrics::record_fullscreen_transition("exit", outcome.as_str());
        outcome
    }

    async fn exit(&self) -> TransitionOutcome {
        let gate = match self.begin_transition("exit") {
            Ok(gate) => gate,
            Err(outcome) => return outcome,
        };

        let previous = self.inner.target.send_replace(RenderTarget::Composite);
        info!(target: "mcu.render", from = previous.label(), "Exiting full screen");

        let inner = Arc::clone(&self.inner);
        self.inner
            .run_job(true, async move {
                let _gate = gate;
                if let RenderTarget::FullScreen {
                    participant,
                    stream_type,
                } = &previous
                {
                    inner.unsubscribe_participant(participant, *stream_type).await;
                }
                inner.arm_composite_window().await;
                inner.apply_with_retry(&RenderTarget::Composite).await
            })
            .await
    }

    /// Show the local camera preview. Used at session start.
    pub async fn render_self_preview(&self) -> bool {
        self.inner.target.send_replace(RenderTarget::SelfPreview);
        let inner = Arc::clone(&self.inner);
        self.inner
            .run_job(false, async move {
                inner.apply_with_retry(&RenderTarget::SelfPreview).await
            })
            .await
            == TransitionOutcome::Applied
    }

    /// Show the composite unless a participant is full screen.
    pub async fn render_composite(&self, reason: &'static str) -> bool {
        self.inner.render_composite(reason).await
    }

    /// Open a new first-frame window and start its grace fallback.
    pub async fn arm_composite_window(&self) {
        self.inner.arm_composite_window().await;
    }

    /// Bind a participant stream whose first frame just arrived.
    ///
    /// Returns false if the participant is no longer the full-screen target.
    pub async fn attach_participant(&self, info: &StreamInfo) -> bool {
        let current = self.inner.target.borrow().clone();
        let matches = matches!(
            &current,
            RenderTarget::FullScreen { participant, stream_type }
                if *participant == info.account && *stream_type == info.stream_type
        );
        if !matches {
            debug!(
                target: "mcu.render",
                stream_type = %info.stream_type,
                current = current.label(),
                "Stale participant first frame discarded"
            );
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let info = info.clone();
        self.inner
            .run_job(false, async move {
                inner
                    .with_render_policy("attach", || {
                        inner.engine.add_canvas(
                            Some(&info.account),
                            &inner.settings.room_id,
                            info.stream_type,
                            inner.settings.surface,
                        )
                    })
                    .await
            })
            .await
            == TransitionOutcome::Applied
    }

    /// Abort every in-flight render job and timer.
    pub fn shutdown(&self) {
        if let Some(job) = lock(&self.inner.render_job).take() {
            job.handle.abort();
        }
        if let Some(grace) = lock(&self.inner.grace_job).take() {
            grace.abort();
        }
    }

    fn begin_transition(&self, direction: &'static str) -> Result<GateGuard, TransitionOutcome> {
        let now = Instant::now();
        let debounced = lock(&self.inner.last_transition)
            .is_some_and(|last| now.duration_since(last) < self.inner.settings.debounce);
        if debounced {
            debug!(target: "mcu.render", direction, "Full-screen request debounced");
            return Err(TransitionOutcome::Debounced);
        }

        let Some(gate) = GateGuard::try_acquire(&self.inner) else {
            debug!(target: "mcu.render", direction, "Full-screen transition already in progress");
            return Err(TransitionOutcome::GateHeld);
        };
        *lock(&self.inner.last_transition) = Some(now);
        Ok(gate)
    }
}

impl RenderInner {
    /// Run `job` as the surface's render job and wait for it.
    async fn run_job<F>(self: &Arc<Self>, gated: bool, job: F) -> TransitionOutcome
    where
        F: Future<Output = bool> + Send + 'static,
    {
        let token = self.cancel_token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => None,
                applied = job => Some(applied),
            }
        });

        {
            let mut slot = lock(&self.render_job);
            let keep_current = !gated && slot.as_ref().is_some_and(|j| j.gated && !j.handle.is_finished());
            if keep_current {
                debug!(target: "mcu.render", "Transition in flight, running render job alongside");
            } else if let Some(previous) = slot.replace(RenderJob {
                handle: handle.abort_handle(),
                gated,
            }) {
                previous.handle.abort();
            }
        }

        match handle.await {
            Ok(Some(true)) => TransitionOutcome::Applied,
            Ok(Some(false)) => TransitionOutcome::Failed,
            Ok(None) => TransitionOutcome::Cancelled,
            Err(e) if e.is_cancelled() => {
                debug!(target: "mcu.render", "Render job superseded");
                TransitionOutcome::Cancelled
            }
            Err(e) => {
                warn!(target: "mcu.render", error = %e, "Render job panicked");
                TransitionOutcome::Failed
            }
        }
    }

    async fn render_composite(self: &Arc<Self>, reason: &'static str) -> bool {
        let mut full_screen = false;
        self.target.send_if_modified(|t| match t {
            RenderTarget::FullScreen { .. } => {
                full_screen = true;
                false
            }
            RenderTarget::Composite => false,
            RenderTarget::SelfPreview => {
                *t = RenderTarget::Composite;
                true
            }
        });
        if full_screen {
            debug!(target: "mcu.render", reason, "Composite render skipped while full screen");
            return false;
        }

        info!(target: "mcu.render", reason, "Rendering composite");
        let inner = Arc::clone(self);
        self.run_job(false, async move {
            inner.apply_with_retry(&RenderTarget::Composite).await
        })
        .await
            == TransitionOutcome::Applied
    }

    async fn arm_composite_window(self: &Arc<Self>) {
        let generation = self.first_frame.rearm().await;
        let inner = Arc::clone(self);
        let token = self.cancel_token.clone();
        let grace = self.settings.first_frame_grace;

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = async {
                    tokio::time::sleep(grace).await;
                    inner.grace_fallback(generation).await;
                } => {}
            }
        });

        if let Some(previous) = lock(&self.grace_job).replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    async fn grace_fallback(self: &Arc<Self>, generation: u64) {
        if !self.first_frame.needs_fallback(generation).await {
            return;
        }
        info!(
            target: "mcu.render",
            generation,
            "No composite first frame within grace window"
        );
        self.render_composite("grace_timeout").await;
    }

    async fn apply_with_retry(&self, target: &RenderTarget) -> bool {
        self.with_render_policy(target.label(), || self.apply(target))
            .await
    }

    /// Hard timeout per attempt, one retry after the retry delay, then give up.
    async fn with_render_policy<Op, Fut, E>(&self, label: &'static str, op: Op) -> bool
    where
        Op: Fn() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<SessionError>,
    {
        for attempt in 1..=RENDER_APPLY_ATTEMPTS {
            match tokio::time::timeout(self.settings.apply_timeout, op()).await {
                Ok(Ok(())) => {
                    metrics::record_render_apply(label, "success");
                    debug!(target: "mcu.render", target_kind = label, attempt, "Render applied");
                    return true;
                }
                Ok(Err(e)) => {
                    let e: SessionError = e.into();
                    metrics::record_render_apply(label, "error");
                    warn!(target: "mcu.render", target_kind = label, attempt, error = %e, "Render apply failed");
                }
                Err(_) => {
                    metrics::record_render_apply(label, "timeout");
                    warn!(
                        target: "mcu.render",
                        target_kind = label,
                        attempt,
                        error = %SessionError::RenderTimeout,
                        "Render apply failed"
                    );
                }
            }
            if attempt < RENDER_APPLY_ATTEMPTS {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }
        metrics::record_render_apply(label, "gave_up");
        warn!(target: "mcu.render", target_kind = label, "Render apply gave up");
        false
    }

    async fn apply(&self, target: &RenderTarget) -> Result<(), SessionError> {
        let engine = &self.engine;
        let surface = self.settings.surface;
        let room_id = &self.settings.room_id;

        match target {
            RenderTarget::SelfPreview => {
                engine.remove_canvas(surface).await?;
                engine.add_preview(surface).await?;
            }
            RenderTarget::Composite => {
                engine.remove_canvas(surface).await?;
                engine
                    .add_canvas(None, room_id, StreamType::Mcu, surface)
                    .await?;
            }
            RenderTarget::FullScreen {
                participant,
                stream_type,
            } => {
                let channel_id = self.pull_channel_id().ok_or(SessionError::MissingPullChannel)?;
                engine.remove_canvas(surface).await?;
                if engine
                    .is_stream_pulled(&channel_id, room_id, participant, *stream_type)
                    .await?
                {
                    engine
                        .add_canvas(Some(participant), room_id, *stream_type, surface)
                        .await?;
                } else {
                    // Canvas is attached once the participant's first frame arrives
                    engine
                        .subscribe_stream(
                            &channel_id,
                            room_id,
                            SubscribeParams::video_only(participant.clone(), *stream_type),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn unsubscribe_participant(&self, participant: &ParticipantId, stream_type: StreamType) {
        let Some(channel_id) = self.pull_channel_id() else {
            debug!(target: "mcu.render", "No pull channel, skipping full-screen unsubscribe");
            return;
        };
        if let Err(e) = self
            .engine
            .unsubscribe_stream(
                &channel_id,
                participant,
                &self.settings.room_id,
                stream_type,
                UnsubscribeFlags::full_screen_video(),
            )
            .await
        {
            warn!(target: "mcu.render", error = %e, "Full-screen unsubscribe failed");
        }
    }

    fn pull_channel_id(&self) -> Option<ChannelId> {
        self.channels.borrow().pull_channel_id.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
