//! Publish/pull channel state machine.
//!
//! A session owns one outbound publish channel and at most one inbound pull
//! channel. Engine notifications are classified by comparing the channel id
//! against the known pull channel id; anything else is the publish side.
//!
//! Every non-terminal failure is handed to the [`ReconnectScheduler`]. Nothing
//! here is fatal to the session.

use crate::observability::metrics;
use crate::reconnect::ReconnectScheduler;
use crate::session::SessionIdentity;
use crate::state::{
    ChannelRole, ChannelSnapshot, ChannelState, FailureKind, PublishStreamState, PullStreamState,
};
use common::engine::{MediaEngine, NetworkMonitor, PublishParams, SubscribeParams};
use common::types::{ChannelId, DeviceState, StreamType};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Bookkeeping key for retries of a failed pull channel creation.
pub const PULL_CREATE_KEY: &str = "pull-create";

/// Bookkeeping key for retries of a rejected publish start.
pub const PUBLISH_START_KEY: &str = "publish-start";

type RetryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Local capture device flags used when (re)publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFlags {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Channel lifecycle owner for one session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChannelStateMachine {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    engine: Arc<dyn MediaEngine>,
    scheduler: ReconnectScheduler,
    identity: SessionIdentity,
    settle_delay: Duration,
    snapshot: watch::Sender<ChannelSnapshot>,
    /// Composite subscription issued on the current pull channel.
    has_subscribed: AtomicBool,
    /// Last pull channel torn down for a retry; its late notifications are dropped.
    retired_pull: Mutex<Option<ChannelId>>,
    media: Mutex<MediaFlags>,
    cancel_token: CancellationToken,
}

impl ChannelStateMachine {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        network: Arc<dyn NetworkMonitor>,
        identity: SessionIdentity,
        settle_delay: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        let (snapshot, _) = watch::channel(ChannelSnapshot::default());
        Self {
            inner: Arc::new(ChannelInner {
                engine,
                scheduler: ReconnectScheduler::new(network, cancel_token.child_token()),
                identity,
                settle_delay,
                snapshot,
                has_subscribed: AtomicBool::new(false),
                retired_pull: Mutex::new(None),
                media: Mutex::new(MediaFlags::default()),
                cancel_token,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn publish_state(&self) -> PublishStreamState {
        self.inner.snapshot.borrow().publish
    }

    pub fn pull_state(&self) -> PullStreamState {
        self.inner.snapshot.borrow().pull
    }

    pub fn pull_channel_id(&self) -> Option<ChannelId> {
        self.inner.snapshot.borrow().pull_channel_id.clone()
    }

    pub fn has_subscribed(&self) -> bool {
        self.inner.has_subscribed.load(Ordering::Acquire)
    }

    /// Retries scheduled for `channel_id` since its last success or close.
    pub fn reconnect_attempts(&self, channel_id: &ChannelId) -> u32 {
        self.inner.scheduler.attempts(channel_id)
    }

    /// Allow the next pull CONNECTED to subscribe the composite again.
    pub fn clear_subscription_guard(&self) {
        self.inner.has_subscribed.store(false, Ordering::Release);
    }

    /// Device flags used by the next publish.
    pub fn set_media_enabled(&self, audio: bool, video: bool) {
        *self
            .inner
            .media
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = MediaFlags { audio, video };
        debug!(target: "mcu.channel", audio, video, "Media flags updated");
    }

    pub fn media_flags(&self) -> MediaFlags {
        *self
            .inner
            .media
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an engine channel-state notification.
    pub fn on_channel_state_update(&self, channel_id: &ChannelId, state: ChannelState) {
        if self.is_retired(channel_id) {
            if state == ChannelState::Closed {
                self.inner.scheduler.reset(channel_id);
            }
            debug!(
                target: "mcu.channel",
                channel_id = %channel_id,
                state = state.as_str(),
                "Ignoring notification for retired pull channel"
            );
            return;
        }

        let role = self.inner.snapshot.borrow().role_of(channel_id);
        metrics::record_channel_state(role.as_str(), state.as_str());
        debug!(
            target: "mcu.channel",
            channel_id = %channel_id,
            channel = role.as_str(),
            state = state.as_str(),
            "Channel state update"
        );

        match role {
            ChannelRole::Publish => self.on_publish_state(channel_id, state),
            ChannelRole::Pull => self.on_pull_state(channel_id, state),
        }
    }

    fn on_publish_state(&self, channel_id: &ChannelId, state: ChannelState) {
        self.inner.snapshot.send_if_modified(|s| {
            if s.publish_channel_id.as_ref() == Some(channel_id) {
                false
            } else {
                s.publish_channel_id = Some(channel_id.clone());
                true
            }
        });

        match state {
            ChannelState::New | ChannelState::Checking => {
                self.set_publish(PublishStreamState::Connecting);
            }
            ChannelState::Connected | ChannelState::Completed => {
                self.set_publish(PublishStreamState::Connected);
                self.inner.scheduler.reset(channel_id);
                self.inner
                    .scheduler
                    .reset(&ChannelId::new(PUBLISH_START_KEY));
            }
            ChannelState::Failed => {
                self.set_publish(PublishStreamState::Failed);
                self.schedule_publish_retry(channel_id);
            }
            ChannelState::Disconnected => {
                self.set_publish(PublishStreamState::Disconnected);
                self.schedule_publish_retry(channel_id);
            }
            ChannelState::Closed => {
                self.set_publish(PublishStreamState::Idle);
                self.inner.scheduler.reset(channel_id);
            }
        }
    }

    fn on_pull_state(&self, channel_id: &ChannelId, state: ChannelState) {
        match state {
            ChannelState::New | ChannelState::Checking => {
                self.set_pull(PullStreamState::Checking);
            }
            ChannelState::Connected => {
                self.inner.scheduler.reset(channel_id);
                if self
                    .inner
                    .has_subscribed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!(
                        target: "mcu.channel",
                        channel_id = %channel_id,
                        "Composite already subscribed, ignoring repeated CONNECTED"
                    );
                    return;
                }
                self.set_pull(PullStreamState::Connected);
                self.subscribe_composite(channel_id.clone());
            }
            ChannelState::Completed => {
                debug!(
                    target: "mcu.channel",
                    channel_id = %channel_id,
                    "Ignoring COMPLETED for pull channel"
                );
            }
            ChannelState::Failed => {
                self.set_pull(PullStreamState::Failed);
                self.schedule_pull_retry(channel_id, FailureKind::ChannelFailed);
            }
            ChannelState::Disconnected => {
                self.set_pull(PullStreamState::Disconnected);
                self.schedule_pull_retry(channel_id, FailureKind::Disconnected);
            }
            ChannelState::Closed => {
                self.inner.scheduler.reset(channel_id);
                self.inner.has_subscribed.store(false, Ordering::Release);
                self.inner.snapshot.send_modify(|s| {
                    s.pull = PullStreamState::Closed;
                    s.pull_channel_id = None;
                });
                info!(
                    target: "mcu.channel",
                    channel_id = %channel_id,
                    "Pull channel closed"
                );
            }
        }
    }

    fn subscribe_composite(&self, channel_id: ChannelId) {
        self.set_pull(PullStreamState::Subscribing);

        let machine = self.clone();
        let token = self.inner.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = machine.run_subscription(channel_id) => {}
            }
        });
    }

    #[instrument(skip_all, fields(channel_id = %channel_id))]
    async fn run_subscription(&self, channel_id: ChannelId) {
        let inner = &self.inner;
        info!(target: "mcu.channel", "Subscribing composite stream");

        match inner
            .engine
            .subscribe_stream(
                &channel_id,
                &inner.identity.room_id,
                SubscribeParams::composite(),
            )
            .await
        {
            Ok(()) => {
                let streaming = inner.snapshot.send_if_modified(|s| {
                    if s.pull_channel_id.as_ref() == Some(&channel_id)
                        && s.pull == PullStreamState::Subscribing
                    {
                        s.pull = PullStreamState::Streaming;
                        true
                    } else {
                        false
                    }
                });
                if streaming {
                    info!(target: "mcu.channel", "Composite stream streaming");
                } else {
                    debug!(
                        target: "mcu.channel",
                        "Subscription acknowledged for a channel no longer subscribing"
                    );
                }
            }
            Err(e) => {
                inner.has_subscribed.store(false, Ordering::Release);
                let current = inner.snapshot.send_if_modified(|s| {
                    if s.pull_channel_id.as_ref() == Some(&channel_id) {
                        s.pull = PullStreamState::Failed;
                        true
                    } else {
                        false
                    }
                });
                warn!(
                    target: "mcu.channel",
                    error = %e,
                    "Composite subscription rejected"
                );
                if current {
                    self.schedule_pull_retry(&channel_id, FailureKind::SubscribeFailed);
                }
            }
        }
    }

    /// Create a new pull channel and record its id.
    #[instrument(skip_all)]
    pub async fn create_pull_channel(&self) {
        let inner = &self.inner;
        inner.has_subscribed.store(false, Ordering::Release);
        self.set_pull(PullStreamState::Creating);

        match inner.engine.create_pull_channel().await {
            Ok(channel_id) => {
                inner.scheduler.reset(&ChannelId::new(PULL_CREATE_KEY));
                inner.snapshot.send_modify(|s| {
                    s.pull_channel_id = Some(channel_id.clone());
                });
                info!(
                    target: "mcu.channel",
                    channel_id = %channel_id,
                    "Pull channel created"
                );
            }
            Err(e) => {
                warn!(
                    target: "mcu.channel",
                    error = %e,
                    "Pull channel creation failed"
                );
                self.set_pull(PullStreamState::Failed);
                inner.scheduler.schedule(
                    &ChannelId::new(PULL_CREATE_KEY),
                    ChannelRole::Pull,
                    FailureKind::CreateFailed,
                    self.clone().recreate_pull_channel(),
                );
            }
        }
    }

    /// Start publishing the local stream with the current device flags.
    #[instrument(skip_all)]
    pub async fn start_publish(&self) {
        let inner = &self.inner;
        let media = self.media_flags();
        self.set_publish(PublishStreamState::Connecting);

        let params = PublishParams {
            account: inner.identity.account.clone(),
            room_id: inner.identity.room_id.clone(),
            stream_type: StreamType::Main,
            audio: DeviceState::from_enabled(media.audio),
            video: DeviceState::from_enabled(media.video),
        };

        match inner.engine.start_publish(params).await {
            Ok(()) => {
                info!(
                    target: "mcu.channel",
                    audio = media.audio,
                    video = media.video,
                    "Publish started"
                );
            }
            Err(e) => {
                warn!(
                    target: "mcu.channel",
                    error = %e,
                    "Publish start rejected"
                );
                self.set_publish(PublishStreamState::Failed);
                let key = inner
                    .snapshot
                    .borrow()
                    .publish_channel_id
                    .clone()
                    .unwrap_or_else(|| ChannelId::new(PUBLISH_START_KEY));
                inner.scheduler.schedule(
                    &key,
                    ChannelRole::Publish,
                    FailureKind::PublishDropped,
                    self.clone().republish(),
                );
            }
        }
    }

    /// Stop publishing, destroy the pull channel and cancel every retry.
    #[instrument(skip_all)]
    pub async fn teardown(&self) {
        let inner = &self.inner;
        inner.scheduler.cancel_all();

        if let Err(e) = inner
            .engine
            .stop_publish(
                &inner.identity.account,
                &inner.identity.room_id,
                StreamType::Main,
            )
            .await
        {
            warn!(target: "mcu.channel", error = %e, "Stop publish failed during teardown");
        }

        let mut pull = None;
        inner.snapshot.send_modify(|s| {
            pull = s.pull_channel_id.take();
            s.publish = PublishStreamState::Idle;
            s.pull = PullStreamState::Closed;
        });
        inner.has_subscribed.store(false, Ordering::Release);

        if let Some(channel_id) = pull {
            if let Err(e) = inner.engine.destroy_channel(&channel_id).await {
                warn!(
                    target: "mcu.channel",
                    channel_id = %channel_id,
                    error = %e,
                    "Destroy pull channel failed during teardown"
                );
            }
        }

        info!(target: "mcu.channel", "Channels torn down");
    }

    fn schedule_publish_retry(&self, channel_id: &ChannelId) {
        self.inner.scheduler.schedule(
            channel_id,
            ChannelRole::Publish,
            FailureKind::PublishDropped,
            self.clone().republish(),
        );
    }

    fn schedule_pull_retry(&self, channel_id: &ChannelId, kind: FailureKind) {
        self.inner.scheduler.schedule(
            channel_id,
            ChannelRole::Pull,
            kind,
            self.clone().recreate_pull_channel(),
        );
    }

    fn republish(self) -> RetryFuture {
        Box::pin(async move {
            let inner = &self.inner;
            if let Err(e) = inner
                .engine
                .stop_publish(
                    &inner.identity.account,
                    &inner.identity.room_id,
                    StreamType::Main,
                )
                .await
            {
                warn!(target: "mcu.channel", error = %e, "Stop publish failed before retry");
            }
            tokio::time::sleep(inner.settle_delay).await;
            self.start_publish().await;
        })
    }

    fn recreate_pull_channel(self) -> RetryFuture {
        Box::pin(async move {
            if let Some(old) = self.retire_pull_channel() {
                if let Err(e) = self.inner.engine.destroy_channel(&old).await {
                    warn!(
                        target: "mcu.channel",
                        channel_id = %old,
                        error = %e,
                        "Destroy pull channel failed before retry"
                    );
                }
            }
            tokio::time::sleep(self.inner.settle_delay).await;
            self.create_pull_channel().await;
        })
    }

    fn retire_pull_channel(&self) -> Option<ChannelId> {
        let mut old = None;
        self.inner.snapshot.send_if_modified(|s| {
            old = s.pull_channel_id.take();
            old.is_some()
        });
        self.inner.has_subscribed.store(false, Ordering::Release);
        if let Some(id) = &old {
            *self
                .inner
                .retired_pull
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        }
        old
    }

    fn is_retired(&self, channel_id: &ChannelId) -> bool {
        self.inner
            .retired_pull
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            == Some(channel_id)
    }

    fn set_publish(&self, state: PublishStreamState) {
        let changed = self.inner.snapshot.send_if_modified(|s| {
            if s.publish == state {
                false
            } else {
                s.publish = state;
                true
            }
        });
        if changed {
            debug!(target: "mcu.channel", state = ?state, "Publish state changed");
        }
    }

    fn set_pull(&self, state: PullStreamState) {
        let changed = self.inner.snapshot.send_if_modified(|s| {
            if s.pull == state {
                false
            } else {
                s.pull = state;
                true
            }
        });
        if changed {
            debug!(target: "mcu.channel", state = ?state, "Pull state changed");
        }
    }
}
