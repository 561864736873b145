//! Mock media engine for session testing.
//!
//! Provides a mock engine that can be configured to:
//! - Reject a number of create, publish, subscribe or canvas calls
//! - Delay subscribe and canvas calls (for timeout and cancellation tests)
//! - Report selected participant streams as already pulled
//!
//! Every call is recorded as an [`EngineCall`] so tests can assert on the
//! exact sequence of commands the session issued.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcu_test_utils::MockEngine;
//!
//! let engine = MockEngine::builder()
//!     .fail_subscribe(1)
//!     .add_canvas_latency(Duration::from_secs(10))
//!     .with_pulled("bob", StreamType::Main)
//!     .build();
//! ```

use common::engine::{MediaEngine, PublishParams, SubscribeParams, UnsubscribeFlags};
use common::error::{EngineError, Result};
use common::types::{ChannelId, ParticipantId, RoomId, StreamType, SurfaceHandle};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Result code the mock returns for scripted rejections.
pub const MOCK_REJECT_CODE: i32 = -1;

/// A command the session issued to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreatePullChannel,
    DestroyChannel(ChannelId),
    StartPublish(PublishParams),
    StopPublish {
        account: ParticipantId,
        room_id: RoomId,
        stream_type: StreamType,
    },
    Subscribe {
        channel_id: ChannelId,
        room_id: RoomId,
        params: SubscribeParams,
    },
    Unsubscribe {
        channel_id: ChannelId,
        account: ParticipantId,
        room_id: RoomId,
        stream_type: StreamType,
        flags: UnsubscribeFlags,
    },
    AddCanvas {
        account: Option<ParticipantId>,
        room_id: RoomId,
        stream_type: StreamType,
        surface: SurfaceHandle,
    },
    RemoveCanvas(SurfaceHandle),
    AddPreview(SurfaceHandle),
    IsStreamPulled {
        channel_id: ChannelId,
        account: ParticipantId,
        stream_type: StreamType,
    },
}

/// Scriptable media engine that records every call.
#[derive(Debug, Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    next_channel: AtomicU32,
    create_failures: AtomicU32,
    publish_failures: AtomicU32,
    subscribe_failures: AtomicU32,
    canvas_failures: AtomicU32,
    subscribe_latency: Option<Duration>,
    canvas_latency: Mutex<Option<Duration>>,
    pulled: Mutex<HashSet<(ParticipantId, StreamType)>>,
}

impl MockEngine {
    /// Create a new MockEngine builder.
    #[must_use]
    pub fn builder() -> MockEngineBuilder {
        MockEngineBuilder::default()
    }

    /// Engine that accepts everything immediately.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of recorded calls matching the predicate.
    pub fn count_calls(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::CreatePullChannel))
    }

    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::DestroyChannel(_)))
    }

    #[must_use]
    pub fn start_publish_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::StartPublish(_)))
    }

    #[must_use]
    pub fn stop_publish_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::StopPublish { .. }))
    }

    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::Subscribe { .. }))
    }

    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::Unsubscribe { .. }))
    }

    #[must_use]
    pub fn add_canvas_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::AddCanvas { .. }))
    }

    #[must_use]
    pub fn add_preview_count(&self) -> usize {
        self.count_calls(|c| matches!(c, EngineCall::AddPreview(_)))
    }

    /// Subscribe parameters in call order.
    #[must_use]
    pub fn subscribe_params(&self) -> Vec<SubscribeParams> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Subscribe { params, .. } => Some(params.clone()),
                _ => None,
            })
            .collect()
    }

    /// Accounts bound by `add_canvas`, in call order (`None` for the composite).
    #[must_use]
    pub fn canvas_accounts(&self) -> Vec<Option<ParticipantId>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                EngineCall::AddCanvas { account, .. } => Some(account.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reject the next `n` subscribe calls.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.subscribe_failures.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` add-canvas calls.
    pub fn fail_next_canvases(&self, n: u32) {
        self.canvas_failures.store(n, Ordering::SeqCst);
    }

    /// Change the add-canvas latency mid-test.
    pub fn set_canvas_latency(&self, latency: Option<Duration>) {
        *self.canvas_latency.lock().unwrap() = latency;
    }

    /// Mark a participant stream as already pulled.
    pub fn set_pulled(&self, account: &str, stream_type: StreamType) {
        self.pulled
            .lock()
            .unwrap()
            .insert((ParticipantId::new(account), stream_type));
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn rejected() -> EngineError {
        EngineError::Rejected {
            code: MOCK_REJECT_CODE,
        }
    }
}

#[async_trait::async_trait]
impl MediaEngine for MockEngine {
    async fn create_pull_channel(&self) -> Result<ChannelId> {
        self.record(EngineCall::CreatePullChannel);
        if Self::take_failure(&self.create_failures) {
            return Err(EngineError::Unavailable("mock create failure".to_string()));
        }
        let n = self.next_channel.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChannelId::new(format!("pull-{n}")))
    }

    async fn destroy_channel(&self, channel_id: &ChannelId) -> Result<()> {
        self.record(EngineCall::DestroyChannel(channel_id.clone()));
        Ok(())
    }

    async fn start_publish(&self, params: PublishParams) -> Result<()> {
        self.record(EngineCall::StartPublish(params));
        if Self::take_failure(&self.publish_failures) {
            return Err(Self::rejected());
        }
        Ok(())
    }

    async fn stop_publish(
        &self,
        account: &ParticipantId,
        room_id: &RoomId,
        stream_type: StreamType,
    ) -> Result<()> {
        self.record(EngineCall::StopPublish {
            account: account.clone(),
            room_id: room_id.clone(),
            stream_type,
        });
        Ok(())
    }

    async fn subscribe_stream(
        &self,
        channel_id: &ChannelId,
        room_id: &RoomId,
        params: SubscribeParams,
    ) -> Result<()> {
        self.record(EngineCall::Subscribe {
            channel_id: channel_id.clone(),
            room_id: room_id.clone(),
            params,
        });
        if let Some(latency) = self.subscribe_latency {
            tokio::time::sleep(latency).await;
        }
        if Self::take_failure(&self.subscribe_failures) {
            return Err(Self::rejected());
        }
        Ok(())
    }

    async fn unsubscribe_stream(
        &self,
        channel_id: &ChannelId,
        account: &ParticipantId,
        room_id: &RoomId,
        stream_type: StreamType,
        flags: UnsubscribeFlags,
    ) -> Result<()> {
        self.record(EngineCall::Unsubscribe {
            channel_id: channel_id.clone(),
            account: account.clone(),
            room_id: room_id.clone(),
            stream_type,
            flags,
        });
        self.pulled
            .lock()
            .unwrap()
            .remove(&(account.clone(), stream_type));
        Ok(())
    }

    async fn add_canvas(
        &self,
        account: Option<&ParticipantId>,
        room_id: &RoomId,
        stream_type: StreamType,
        surface: SurfaceHandle,
    ) -> Result<()> {
        self.record(EngineCall::AddCanvas {
            account: account.cloned(),
            room_id: room_id.clone(),
            stream_type,
            surface,
        });
        let latency = *self.canvas_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if Self::take_failure(&self.canvas_failures) {
            return Err(Self::rejected());
        }
        Ok(())
    }

    async fn remove_canvas(&self, surface: SurfaceHandle) -> Result<()> {
        self.record(EngineCall::RemoveCanvas(surface));
        Ok(())
    }

    async fn add_preview(&self, surface: SurfaceHandle) -> Result<()> {
        self.record(EngineCall::AddPreview(surface));
        Ok(())
    }

    async fn is_stream_pulled(
        &self,
        channel_id: &ChannelId,
        _room_id: &RoomId,
        account: &ParticipantId,
        stream_type: StreamType,
    ) -> Result<bool> {
        self.record(EngineCall::IsStreamPulled {
            channel_id: channel_id.clone(),
            account: account.clone(),
            stream_type,
        });
        Ok(self
            .pulled
            .lock()
            .unwrap()
            .contains(&(account.clone(), stream_type)))
    }
}

/// Builder for MockEngine configuration.
#[derive(Debug, Default)]
pub struct MockEngineBuilder {
    create_failures: u32,
    publish_failures: u32,
    subscribe_failures: u32,
    canvas_failures: u32,
    subscribe_latency: Option<Duration>,
    canvas_latency: Option<Duration>,
    pulled: HashSet<(ParticipantId, StreamType)>,
}

impl MockEngineBuilder {
    /// Fail the first `n` pull channel creations.
    #[must_use]
    pub fn fail_create(mut self, n: u32) -> Self {
        self.create_failures = n;
        self
    }

    /// Reject the first `n` publish starts.
    #[must_use]
    pub fn fail_start_publish(mut self, n: u32) -> Self {
        self.publish_failures = n;
        self
    }

    /// Reject the first `n` subscriptions.
    #[must_use]
    pub fn fail_subscribe(mut self, n: u32) -> Self {
        self.subscribe_failures = n;
        self
    }

    /// Reject the first `n` canvas bindings.
    #[must_use]
    pub fn fail_add_canvas(mut self, n: u32) -> Self {
        self.canvas_failures = n;
        self
    }

    /// Delay every subscribe call.
    #[must_use]
    pub fn subscribe_latency(mut self, latency: Duration) -> Self {
        self.subscribe_latency = Some(latency);
        self
    }

    /// Delay every add-canvas call.
    #[must_use]
    pub fn add_canvas_latency(mut self, latency: Duration) -> Self {
        self.canvas_latency = Some(latency);
        self
    }

    /// Report a participant stream as already pulled.
    #[must_use]
    pub fn with_pulled(mut self, account: &str, stream_type: StreamType) -> Self {
        self.pulled
            .insert((ParticipantId::new(account), stream_type));
        self
    }

    /// Build the MockEngine.
    #[must_use]
    pub fn build(self) -> MockEngine {
        MockEngine {
            calls: Mutex::new(Vec::new()),
            next_channel: AtomicU32::new(0),
            create_failures: AtomicU32::new(self.create_failures),
            publish_failures: AtomicU32::new(self.publish_failures),
            subscribe_failures: AtomicU32::new(self.subscribe_failures),
            canvas_failures: AtomicU32::new(self.canvas_failures),
            subscribe_latency: self.subscribe_latency,
            canvas_latency: Mutex::new(self.canvas_latency),
            pulled: Mutex::new(self.pulled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::new("room-1")
    }

    #[tokio::test]
    async fn test_channel_ids_are_sequential() {
        let engine = MockEngine::accepting();
        assert_eq!(engine.create_pull_channel().await.unwrap().as_str(), "pull-1");
        assert_eq!(engine.create_pull_channel().await.unwrap().as_str(), "pull-2");
        assert_eq!(engine.create_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let engine = MockEngine::builder().fail_create(1).fail_subscribe(2).build();

        assert!(engine.create_pull_channel().await.is_err());
        assert!(engine.create_pull_channel().await.is_ok());

        let channel = ChannelId::new("pull-1");
        let first = engine
            .subscribe_stream(&channel, &room(), SubscribeParams::composite())
            .await;
        assert_eq!(first.unwrap_err().code(), Some(MOCK_REJECT_CODE));

        for expected_ok in [false, true] {
            let result = engine
                .subscribe_stream(&channel, &room(), SubscribeParams::composite())
                .await;
            assert_eq!(result.is_ok(), expected_ok);
        }
        assert_eq!(engine.subscribe_count(), 3);
    }

    #[tokio::test]
    async fn test_pulled_streams() {
        let engine = MockEngine::builder().with_pulled("bob", StreamType::Main).build();
        let channel = ChannelId::new("pull-1");
        let bob = ParticipantId::new("bob");

        assert!(engine
            .is_stream_pulled(&channel, &room(), &bob, StreamType::Main)
            .await
            .unwrap());
        assert!(!engine
            .is_stream_pulled(&channel, &room(), &bob, StreamType::Share)
            .await
            .unwrap());

        engine
            .unsubscribe_stream(
                &channel,
                &bob,
                &room(),
                StreamType::Main,
                UnsubscribeFlags::full_screen_video(),
            )
            .await
            .unwrap();
        assert!(!engine
            .is_stream_pulled(&channel, &room(), &bob, StreamType::Main)
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_canvas_latency() {
        let engine = MockEngine::builder()
            .add_canvas_latency(Duration::from_secs(3))
            .build();
        let start = tokio::time::Instant::now();
        engine
            .add_canvas(None, &room(), StreamType::Mcu, SurfaceHandle(1))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(engine.canvas_accounts(), vec![None]);
    }
}
