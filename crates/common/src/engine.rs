//! Injected media engine and network capabilities.
//!
//! The session core never talks to the media SDK directly. Everything it needs
//! from the engine goes through [`MediaEngine`], and network reachability goes
//! through [`NetworkMonitor`], so both can be swapped for mocks in tests.
//!
//! Implementations map engine result codes onto [`EngineError`]: a call that
//! returns a non-zero code must surface as [`EngineError::Rejected`].
//!
//! [`EngineError`]: crate::error::EngineError
//! [`EngineError::Rejected`]: crate::error::EngineError::Rejected

use crate::error::Result;
use crate::types::{
    ChannelId, DeviceState, NetworkStatus, ParticipantId, RoomId, StreamType, SurfaceHandle,
};
use serde::{Deserialize, Serialize};

/// Parameters for publishing the local stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishParams {
    pub account: ParticipantId,
    pub room_id: RoomId,
    pub stream_type: StreamType,
    pub audio: DeviceState,
    pub video: DeviceState,
}

/// Parameters for subscribing a remote stream on a pull channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// Stream owner (empty for the composite stream).
    pub account: ParticipantId,
    pub stream_type: StreamType,
    pub video: bool,
    pub audio: bool,
}

impl SubscribeParams {
    /// Audio and video of the composite stream.
    #[must_use]
    pub fn composite() -> Self {
        Self {
            account: ParticipantId::new(""),
            stream_type: StreamType::Mcu,
            video: true,
            audio: true,
        }
    }

    /// Video-only subscription of a single participant stream.
    #[must_use]
    pub fn video_only(account: ParticipantId, stream_type: StreamType) -> Self {
        Self {
            account,
            stream_type,
            video: true,
            audio: false,
        }
    }
}

/// Flags for tearing down a remote subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeFlags {
    pub video: bool,
    pub audio: bool,
    /// The subscription was opened for a full-screen view.
    pub full_screen: bool,
}

impl UnsubscribeFlags {
    /// Drop the video of a full-screen view, keeping audio.
    #[must_use]
    pub fn full_screen_video() -> Self {
        Self {
            video: true,
            audio: false,
            full_screen: true,
        }
    }
}

/// Media engine operations used by the session core.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a new pull channel and return its identifier.
    async fn create_pull_channel(&self) -> Result<ChannelId>;

    /// Destroy a channel previously created by the engine.
    async fn destroy_channel(&self, channel_id: &ChannelId) -> Result<()>;

    /// Start publishing the local stream.
    async fn start_publish(&self, params: PublishParams) -> Result<()>;

    /// Stop publishing the local stream.
    async fn stop_publish(
        &self,
        account: &ParticipantId,
        room_id: &RoomId,
        stream_type: StreamType,
    ) -> Result<()>;

    /// Subscribe a remote stream on the given pull channel.
    async fn subscribe_stream(
        &self,
        channel_id: &ChannelId,
        room_id: &RoomId,
        params: SubscribeParams,
    ) -> Result<()>;

    /// Unsubscribe a remote stream from the given pull channel.
    async fn unsubscribe_stream(
        &self,
        channel_id: &ChannelId,
        account: &ParticipantId,
        room_id: &RoomId,
        stream_type: StreamType,
        flags: UnsubscribeFlags,
    ) -> Result<()>;

    /// Bind a remote stream to the render surface. `None` binds the composite.
    async fn add_canvas(
        &self,
        account: Option<&ParticipantId>,
        room_id: &RoomId,
        stream_type: StreamType,
        surface: SurfaceHandle,
    ) -> Result<()>;

    /// Detach whatever is bound to the render surface.
    async fn remove_canvas(&self, surface: SurfaceHandle) -> Result<()>;

    /// Bind the local camera preview to the render surface.
    async fn add_preview(&self, surface: SurfaceHandle) -> Result<()>;

    /// Whether the given remote stream is already being pulled.
    async fn is_stream_pulled(
        &self,
        channel_id: &ChannelId,
        room_id: &RoomId,
        account: &ParticipantId,
        stream_type: StreamType,
    ) -> Result<bool>;
}

/// Network reachability query.
pub trait NetworkMonitor: Send + Sync {
    fn status(&self) -> NetworkStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_subscribe_params() {
        let params = SubscribeParams::composite();
        assert!(params.account.as_str().is_empty());
        assert_eq!(params.stream_type, StreamType::Mcu);
        assert!(params.video && params.audio);
    }

    #[test]
    fn test_video_only_subscribe_params() {
        let params = SubscribeParams::video_only(ParticipantId::new("bob"), StreamType::Share);
        assert!(params.video);
        assert!(!params.audio);
    }

    #[test]
    fn test_full_screen_unsubscribe_flags() {
        let flags = UnsubscribeFlags::full_screen_video();
        assert!(flags.video && flags.full_screen);
        assert!(!flags.audio);
    }
}
