//! Pre-configured test data fixtures for session testing.
//!
//! Provides:
//! - The room and local account every session test joins with
//! - Remote participant stream descriptors
//! - The render surface handle

use common::types::{ChannelId, ParticipantId, RoomId, StreamInfo, StreamType, SurfaceHandle};

/// Room every fixture session joins.
pub const TEST_ROOM: &str = "room-test-1";

/// Local account of every fixture session.
pub const TEST_ACCOUNT: &str = "alice";

/// Surface handle used by fixture sessions.
pub const TEST_SURFACE: SurfaceHandle = SurfaceHandle(7);

#[must_use]
pub fn test_room() -> RoomId {
    RoomId::new(TEST_ROOM)
}

#[must_use]
pub fn test_account() -> ParticipantId {
    ParticipantId::new(TEST_ACCOUNT)
}

/// Channel id the mock engine assigns to its `n`th pull channel.
#[must_use]
pub fn pull_channel(n: u32) -> ChannelId {
    ChannelId::new(format!("pull-{n}"))
}

/// Channel id used for the local publish channel in tests.
#[must_use]
pub fn publish_channel() -> ChannelId {
    ChannelId::new("publish-1")
}

/// Test participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    /// Account identifier.
    pub account: ParticipantId,
    /// Stream the participant is sharing.
    pub stream_type: StreamType,
}

impl TestParticipant {
    /// Participant with a camera stream.
    #[must_use]
    pub fn new(account: &str) -> Self {
        Self {
            account: ParticipantId::new(account),
            stream_type: StreamType::Main,
        }
    }

    /// Switch the participant to a screen share.
    #[must_use]
    pub fn sharing(mut self) -> Self {
        self.stream_type = StreamType::Share;
        self
    }

    /// Stream descriptor for this participant.
    #[must_use]
    pub fn stream(&self) -> StreamInfo {
        StreamInfo {
            account: self.account.clone(),
            stream_type: self.stream_type,
        }
    }
}

/// The composite stream descriptor.
#[must_use]
pub fn composite_stream() -> StreamInfo {
    StreamInfo::composite()
}
