//! Session mailbox messages.
//!
//! [`EngineEvent`] is the inbound notification surface of the media engine.
//! It is serde-tagged so the replay binary can read it as JSON lines, e.g.
//!
//! ```json
//! {"event":"channel_state_update","channel_id":"pull-1","state":"CONNECTED"}
//! {"event":"first_remote_frame_decoded","account":"","stream_type":"MCU"}
//! ```

use crate::layout::PixelRect;
use crate::state::ChannelState;
use common::types::{ChannelId, ParticipantId, StreamInfo, StreamType};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Notification from the media engine. Delivered at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ChannelStateUpdate {
        channel_id: ChannelId,
        state: ChannelState,
    },
    FirstRemoteFrameDecoded {
        account: ParticipantId,
        stream_type: StreamType,
    },
    MeetingLayoutChanged {
        rects: Vec<PixelRect>,
    },
    MicrophoneSoundLevel {
        level: i32,
    },
}

impl EngineEvent {
    pub fn channel_state(channel_id: ChannelId, state: ChannelState) -> Self {
        Self::ChannelStateUpdate { channel_id, state }
    }

    pub fn first_frame(info: StreamInfo) -> Self {
        Self::FirstRemoteFrameDecoded {
            account: info.account,
            stream_type: info.stream_type,
        }
    }

    /// Name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChannelStateUpdate { .. } => "channel_state_update",
            Self::FirstRemoteFrameDecoded { .. } => "first_remote_frame_decoded",
            Self::MeetingLayoutChanged { .. } => "meeting_layout_changed",
            Self::MicrophoneSoundLevel { .. } => "microphone_sound_level",
        }
    }
}

/// Messages processed by the session reactor, in arrival order.
#[derive(Debug)]
pub enum SessionMessage {
    Event(EngineEvent),
    SetMedia { audio: bool, video: bool },
    /// Answered once every earlier message has been handled.
    Ping { respond_to: oneshot::Sender<()> },
}
