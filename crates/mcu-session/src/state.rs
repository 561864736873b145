//! Channel and stream state types.

use common::types::ChannelId;
use serde::{Deserialize, Serialize};

/// Transport state reported by the engine for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        }
    }
}

/// Lifecycle of the local publish stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishStreamState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Lifecycle of the inbound composite stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullStreamState {
    #[default]
    Idle,
    Creating,
    Checking,
    Connected,
    Subscribing,
    Streaming,
    Disconnected,
    Failed,
    Closed,
}

/// Which of the two session channels a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Publish,
    Pull,
}

impl ChannelRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Pull => "pull",
        }
    }
}

/// Cause of a scheduled reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The publish channel dropped mid-session.
    PublishDropped,
    /// The pull channel reported FAILED.
    ChannelFailed,
    /// The pull channel reported DISCONNECTED.
    Disconnected,
    /// The engine could not create a pull channel.
    CreateFailed,
    /// The engine rejected the composite subscription.
    SubscribeFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PublishDropped => "publish_dropped",
            Self::ChannelFailed => "channel_failed",
            Self::Disconnected => "disconnected",
            Self::CreateFailed => "create_failed",
            Self::SubscribeFailed => "subscribe_failed",
        }
    }
}

/// Observable snapshot of both session channels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSnapshot {
    pub publish: PublishStreamState,
    pub pull: PullStreamState,
    /// Last channel id seen for the publish side.
    pub publish_channel_id: Option<ChannelId>,
    /// Currently open pull channel, if any.
    pub pull_channel_id: Option<ChannelId>,
}

impl ChannelSnapshot {
    /// Classify a notification by comparing against the known pull channel.
    pub fn role_of(&self, channel_id: &ChannelId) -> ChannelRole {
        if self.pull_channel_id.as_ref() == Some(channel_id) {
            ChannelRole::Pull
        } else {
            ChannelRole::Publish
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_of() {
        let mut snapshot = ChannelSnapshot::default();
        let pull = ChannelId::new("pull-1");

        assert_eq!(snapshot.role_of(&pull), ChannelRole::Publish);

        snapshot.pull_channel_id = Some(pull.clone());
        assert_eq!(snapshot.role_of(&pull), ChannelRole::Pull);
        assert_eq!(
            snapshot.role_of(&ChannelId::new("publish-1")),
            ChannelRole::Publish
        );
    }

    #[test]
    fn test_default_states() {
        let snapshot = ChannelSnapshot::default();
        assert_eq!(snapshot.publish, PublishStreamState::Idle);
        assert_eq!(snapshot.pull, PullStreamState::Idle);
        assert!(snapshot.pull_channel_id.is_none());
    }
}
