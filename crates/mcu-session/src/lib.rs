//! MCU Meeting Session Core
//!
//! Client-side control core of a video-meeting session built on a server-side
//! MCU (multipoint control unit). It keeps one outbound publish channel and one
//! inbound pull channel alive, retries them with network-aware exponential
//! backoff, and decides what the single render surface shows.
//!
//! # Architecture
//!
//! ```text
//! MeetingSession (reactor task, one per joined room)
//! ├── ChannelStateMachine   publish + pull channel lifecycle
//! │   └── ReconnectScheduler  per-channel backoff retries
//! ├── FirstFrameArbiter     composite/participant first-frame dedup
//! ├── RenderArbiter         self preview / composite / full-screen target
//! └── LayoutTracker         proportional participant rects for hit testing
//! ```
//!
//! Engine notifications enter through [`session::SessionHandle::notify`] and are
//! processed in arrival order by the reactor. Observers read state through
//! `watch` and `broadcast` projections; the core never holds a UI object.
//!
//! # Modules
//!
//! - [`channel`] - Publish/pull channel state machine
//! - [`reconnect`] - Reconnection backoff scheduler
//! - [`first_frame`] - First-frame arbitration
//! - [`render`] - Full-screen render arbiter
//! - [`layout`] - Layout rect normalization and hit testing
//! - [`session`] - The session reactor and its handle
//! - [`config`] - Configuration from environment

pub mod channel;
pub mod config;
pub mod errors;
pub mod first_frame;
pub mod gesture;
pub mod layout;
pub mod messages;
pub mod observability;
pub mod reconnect;
pub mod render;
pub mod session;
pub mod state;
pub mod volume;

pub use config::Config;
pub use errors::SessionError;
pub use session::{MeetingSession, SessionHandle, SessionIdentity};
