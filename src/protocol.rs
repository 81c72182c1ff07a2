//! Mailbox protocol shared by the coordinator and its collaborators.
//!
//! Every external trigger, whether an application call, a remote-control
//! callback, a focus change, an artwork completion, or a service lifecycle
//! completion, enters the coordinator as one of these messages and is
//! processed strictly in arrival order. The mailbox is the sole
//! synchronization primitive.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

use crate::error::{CoordinatorError, FocusError, LifecycleError, ResolveError};
use crate::options::MediaSessionOptions;
use crate::session_state::{
    ImageBytes, PlaybackSnapshot, PlaybackStatus, Rating, TrackMetadata,
};

/// Reply channel for one application call.
pub type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

/// A remote action the session can advertise and receive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
    SkipForward,
    SkipBackward,
    Seek,
    SetRating,
}

/// Typed payload carried by commands that have one.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPayload {
    /// Skip interval for SkipForward/SkipBackward.
    SkipInterval { seconds: u32 },
    /// Absolute target position for Seek.
    SeekTo { position_seconds: f64 },
    /// Rating submitted by the user for SetRating.
    Rating(Rating),
}

/// One normalized remote-control event, in OS arrival order.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RemoteCommand {
    pub kind: CommandKind,
    pub payload: Option<CommandPayload>,
    /// Unix timestamp in milliseconds at normalization time.
    pub timestamp_ms: u64,
}

/// Whether an interruption is starting or ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionPhase {
    Begin,
    End,
}

/// Why the platform took audio attention away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionCategory {
    Permanent,
    Transient,
    TransientCanDuck,
}

/// An audio-focus interruption surfaced to the application.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct AudioInterruption {
    pub phase: InterruptionPhase,
    pub category: InterruptionCategory,
    /// Whether the application may resume when the interruption ends.
    pub should_resume: bool,
}

/// Outbound events delivered to `EventBridge` subscribers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Command(RemoteCommand),
    Interruption(AudioInterruption),
    VolumeChanged { volume: f32, user_initiated: bool },
}

/// Platform focus-change reasons, already mapped from OS codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    PermanentLoss,
    TransientLoss,
    TransientLossCanDuck,
    Regained,
}

/// Application calls, each carrying its reply channel.
#[derive(Debug)]
pub enum SessionCall {
    Enable {
        options: MediaSessionOptions,
        reply: Reply<()>,
    },
    Disable {
        reply: Reply<()>,
    },
    UpdateMetadata {
        metadata: TrackMetadata,
        reply: Reply<()>,
    },
    UpdatePlayback {
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    IsEnabled {
        reply: Reply<bool>,
    },
    CurrentMetadata {
        reply: Reply<Option<TrackMetadata>>,
    },
    CurrentState {
        reply: Reply<PlaybackSnapshot>,
    },
}

/// Top-level envelope for all coordinator mailbox traffic.
#[derive(Debug)]
pub enum CoordinatorMessage {
    Call(SessionCall),
    Remote(RemoteCommand),
    FocusChanged(FocusChange),
    FocusRequestCompleted {
        result: Result<bool, FocusError>,
    },
    ArtworkResolved {
        generation: u64,
        result: Result<ImageBytes, ResolveError>,
    },
    ServiceStartCompleted {
        epoch: u64,
        result: Result<(), LifecycleError>,
    },
    ServiceStopCompleted {
        epoch: u64,
    },
    VolumeChanged {
        volume: f32,
        user_initiated: bool,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Current wall-clock time as unix milliseconds.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
