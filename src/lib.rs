//! Cadenza keeps a device's "now playing" surface in sync with an
//! application's playback engine and relays remote-control interactions
//! back to it.
//!
//! The heart of the crate is [`SessionCoordinator`]: an actor owning the
//! canonical [`SessionState`], fed by a single mailbox through which every
//! trigger flows: application calls, platform command callbacks, audio
//! focus changes, artwork completions, and service lifecycle transitions.
//! Processing them strictly in arrival order replaces all locking, and a
//! monotonic generation token stamped onto async work makes stale results
//! (the classic "track B shows track A's artwork" race) impossible to apply.
//!
//! Typical use:
//!
//! ```no_run
//! use cadenza::{
//!     MediaSessionOptions, PlaybackStatus, SessionBackends, SessionCoordinator, TrackMetadata,
//! };
//!
//! let handle = SessionCoordinator::spawn(SessionBackends::noop());
//! handle.enable(MediaSessionOptions::default())?;
//! handle.update_metadata(TrackMetadata {
//!     title: Some("An Ending".to_string()),
//!     artist: Some("Brian Eno".to_string()),
//!     ..TrackMetadata::default()
//! })?;
//! handle.update_playback(PlaybackStatus::Playing, Some(0), None)?;
//! # Ok::<(), cadenza::CoordinatorError>(())
//! ```

pub mod artwork_resolver;
pub mod audio_focus;
pub mod command_dispatcher;
pub mod error;
pub mod event_bridge;
pub mod media_widget;
pub mod notification_builder;
pub mod options;
pub mod protocol;
pub mod service_lifecycle;
pub mod session_coordinator;
pub mod session_state;

pub use artwork_resolver::{ArtworkCatalog, ArtworkResolver, HttpArtworkCatalog};
pub use audio_focus::{AudioFocusArbiter, FocusBackend, FocusState, NoopFocusBackend};
pub use command_dispatcher::CommandDispatcher;
pub use error::{
    CoordinatorError, FocusError, LifecycleError, ResolveError, ValidationError,
};
pub use event_bridge::{EventBridge, SubscriptionGuard};
pub use media_widget::MediaWidget;
pub use notification_builder::{
    IconRepository, NotificationSink, NotificationSnapshot, NotificationSubmitter,
};
pub use options::{ArtworkPolicy, MediaSessionOptions, NotificationStyle};
pub use protocol::{
    AudioInterruption, CommandKind, CommandPayload, FocusChange, InterruptionCategory,
    InterruptionPhase, RemoteCommand, SessionEvent,
};
pub use service_lifecycle::{NoopServiceHost, ServiceConnectionState, ServiceHost};
pub use session_coordinator::{MediaSessionHandle, SessionBackends, SessionCoordinator};
pub use session_state::{
    ArtworkRef, ArtworkSource, ImageBytes, PlaybackSnapshot, PlaybackStatus, Rating, RatingScale,
    ResolutionState, SessionState, TrackMetadata,
};
