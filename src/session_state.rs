//! Canonical "now playing" snapshot and its validated mutation rules.
//!
//! `SessionState` is owned exclusively by the coordinator loop; nothing else
//! ever holds a mutable reference to it. Every track change bumps the
//! `generation` counter, which stamps all outstanding async work so stale
//! results can be discarded on arrival.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::protocol::CommandKind;

/// Playback status advertised to the platform surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// No session content. Reachable only through `reset`/`disable`.
    #[default]
    None,
    Stopped,
    Playing,
    Paused,
    Buffering,
    Error,
}

/// Where artwork bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtworkSource {
    RemoteUrl(String),
    LocalPath(PathBuf),
    BundledName(String),
}

/// Decoded RGBA artwork handed to the notification path.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBytes")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Resolution progress for one artwork reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResolutionState {
    #[default]
    Unresolved,
    /// A fetch stamped with this generation is in flight.
    Loading(u64),
    Resolved(ImageBytes),
    Failed,
}

/// An artwork reference plus its resolution progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtworkRef {
    pub source: ArtworkSource,
    pub resolution: ResolutionState,
}

impl ArtworkRef {
    pub fn new(source: ArtworkSource) -> Self {
        Self {
            source,
            resolution: ResolutionState::Unresolved,
        }
    }
}

/// Scale a rating value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingScale {
    Heart,
    ThumbsUpOrDown,
    OutOfFive,
    OutOfTen,
    Percentage,
}

impl RatingScale {
    fn label(self) -> &'static str {
        match self {
            Self::Heart => "heart",
            Self::ThumbsUpOrDown => "thumbs",
            Self::OutOfFive => "out-of-five",
            Self::OutOfTen => "out-of-ten",
            Self::Percentage => "percentage",
        }
    }

    fn max_value(self) -> f32 {
        match self {
            Self::Heart | Self::ThumbsUpOrDown => 1.0,
            Self::OutOfFive => 5.0,
            Self::OutOfTen => 10.0,
            Self::Percentage => 100.0,
        }
    }
}

/// A rating within a declared scale.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Rating {
    pub scale: RatingScale,
    pub value: f32,
}

impl Rating {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.value.is_finite() {
            return Err(ValidationError::NonFiniteValue("rating"));
        }
        if self.value < 0.0 || self.value > self.scale.max_value() {
            return Err(ValidationError::RatingOutOfRange {
                scale: self.scale.label(),
                value: self.value,
            });
        }
        Ok(())
    }
}

/// Track metadata shown on the platform surface.
///
/// Replaced wholesale on every update; fields absent from an update are
/// cleared rather than merged, which avoids stale-field bugs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    pub track_number: Option<u32>,
    pub album_track_count: Option<u32>,
    pub artwork: Option<ArtworkRef>,
    pub rating: Option<Rating>,
    /// Accent color as 0xAARRGGBB.
    pub accent_color: Option<u32>,
}

impl TrackMetadata {
    /// Rejects malformed metadata before any of it is applied.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(rating) = &self.rating {
            rating.validate()?;
        }
        if let Some(artwork) = &self.artwork {
            if let ArtworkSource::RemoteUrl(url) = &artwork.source {
                if url.trim().is_empty() {
                    return Err(ValidationError::EmptyArtworkUrl);
                }
            }
        }
        Ok(())
    }
}

/// Read-only playback snapshot returned to callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub position_ms: u64,
    pub rate_multiplier: f32,
}

/// The canonical session snapshot, owned by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub enabled: bool,
    pub metadata: Option<TrackMetadata>,
    pub playback_status: PlaybackStatus,
    pub position_ms: u64,
    pub rate_multiplier: f32,
    pub capabilities: BTreeSet<CommandKind>,
    pub generation: u64,
}

impl SessionState {
    /// Validates a playback update without applying it.
    pub fn validate_playback(
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
    ) -> Result<(), ValidationError> {
        if status == PlaybackStatus::None {
            return Err(ValidationError::ReservedStatus);
        }
        if let Some(position) = position_ms {
            if position < 0 {
                return Err(ValidationError::NegativePosition(position));
            }
        }
        if let Some(rate) = rate {
            if !rate.is_finite() {
                return Err(ValidationError::NonFiniteValue("rate"));
            }
            if rate < 0.0 {
                return Err(ValidationError::NegativeRate(rate));
            }
        }
        Ok(())
    }

    /// Applies a validated playback update.
    ///
    /// Position is clamped to `[0, duration]` when duration is known. The
    /// rate defaults to 1.0 when entering Playing and 0.0 otherwise, unless
    /// the caller overrides it, so the platform scrubber can extrapolate
    /// between sparse updates.
    pub fn apply_playback(
        &mut self,
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
    ) {
        self.playback_status = status;
        if let Some(position) = position_ms {
            let mut clamped = position.max(0) as u64;
            if let Some(duration) = self.metadata.as_ref().and_then(|meta| meta.duration_ms) {
                clamped = clamped.min(duration);
            }
            self.position_ms = clamped;
        }
        self.rate_multiplier = rate.unwrap_or(match status {
            PlaybackStatus::Playing => 1.0,
            _ => 0.0,
        });
    }

    /// Replaces the current track metadata and bumps the generation.
    ///
    /// Returns the new generation stamping all async work for this track.
    pub fn replace_metadata(&mut self, metadata: TrackMetadata) -> u64 {
        self.metadata = Some(metadata);
        self.generation += 1;
        self.generation
    }

    /// Clears content back to an empty session, keeping `enabled` and the
    /// advertised capabilities. Bumps the generation so in-flight work for
    /// the old content is discarded on arrival.
    pub fn clear_content(&mut self) -> u64 {
        self.metadata = None;
        self.playback_status = PlaybackStatus::None;
        self.position_ms = 0;
        self.rate_multiplier = 0.0;
        self.generation += 1;
        self.generation
    }

    pub fn playback_snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.playback_status,
            position_ms: self.position_ms,
            rate_multiplier: self.rate_multiplier,
        }
    }
}
