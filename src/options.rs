//! Session options supplied by the application on `enable`.

use std::collections::BTreeSet;

use crate::protocol::CommandKind;

/// Options accepted by `enable`, replacing the previous set wholesale.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MediaSessionOptions {
    /// Remote actions advertised to the platform surface. Commands outside
    /// this set are dropped instead of delivered to subscribers.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<CommandKind>,
    #[serde(default)]
    /// Notification appearance preferences.
    pub notification: NotificationStyle,
    /// Interval applied to skip commands that arrive without their own.
    #[serde(default = "default_skip_interval_secs")]
    pub skip_interval_secs: u32,
    #[serde(default)]
    /// Artwork fetch and decode policy.
    pub artwork: ArtworkPolicy,
}

/// Notification appearance preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NotificationStyle {
    /// Caller-declared small icon resource name, tried first.
    #[serde(default)]
    pub icon: Option<String>,
    /// Whether resolved artwork should be shown as the large icon.
    #[serde(default = "default_true")]
    pub large_icon_enabled: bool,
    /// Notification accent color as 0xAARRGGBB, overriding track metadata.
    #[serde(default)]
    pub color: Option<u32>,
    /// Keep the notification visible while playback is stopped.
    #[serde(default)]
    pub show_when_closed: bool,
}

/// Artwork fetch and decode policy.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtworkPolicy {
    #[serde(default = "default_artwork_timeout_secs")]
    pub connect_timeout_secs: u32,
    #[serde(default = "default_artwork_timeout_secs")]
    pub read_timeout_secs: u32,
    /// Artwork larger than this edge is downscaled before display.
    #[serde(default = "default_artwork_max_edge_px")]
    pub max_edge_px: u32,
    #[serde(default = "default_artwork_worker_threads")]
    pub worker_threads: usize,
}

fn default_true() -> bool {
    true
}

fn default_skip_interval_secs() -> u32 {
    15
}

fn default_artwork_timeout_secs() -> u32 {
    10
}

fn default_artwork_max_edge_px() -> u32 {
    1024
}

fn default_artwork_worker_threads() -> usize {
    2
}

fn default_capabilities() -> Vec<CommandKind> {
    vec![
        CommandKind::Play,
        CommandKind::Pause,
        CommandKind::Stop,
        CommandKind::NextTrack,
        CommandKind::PreviousTrack,
        CommandKind::Seek,
    ]
}

impl Default for MediaSessionOptions {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
            notification: NotificationStyle::default(),
            skip_interval_secs: default_skip_interval_secs(),
            artwork: ArtworkPolicy::default(),
        }
    }
}

impl Default for NotificationStyle {
    fn default() -> Self {
        Self {
            icon: None,
            large_icon_enabled: true,
            color: None,
            show_when_closed: false,
        }
    }
}

impl Default for ArtworkPolicy {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_artwork_timeout_secs(),
            read_timeout_secs: default_artwork_timeout_secs(),
            max_edge_px: default_artwork_max_edge_px(),
            worker_threads: default_artwork_worker_threads(),
        }
    }
}

impl MediaSessionOptions {
    /// Clamps out-of-range values instead of failing `enable`.
    pub fn sanitize(mut self) -> Self {
        self.skip_interval_secs = self.skip_interval_secs.clamp(1, 600);
        self.artwork.connect_timeout_secs = self.artwork.connect_timeout_secs.clamp(1, 120);
        self.artwork.read_timeout_secs = self.artwork.read_timeout_secs.clamp(1, 120);
        self.artwork.max_edge_px = self.artwork.max_edge_px.clamp(64, 4096);
        self.artwork.worker_threads = self.artwork.worker_threads.clamp(1, 8);
        let mut seen = BTreeSet::new();
        self.capabilities.retain(|kind| seen.insert(*kind));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_advertise_core_transport_controls() {
        let options = MediaSessionOptions::default();
        assert!(options.capabilities.contains(&CommandKind::Play));
        assert!(options.capabilities.contains(&CommandKind::Pause));
        assert!(!options.capabilities.contains(&CommandKind::SetRating));
        assert!(options.notification.large_icon_enabled);
        assert!(!options.notification.show_when_closed);
    }

    #[test]
    fn test_sanitize_clamps_out_of_range_values() {
        let options = MediaSessionOptions {
            skip_interval_secs: 0,
            artwork: ArtworkPolicy {
                connect_timeout_secs: 0,
                read_timeout_secs: 9_999,
                max_edge_px: 1,
                worker_threads: 64,
            },
            ..MediaSessionOptions::default()
        };
        let sanitized = options.sanitize();
        assert_eq!(sanitized.skip_interval_secs, 1);
        assert_eq!(sanitized.artwork.connect_timeout_secs, 1);
        assert_eq!(sanitized.artwork.read_timeout_secs, 120);
        assert_eq!(sanitized.artwork.max_edge_px, 64);
        assert_eq!(sanitized.artwork.worker_threads, 8);
    }

    #[test]
    fn test_sanitize_drops_duplicate_capabilities_keeping_order() {
        let options = MediaSessionOptions {
            capabilities: vec![
                CommandKind::Play,
                CommandKind::Pause,
                CommandKind::Play,
                CommandKind::NextTrack,
                CommandKind::Pause,
            ],
            ..MediaSessionOptions::default()
        };
        assert_eq!(
            options.sanitize().capabilities,
            vec![CommandKind::Play, CommandKind::Pause, CommandKind::NextTrack]
        );
    }

    #[test]
    fn test_options_parse_from_partial_toml() {
        let parsed: MediaSessionOptions = toml::from_str(
            r#"
            capabilities = ["play", "pause", "set_rating"]
            skip_interval_secs = 30

            [notification]
            icon = "ic_player_note"
            show_when_closed = true
            "#,
        )
        .expect("partial options should deserialize");

        assert_eq!(parsed.capabilities.len(), 3);
        assert!(parsed.capabilities.contains(&CommandKind::SetRating));
        assert_eq!(parsed.skip_interval_secs, 30);
        assert_eq!(parsed.notification.icon.as_deref(), Some("ic_player_note"));
        assert!(parsed.notification.show_when_closed);
        // Unspecified sections fall back to defaults.
        assert_eq!(parsed.artwork.max_edge_px, 1024);
    }

    #[test]
    fn test_options_toml_round_trip() {
        let options = MediaSessionOptions::default();
        let text = toml::to_string(&options).expect("options should serialize");
        let parsed: MediaSessionOptions =
            toml::from_str(&text).expect("serialized options should parse back");
        assert_eq!(parsed, options);
    }
}
