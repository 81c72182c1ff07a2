//! Desktop media-controls widget (MPRIS/SMTC/Now Playing).
//!
//! Adapts the platform integration provided by `souvlaki` to the session's
//! notification and command contracts: snapshots are published as metadata
//! and playback state, and platform control events come back through the
//! command dispatcher. The adapter holds a dispatcher, never the
//! coordinator itself.

use std::sync::{Arc, Mutex};

use log::warn;
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig, SeekDirection,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::notification_builder::{NotificationSink, NotificationSnapshot};
use crate::protocol::{CommandKind, CommandPayload};

#[derive(Debug, Clone, Copy, Default)]
struct WidgetState {
    is_playing: bool,
}

/// Platform widget handle implementing the notification sink over souvlaki.
pub struct MediaWidget {
    controls: Mutex<Option<MediaControls>>,
    widget_state: Arc<Mutex<WidgetState>>,
}

impl MediaWidget {
    /// Creates the widget and attaches the platform control handler. If the
    /// platform backend cannot be created the widget degrades to a no-op and
    /// the session keeps running without a desktop surface.
    pub fn new(display_name: &str, dbus_name: &str, dispatcher: CommandDispatcher) -> Self {
        let widget_state = Arc::new(Mutex::new(WidgetState::default()));
        let controls = Self::create_controls(display_name, dbus_name, dispatcher, &widget_state);
        Self {
            controls: Mutex::new(controls),
            widget_state,
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn create_controls(
        display_name: &str,
        dbus_name: &str,
        dispatcher: CommandDispatcher,
        widget_state: &Arc<Mutex<WidgetState>>,
    ) -> Option<MediaControls> {
        let mut controls = match MediaControls::new(PlatformConfig {
            display_name,
            dbus_name,
            hwnd: None,
        }) {
            Ok(controls) => controls,
            Err(err) => {
                warn!("MediaWidget: failed to create media controls backend: {}", err);
                return None;
            }
        };

        let handler_state = Arc::clone(widget_state);
        if let Err(err) = controls.attach(move |event| {
            let snapshot = match handler_state.lock() {
                Ok(state) => *state,
                Err(poisoned) => *poisoned.into_inner(),
            };
            if let MediaControlEvent::SetVolume(volume) = &event {
                dispatcher.dispatch_volume(*volume as f32, true);
                return;
            }
            if let Some((kind, payload)) = Self::map_control_event(event, snapshot) {
                dispatcher.dispatch(kind, payload);
            }
        }) {
            warn!("MediaWidget: failed to attach media controls handler: {}", err);
            return None;
        }

        Some(controls)
    }

    #[cfg(target_os = "windows")]
    fn create_controls(
        _display_name: &str,
        _dbus_name: &str,
        _dispatcher: CommandDispatcher,
        _widget_state: &Arc<Mutex<WidgetState>>,
    ) -> Option<MediaControls> {
        // Souvlaki requires an HWND on Windows, which the embedding
        // application must supply; no generic wiring exists here.
        warn!("MediaWidget: Windows media controls are disabled without HWND wiring");
        None
    }

    fn map_control_event(
        event: MediaControlEvent,
        state: WidgetState,
    ) -> Option<(CommandKind, Option<CommandPayload>)> {
        match event {
            MediaControlEvent::Play => Some((CommandKind::Play, None)),
            MediaControlEvent::Pause => Some((CommandKind::Pause, None)),
            MediaControlEvent::Toggle => {
                if state.is_playing {
                    Some((CommandKind::Pause, None))
                } else {
                    Some((CommandKind::Play, None))
                }
            }
            MediaControlEvent::Next => Some((CommandKind::NextTrack, None)),
            MediaControlEvent::Previous => Some((CommandKind::PreviousTrack, None)),
            MediaControlEvent::Stop => Some((CommandKind::Stop, None)),
            MediaControlEvent::SetPosition(position) => Some((
                CommandKind::Seek,
                Some(CommandPayload::SeekTo {
                    position_seconds: position.0.as_secs_f64(),
                }),
            )),
            MediaControlEvent::SeekBy(direction, delta) => {
                let seconds = delta.as_secs().max(1) as u32;
                let kind = match direction {
                    SeekDirection::Forward => CommandKind::SkipForward,
                    SeekDirection::Backward => CommandKind::SkipBackward,
                };
                Some((kind, Some(CommandPayload::SkipInterval { seconds })))
            }
            // Without an explicit interval the coordinator applies the
            // session's configured skip interval.
            MediaControlEvent::Seek(SeekDirection::Forward) => {
                Some((CommandKind::SkipForward, None))
            }
            MediaControlEvent::Seek(SeekDirection::Backward) => {
                Some((CommandKind::SkipBackward, None))
            }
            MediaControlEvent::SetVolume(_)
            | MediaControlEvent::OpenUri(_)
            | MediaControlEvent::Raise
            | MediaControlEvent::Quit => None,
        }
    }

    fn with_controls<F>(&self, publish: F)
    where
        F: FnOnce(&mut MediaControls) -> Result<(), souvlaki::Error>,
    {
        let mut controls = match self.controls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(controls) = controls.as_mut() {
            if let Err(err) = publish(controls) {
                warn!("MediaWidget: platform publish failed: {}", err);
            }
        }
    }
}

impl NotificationSink for MediaWidget {
    fn submit(&self, snapshot: &NotificationSnapshot) {
        match self.widget_state.lock() {
            Ok(mut state) => state.is_playing = snapshot.ongoing,
            Err(poisoned) => poisoned.into_inner().is_playing = snapshot.ongoing,
        }

        self.with_controls(|controls| {
            controls.set_metadata(MediaMetadata {
                title: (!snapshot.title.is_empty()).then_some(snapshot.title.as_str()),
                artist: (!snapshot.subtitle.is_empty()).then_some(snapshot.subtitle.as_str()),
                album: (!snapshot.subtext.is_empty()).then_some(snapshot.subtext.as_str()),
                cover_url: None,
                duration: None,
            })?;
            let playback = if snapshot.ongoing {
                MediaPlayback::Playing { progress: None }
            } else if snapshot.title.is_empty() {
                MediaPlayback::Stopped
            } else {
                MediaPlayback::Paused { progress: None }
            };
            controls.set_playback(playback)
        });
    }

    fn cancel(&self) {
        match self.widget_state.lock() {
            Ok(mut state) => state.is_playing = false,
            Err(poisoned) => poisoned.into_inner().is_playing = false,
        }
        self.with_controls(|controls| {
            controls.set_metadata(MediaMetadata::default())?;
            controls.set_playback(MediaPlayback::Stopped)
        });
    }
}
