//! Notification snapshot construction and submission.
//!
//! Building is a pure function of the session snapshot plus resolved
//! artwork; submission runs on its own thread through a single pending slot,
//! so a newer snapshot supersedes one that has not been handed to the
//! platform yet instead of queueing behind it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use uuid::Uuid;

use crate::options::NotificationStyle;
use crate::session_state::{ImageBytes, PlaybackStatus, SessionState};

/// Conventional resource names probed when the caller declares no icon.
const DEFAULT_ICON_CANDIDATES: &[&str] = &["ic_media_notification", "ic_music_note"];

/// Last-resort icon every platform surface can render.
const PLATFORM_DEFAULT_ICON: &str = "stat_sys_media";

/// Icon resources available to the notification.
pub trait IconRepository: Send + Sync {
    /// Whether a drawable resource with this name exists.
    fn contains(&self, name: &str) -> bool;
    /// The application launcher icon resource, if one is declared.
    fn launcher_icon(&self) -> Option<String>;
}

/// Repository with no resources; every lookup falls through to the platform
/// default icon.
pub struct EmptyIconRepository;

impl IconRepository for EmptyIconRepository {
    fn contains(&self, _name: &str) -> bool {
        false
    }

    fn launcher_icon(&self) -> Option<String> {
        None
    }
}

/// Platform widget handle. `submit` may block on IPC; the builder only calls
/// it from the submission thread.
pub trait NotificationSink: Send + Sync {
    fn submit(&self, snapshot: &NotificationSnapshot);
    fn cancel(&self);
}

/// Immutable, fully-computed description of what the playback widget should
/// display. Rebuilt wholesale on every rendering-relevant change, never
/// patched.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSnapshot {
    pub title: String,
    pub subtitle: String,
    pub subtext: String,
    pub small_icon: String,
    pub large_icon: Option<ImageBytes>,
    pub accent_color: Option<u32>,
    /// Keeps the notification non-dismissable while playback is active.
    pub ongoing: bool,
    pub session_token: Uuid,
    pub generation: u64,
}

/// Picks the first icon resource that exists, in declared-preference order.
pub fn resolve_small_icon(style: &NotificationStyle, icons: &dyn IconRepository) -> String {
    if let Some(declared) = &style.icon {
        if icons.contains(declared) {
            return declared.clone();
        }
        debug!("NotificationBuilder: declared icon `{}` not found", declared);
    }
    for candidate in DEFAULT_ICON_CANDIDATES {
        if icons.contains(candidate) {
            return (*candidate).to_string();
        }
    }
    if let Some(launcher) = icons.launcher_icon() {
        return launcher;
    }
    PLATFORM_DEFAULT_ICON.to_string()
}

/// Derives a snapshot from the current session state and resolved artwork.
pub fn build_snapshot(
    state: &SessionState,
    artwork: Option<&ImageBytes>,
    style: &NotificationStyle,
    icons: &dyn IconRepository,
    session_token: Uuid,
) -> NotificationSnapshot {
    let metadata = state.metadata.as_ref();
    let large_icon = if style.large_icon_enabled {
        artwork.cloned()
    } else {
        None
    };
    NotificationSnapshot {
        title: metadata.and_then(|meta| meta.title.clone()).unwrap_or_default(),
        subtitle: metadata.and_then(|meta| meta.artist.clone()).unwrap_or_default(),
        subtext: metadata.and_then(|meta| meta.album.clone()).unwrap_or_default(),
        small_icon: resolve_small_icon(style, icons),
        large_icon,
        accent_color: style.color.or_else(|| metadata.and_then(|meta| meta.accent_color)),
        ongoing: matches!(
            state.playback_status,
            PlaybackStatus::Playing | PlaybackStatus::Buffering
        ),
        session_token,
        generation: state.generation,
    }
}

enum SubmitOp {
    Submit(NotificationSnapshot),
    Cancel,
}

struct SubmitSlot {
    pending: Option<SubmitOp>,
    shutdown: bool,
}

/// Serializes submissions to the platform widget through one pending slot.
///
/// Enqueueing while a submission is in flight replaces the pending slot;
/// only the most recent snapshot per generation is guaranteed visible. A
/// snapshot whose generation no longer matches the live generation at
/// hand-off time is dropped.
pub struct NotificationSubmitter {
    slot: Arc<(Mutex<SubmitSlot>, Condvar)>,
    live_generation: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationSubmitter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        let slot = Arc::new((
            Mutex::new(SubmitSlot {
                pending: None,
                shutdown: false,
            }),
            Condvar::new(),
        ));
        let live_generation = Arc::new(AtomicU64::new(0));

        let worker_slot = Arc::clone(&slot);
        let worker_generation = Arc::clone(&live_generation);
        let worker = thread::Builder::new()
            .name("notification-submitter".to_string())
            .spawn(move || submit_loop(sink, worker_slot, worker_generation))
            .unwrap_or_else(|error| panic!("failed to spawn notification submitter: {error}"));

        Self {
            slot,
            live_generation,
            worker: Some(worker),
        }
    }

    /// Marks `generation` as the only one whose snapshots may still reach
    /// the platform. Older pending snapshots are dropped at hand-off.
    pub fn set_live_generation(&self, generation: u64) {
        self.live_generation.store(generation, Ordering::SeqCst);
    }

    /// Enqueues a snapshot, superseding any not-yet-submitted one.
    pub fn enqueue(&self, snapshot: NotificationSnapshot) {
        self.enqueue_op(SubmitOp::Submit(snapshot));
    }

    /// Enqueues a cancel, superseding any pending snapshot.
    pub fn enqueue_cancel(&self) {
        self.enqueue_op(SubmitOp::Cancel);
    }

    fn enqueue_op(&self, op: SubmitOp) {
        let (lock, condvar) = &*self.slot;
        let mut slot = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.shutdown {
            return;
        }
        if slot.pending.is_some() {
            debug!("NotificationSubmitter: superseding pending submission");
        }
        slot.pending = Some(op);
        condvar.notify_one();
    }

    /// Drains nothing further and joins the worker.
    pub fn shutdown(&mut self) {
        {
            let (lock, condvar) = &*self.slot;
            let mut slot = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.shutdown = true;
            slot.pending = None;
            condvar.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for NotificationSubmitter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn submit_loop(
    sink: Arc<dyn NotificationSink>,
    slot: Arc<(Mutex<SubmitSlot>, Condvar)>,
    live_generation: Arc<AtomicU64>,
) {
    let (lock, condvar) = &*slot;
    loop {
        let op = {
            let mut guard = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            loop {
                if guard.shutdown {
                    return;
                }
                if let Some(op) = guard.pending.take() {
                    break op;
                }
                guard = match condvar.wait(guard) {
                    Ok(next) => next,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };
        // The platform call runs outside the lock so a superseding enqueue
        // never blocks on it.
        match op {
            SubmitOp::Submit(snapshot) => {
                if snapshot.generation != live_generation.load(Ordering::SeqCst) {
                    debug!(
                        "NotificationSubmitter: dropping snapshot for stale generation {}",
                        snapshot.generation
                    );
                    continue;
                }
                sink.submit(&snapshot);
            }
            SubmitOp::Cancel => sink.cancel(),
        }
    }
}

/// Sink that only logs. Used where no platform widget is wired up.
pub struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn submit(&self, snapshot: &NotificationSnapshot) {
        debug!(
            "NotificationSink: submit `{}` (generation {})",
            snapshot.title, snapshot.generation
        );
    }

    fn cancel(&self) {
        warn!("NotificationSink: cancel with no platform widget attached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_state::TrackMetadata;
    use std::collections::HashSet;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct FakeIcons {
        resources: HashSet<&'static str>,
        launcher: Option<&'static str>,
    }

    impl IconRepository for FakeIcons {
        fn contains(&self, name: &str) -> bool {
            self.resources.contains(name)
        }

        fn launcher_icon(&self) -> Option<String> {
            self.launcher.map(str::to_string)
        }
    }

    fn state_with_title(title: &str) -> SessionState {
        let mut state = SessionState::default();
        state.replace_metadata(TrackMetadata {
            title: Some(title.to_string()),
            artist: Some("Artist".to_string()),
            album: Some("Album".to_string()),
            accent_color: Some(0xff00_33cc),
            ..TrackMetadata::default()
        });
        state
    }

    #[test]
    fn test_icon_fallback_order() {
        let style_with_icon = NotificationStyle {
            icon: Some("ic_custom".to_string()),
            ..NotificationStyle::default()
        };

        let has_custom = FakeIcons {
            resources: ["ic_custom", "ic_music_note"].into_iter().collect(),
            launcher: Some("ic_launcher"),
        };
        assert_eq!(resolve_small_icon(&style_with_icon, &has_custom), "ic_custom");

        let conventional_only = FakeIcons {
            resources: ["ic_music_note"].into_iter().collect(),
            launcher: Some("ic_launcher"),
        };
        assert_eq!(
            resolve_small_icon(&style_with_icon, &conventional_only),
            "ic_music_note"
        );

        let launcher_only = FakeIcons {
            resources: HashSet::new(),
            launcher: Some("ic_launcher"),
        };
        assert_eq!(
            resolve_small_icon(&NotificationStyle::default(), &launcher_only),
            "ic_launcher"
        );

        assert_eq!(
            resolve_small_icon(&NotificationStyle::default(), &EmptyIconRepository),
            PLATFORM_DEFAULT_ICON
        );
    }

    #[test]
    fn test_snapshot_reflects_state_and_style() {
        let mut state = state_with_title("Song");
        state.apply_playback(PlaybackStatus::Playing, Some(0), None);
        let token = Uuid::new_v4();
        let artwork = ImageBytes {
            width: 2,
            height: 2,
            rgba: vec![0; 16],
        };

        let snapshot = build_snapshot(
            &state,
            Some(&artwork),
            &NotificationStyle::default(),
            &EmptyIconRepository,
            token,
        );
        assert_eq!(snapshot.title, "Song");
        assert_eq!(snapshot.subtitle, "Artist");
        assert_eq!(snapshot.subtext, "Album");
        assert!(snapshot.ongoing);
        assert_eq!(snapshot.large_icon, Some(artwork));
        assert_eq!(snapshot.accent_color, Some(0xff00_33cc));
        assert_eq!(snapshot.session_token, token);
        assert_eq!(snapshot.generation, state.generation);
    }

    #[test]
    fn test_style_color_overrides_metadata_accent() {
        let style = NotificationStyle {
            color: Some(0xffff_0000),
            large_icon_enabled: false,
            ..NotificationStyle::default()
        };
        let artwork = ImageBytes {
            width: 1,
            height: 1,
            rgba: vec![0; 4],
        };
        let snapshot = build_snapshot(
            &state_with_title("Song"),
            Some(&artwork),
            &style,
            &EmptyIconRepository,
            Uuid::new_v4(),
        );
        assert_eq!(snapshot.accent_color, Some(0xffff_0000));
        assert!(snapshot.large_icon.is_none());
    }

    #[test]
    fn test_paused_snapshot_is_not_ongoing() {
        let mut state = state_with_title("Song");
        state.apply_playback(PlaybackStatus::Paused, None, None);
        let snapshot = build_snapshot(
            &state,
            None,
            &NotificationStyle::default(),
            &EmptyIconRepository,
            Uuid::new_v4(),
        );
        assert!(!snapshot.ongoing);
    }

    struct GatedSink {
        submitted: Mutex<Vec<u64>>,
        gate: Mutex<std_mpsc::Receiver<()>>,
    }

    impl NotificationSink for GatedSink {
        fn submit(&self, snapshot: &NotificationSnapshot) {
            let _ = self.gate.lock().unwrap().recv();
            self.submitted.lock().unwrap().push(snapshot.generation);
        }

        fn cancel(&self) {}
    }

    fn snapshot_for_generation(generation: u64) -> NotificationSnapshot {
        NotificationSnapshot {
            title: String::new(),
            subtitle: String::new(),
            subtext: String::new(),
            small_icon: PLATFORM_DEFAULT_ICON.to_string(),
            large_icon: None,
            accent_color: None,
            ongoing: false,
            session_token: Uuid::nil(),
            generation,
        }
    }

    #[test]
    fn test_newer_snapshot_supersedes_pending_one() {
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let sink = Arc::new(GatedSink {
            submitted: Mutex::new(Vec::new()),
            gate: Mutex::new(gate_rx),
        });
        let mut submitter = NotificationSubmitter::new(sink.clone());

        // The first snapshot is picked up and blocks inside the sink; the
        // next two land in the slot and supersede each other.
        submitter.set_live_generation(1);
        submitter.enqueue(snapshot_for_generation(1));
        thread::sleep(Duration::from_millis(50));
        submitter.enqueue(snapshot_for_generation(1));
        submitter.enqueue(snapshot_for_generation(1));

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        submitter.shutdown();

        assert_eq!(sink.submitted.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stale_generation_snapshot_is_dropped_at_handoff() {
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let sink = Arc::new(GatedSink {
            submitted: Mutex::new(Vec::new()),
            gate: Mutex::new(gate_rx),
        });
        let mut submitter = NotificationSubmitter::new(sink.clone());

        submitter.set_live_generation(2);
        submitter.enqueue(snapshot_for_generation(1));
        submitter.enqueue(snapshot_for_generation(2));
        gate_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        submitter.shutdown();

        let submitted = sink.submitted.lock().unwrap();
        assert!(!submitted.contains(&1));
    }
}
