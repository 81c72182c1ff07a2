//! Audio-focus arbitration.
//!
//! The arbiter owns the platform focus token. Requests run on a helper
//! thread (platform focus calls may block) and their outcome re-enters the
//! coordinator mailbox as a message; focus-change callbacks arrive the same
//! way. Focus is advisory: a denied request never gates playback.

use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::FocusError;
use crate::protocol::{
    AudioInterruption, CoordinatorMessage, FocusChange, InterruptionCategory, InterruptionPhase,
};

/// Platform audio-focus primitives.
///
/// `request_focus` may block on the platform; the arbiter always calls it
/// off the coordinator thread. Implementations report asynchronous focus
/// changes through `CommandDispatcher::dispatch_focus_change`.
pub trait FocusBackend: Send + Sync {
    /// Requests audio focus. `Ok(true)` means focus was granted.
    fn request_focus(&self) -> Result<bool, FocusError>;
    /// Abandons any held focus. Must be idempotent.
    fn abandon_focus(&self);
}

/// Backend that always grants focus and holds nothing. Useful on platforms
/// without focus arbitration and in tests.
pub struct NoopFocusBackend;

impl FocusBackend for NoopFocusBackend {
    fn request_focus(&self) -> Result<bool, FocusError> {
        Ok(true)
    }

    fn abandon_focus(&self) {}
}

/// Arbiter state over the platform focus token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusState {
    #[default]
    Idle,
    Requesting,
    Held,
    LostTransient,
    LostPermanent,
}

/// What the coordinator must do after a focus change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusReaction {
    /// Force `Playing -> Paused` before accepting further mutations.
    pub force_pause: bool,
    /// Interruption event to fan out to subscribers.
    pub interruption: AudioInterruption,
}

/// Owns the focus token; mutated only from the coordinator loop.
pub struct AudioFocusArbiter {
    backend: Arc<dyn FocusBackend>,
    mailbox: UnboundedSender<CoordinatorMessage>,
    state: FocusState,
}

impl AudioFocusArbiter {
    pub fn new(backend: Arc<dyn FocusBackend>, mailbox: UnboundedSender<CoordinatorMessage>) -> Self {
        Self {
            backend,
            mailbox,
            state: FocusState::Idle,
        }
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    /// Kicks off a focus request unless one is already held or in flight.
    /// The outcome arrives as `FocusRequestCompleted`.
    pub fn begin_request(&mut self) {
        match self.state {
            FocusState::Held | FocusState::Requesting => return,
            _ => {}
        }
        self.state = FocusState::Requesting;
        let backend = Arc::clone(&self.backend);
        let mailbox = self.mailbox.clone();
        thread::spawn(move || {
            let result = backend.request_focus();
            let _ = mailbox.send(CoordinatorMessage::FocusRequestCompleted { result });
        });
    }

    /// Records the outcome of an in-flight request.
    pub fn on_request_completed(&mut self, result: Result<bool, FocusError>) {
        if self.state != FocusState::Requesting {
            // A release or loss superseded the request; the token, if
            // granted, was already abandoned by release().
            debug!("AudioFocusArbiter: ignoring completion in state {:?}", self.state);
            return;
        }
        match result {
            Ok(true) => self.state = FocusState::Held,
            Ok(false) => {
                warn!("AudioFocusArbiter: focus denied, playback proceeds without it");
                self.state = FocusState::Idle;
            }
            Err(err) => {
                warn!("AudioFocusArbiter: focus request failed: {}", err);
                self.state = FocusState::Idle;
            }
        }
    }

    /// Returns to Idle, abandoning any held token. Idempotent.
    pub fn release(&mut self) {
        if self.state == FocusState::Idle {
            return;
        }
        self.state = FocusState::Idle;
        let backend = Arc::clone(&self.backend);
        thread::spawn(move || backend.abandon_focus());
    }

    /// Applies an asynchronous focus change and tells the coordinator how to
    /// react. Returns `None` when the change needs no observable reaction
    /// (a regain while focus was never lost, for example).
    pub fn on_change(&mut self, change: FocusChange) -> Option<FocusReaction> {
        match change {
            FocusChange::PermanentLoss => {
                self.state = FocusState::LostPermanent;
                Some(FocusReaction {
                    force_pause: true,
                    interruption: AudioInterruption {
                        phase: InterruptionPhase::Begin,
                        category: InterruptionCategory::Permanent,
                        should_resume: false,
                    },
                })
            }
            FocusChange::TransientLoss => {
                self.state = FocusState::LostTransient;
                Some(FocusReaction {
                    force_pause: true,
                    interruption: AudioInterruption {
                        phase: InterruptionPhase::Begin,
                        category: InterruptionCategory::Transient,
                        should_resume: true,
                    },
                })
            }
            FocusChange::TransientLossCanDuck => {
                // The platform allows continued playback at reduced volume;
                // ducking is the application's decision.
                self.state = FocusState::LostTransient;
                Some(FocusReaction {
                    force_pause: false,
                    interruption: AudioInterruption {
                        phase: InterruptionPhase::Begin,
                        category: InterruptionCategory::TransientCanDuck,
                        should_resume: true,
                    },
                })
            }
            FocusChange::Regained => {
                let was_lost = matches!(
                    self.state,
                    FocusState::LostTransient | FocusState::LostPermanent
                );
                self.state = FocusState::Held;
                if !was_lost {
                    return None;
                }
                Some(FocusReaction {
                    force_pause: false,
                    interruption: AudioInterruption {
                        phase: InterruptionPhase::End,
                        category: InterruptionCategory::Transient,
                        should_resume: true,
                    },
                })
            }
        }
    }
}
