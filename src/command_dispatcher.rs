//! Single funnel for OS remote-control callbacks.
//!
//! Platform adapters hold a `CommandDispatcher` (never the coordinator
//! itself) and push normalized commands into the mailbox in arrival order.
//! No reordering, no coalescing: rapid repeats of the same key are distinct
//! events.

use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{
    now_unix_ms, CommandKind, CommandPayload, CoordinatorMessage, RemoteCommand,
};

/// Cloneable command inlet backed by the coordinator mailbox.
#[derive(Clone)]
pub struct CommandDispatcher {
    mailbox: UnboundedSender<CoordinatorMessage>,
}

impl CommandDispatcher {
    pub(crate) fn new(mailbox: UnboundedSender<CoordinatorMessage>) -> Self {
        Self { mailbox }
    }

    /// Normalizes one remote-control callback and enqueues it.
    ///
    /// Returns the command as enqueued, or `None` if the coordinator has
    /// shut down (late platform callbacks after teardown are expected and
    /// harmless).
    pub fn dispatch(
        &self,
        kind: CommandKind,
        payload: Option<CommandPayload>,
    ) -> Option<RemoteCommand> {
        let command = RemoteCommand {
            kind,
            payload,
            timestamp_ms: now_unix_ms(),
        };
        match self.mailbox.send(CoordinatorMessage::Remote(command.clone())) {
            Ok(()) => Some(command),
            Err(_) => {
                debug!("CommandDispatcher: dropping {:?}, coordinator gone", kind);
                None
            }
        }
    }

    /// Forwards a platform volume change to subscribers.
    pub fn dispatch_volume(&self, volume: f32, user_initiated: bool) {
        let clamped = volume.clamp(0.0, 1.0);
        let _ = self.mailbox.send(CoordinatorMessage::VolumeChanged {
            volume: clamped,
            user_initiated,
        });
    }

    /// Forwards a mapped audio-focus change from the platform.
    pub fn dispatch_focus_change(&self, change: crate::protocol::FocusChange) {
        let _ = self.mailbox.send(CoordinatorMessage::FocusChanged(change));
    }
}
