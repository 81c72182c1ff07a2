//! Lifecycle of the background execution context keeping the session alive.
//!
//! Start and bind are opaque host primitives that may block, so they run on
//! helper threads; completions re-enter the coordinator mailbox stamped with
//! the epoch current when the transition began. A completion whose epoch no
//! longer matches is stale and ignored, which is what makes rapid
//! enable/disable/enable cycles safe.

use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::LifecycleError;
use crate::protocol::CoordinatorMessage;
use crate::session_state::{PlaybackStatus, TrackMetadata};

/// Host primitives for the background execution context.
///
/// Both calls may block; the lifecycle never invokes them on the coordinator
/// thread.
pub trait ServiceHost: Send + Sync {
    /// Whether the host process can start a service at all.
    fn available(&self) -> bool {
        true
    }
    /// Starts the execution context.
    fn start_service(&self) -> Result<(), LifecycleError>;
    /// Binds the communication channel to the started context.
    fn bind_channel(&self) -> Result<(), LifecycleError>;
    /// Stops the execution context. Must be idempotent.
    fn stop_service(&self);
}

/// Host that starts instantly and holds nothing. Used on platforms without a
/// separate execution context and in tests.
pub struct NoopServiceHost;

impl ServiceHost for NoopServiceHost {
    fn start_service(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn bind_channel(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn stop_service(&self) {}
}

/// Connection state of the execution context. Transitions are linear; no
/// transition skips a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Work deferred while the execution context is not yet Connected. Replayed
/// in arrival order once the connection is up.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferedOp {
    Metadata(TrackMetadata),
    Playback {
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
    },
    SubmitNotification,
}

/// Outcome of a start completion, interpreted by the coordinator.
#[derive(Debug, PartialEq)]
pub enum StartOutcome {
    /// Connected; replay these buffered operations in order.
    Connected(Vec<BufferedOp>),
    Failed(LifecycleError),
    /// The completion belongs to a superseded start attempt.
    Stale,
}

/// State machine over the host's start/bind/stop primitives. Mutated only
/// from the coordinator loop.
pub struct ServiceLifecycle {
    host: Arc<dyn ServiceHost>,
    mailbox: UnboundedSender<CoordinatorMessage>,
    state: ServiceConnectionState,
    epoch: u64,
    buffer: Vec<BufferedOp>,
}

impl ServiceLifecycle {
    pub fn new(host: Arc<dyn ServiceHost>, mailbox: UnboundedSender<CoordinatorMessage>) -> Self {
        Self {
            host,
            mailbox,
            state: ServiceConnectionState::Disconnected,
            epoch: 0,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> ServiceConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ServiceConnectionState::Connected
    }

    /// Begins Disconnected -> Connecting. The start and bind run on a helper
    /// thread; the outcome arrives as `ServiceStartCompleted` stamped with
    /// the returned epoch.
    pub fn begin_start(&mut self) -> Result<u64, LifecycleError> {
        if !self.host.available() {
            return Err(LifecycleError::HostUnavailable);
        }
        debug_assert_eq!(self.state, ServiceConnectionState::Disconnected);
        self.state = ServiceConnectionState::Connecting;
        self.epoch += 1;
        let epoch = self.epoch;
        let host = Arc::clone(&self.host);
        let mailbox = self.mailbox.clone();
        thread::spawn(move || {
            let result = host.start_service().and_then(|()| host.bind_channel());
            let _ = mailbox.send(CoordinatorMessage::ServiceStartCompleted { epoch, result });
        });
        Ok(epoch)
    }

    /// Applies a start completion. Stale epochs mean the attempt was
    /// superseded by a later transition; the host side was (or will be)
    /// stopped by that transition.
    pub fn on_start_completed(
        &mut self,
        epoch: u64,
        result: Result<(), LifecycleError>,
    ) -> StartOutcome {
        if epoch != self.epoch || self.state != ServiceConnectionState::Connecting {
            debug!(
                "ServiceLifecycle: discarding stale start completion (epoch {}, current {})",
                epoch, self.epoch
            );
            return StartOutcome::Stale;
        }
        match result {
            Ok(()) => {
                info!("ServiceLifecycle: connected");
                self.state = ServiceConnectionState::Connected;
                StartOutcome::Connected(std::mem::take(&mut self.buffer))
            }
            Err(err) => {
                warn!("ServiceLifecycle: start failed: {}", err);
                self.state = ServiceConnectionState::Disconnected;
                StartOutcome::Failed(err)
            }
        }
    }

    /// Begins Connected -> Disconnecting. Stop runs on a helper thread; the
    /// completion arrives as `ServiceStopCompleted`. Buffered work for the
    /// old connection is dropped.
    pub fn begin_stop(&mut self) -> u64 {
        debug_assert_eq!(self.state, ServiceConnectionState::Connected);
        self.state = ServiceConnectionState::Disconnecting;
        self.epoch += 1;
        self.buffer.clear();
        let epoch = self.epoch;
        let host = Arc::clone(&self.host);
        let mailbox = self.mailbox.clone();
        thread::spawn(move || {
            host.stop_service();
            let _ = mailbox.send(CoordinatorMessage::ServiceStopCompleted { epoch });
        });
        epoch
    }

    /// Applies a stop completion. Returns whether Disconnected was reached.
    pub fn on_stop_completed(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.state != ServiceConnectionState::Disconnecting {
            debug!("ServiceLifecycle: discarding stale stop completion");
            return false;
        }
        info!("ServiceLifecycle: disconnected");
        self.state = ServiceConnectionState::Disconnected;
        true
    }

    /// Defers one operation until the connection is up.
    ///
    /// The buffer keeps at most one entry per kind, so a session that never
    /// connects cannot accumulate unbounded work. A newer metadata or
    /// notification op replaces its predecessor outright; a newer playback op
    /// absorbs a predecessor's explicit position so a status-only update
    /// still lands on the right offset. Rate is never inherited, since apply
    /// derives its default from the new status.
    pub fn buffer(&mut self, op: BufferedOp) {
        debug_assert_ne!(self.state, ServiceConnectionState::Connected);
        let op = match op {
            BufferedOp::Playback {
                status,
                position_ms,
                rate,
            } => {
                let prior_position = self.buffer.iter().find_map(|existing| match existing {
                    BufferedOp::Playback { position_ms, .. } => *position_ms,
                    _ => None,
                });
                self.buffer
                    .retain(|existing| !matches!(existing, BufferedOp::Playback { .. }));
                BufferedOp::Playback {
                    status,
                    position_ms: position_ms.or(prior_position),
                    rate,
                }
            }
            BufferedOp::Metadata(metadata) => {
                self.buffer
                    .retain(|existing| !matches!(existing, BufferedOp::Metadata(_)));
                BufferedOp::Metadata(metadata)
            }
            BufferedOp::SubmitNotification => {
                self.buffer
                    .retain(|existing| !matches!(existing, BufferedOp::SubmitNotification));
                BufferedOp::SubmitNotification
            }
        };
        self.buffer.push(op);
    }

    #[cfg(test)]
    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct CountingHost {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    impl CountingHost {
        fn new(fail_start: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start,
            })
        }
    }

    impl ServiceHost for CountingHost {
        fn start_service(&self) -> Result<(), LifecycleError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                Err(LifecycleError::StartFailed("boom".to_string()))
            } else {
                Ok(())
            }
        }

        fn bind_channel(&self) -> Result<(), LifecycleError> {
            Ok(())
        }

        fn stop_service(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for_message(
        rx: &mut mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) -> CoordinatorMessage {
        for _ in 0..200 {
            if let Ok(message) = rx.try_recv() {
                return message;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no mailbox message arrived");
    }

    #[test]
    fn test_start_completion_reaches_connected_and_drains_buffer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut lifecycle = ServiceLifecycle::new(CountingHost::new(false), tx);

        let epoch = lifecycle.begin_start().unwrap();
        assert_eq!(lifecycle.state(), ServiceConnectionState::Connecting);
        lifecycle.buffer(BufferedOp::SubmitNotification);
        lifecycle.buffer(BufferedOp::Playback {
            status: PlaybackStatus::Playing,
            position_ms: Some(0),
            rate: None,
        });

        let result = match wait_for_message(&mut rx) {
            CoordinatorMessage::ServiceStartCompleted { epoch: got, result } => {
                assert_eq!(got, epoch);
                result
            }
            other => panic!("expected ServiceStartCompleted, got {:?}", other),
        };
        match lifecycle.on_start_completed(epoch, result) {
            StartOutcome::Connected(ops) => {
                assert_eq!(ops.len(), 2);
                assert_eq!(ops[0], BufferedOp::SubmitNotification);
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        assert!(lifecycle.is_connected());
        assert_eq!(lifecycle.buffered_len(), 0);
    }

    #[test]
    fn test_failed_start_returns_to_disconnected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut lifecycle = ServiceLifecycle::new(CountingHost::new(true), tx);

        let epoch = lifecycle.begin_start().unwrap();
        let result = match wait_for_message(&mut rx) {
            CoordinatorMessage::ServiceStartCompleted { result, .. } => result,
            other => panic!("unexpected message {:?}", other),
        };
        assert!(matches!(
            lifecycle.on_start_completed(epoch, result),
            StartOutcome::Failed(LifecycleError::StartFailed(_))
        ));
        assert_eq!(lifecycle.state(), ServiceConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_start_completion_is_discarded() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut lifecycle = ServiceLifecycle::new(CountingHost::new(false), tx);

        let first = lifecycle.begin_start().unwrap();
        // A later transition bumps the epoch before the first completion
        // lands.
        lifecycle.state = ServiceConnectionState::Connected;
        let _second = lifecycle.begin_stop();

        assert_eq!(
            lifecycle.on_start_completed(first, Ok(())),
            StartOutcome::Stale
        );
        assert_eq!(lifecycle.state(), ServiceConnectionState::Disconnecting);
    }

    #[test]
    fn test_stop_completion_reaches_disconnected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = CountingHost::new(false);
        let mut lifecycle = ServiceLifecycle::new(host.clone(), tx);
        lifecycle.state = ServiceConnectionState::Connected;

        let epoch = lifecycle.begin_stop();
        assert_eq!(lifecycle.state(), ServiceConnectionState::Disconnecting);

        match wait_for_message(&mut rx) {
            CoordinatorMessage::ServiceStopCompleted { epoch: got } => {
                assert!(lifecycle.on_stop_completed(got));
                assert_eq!(got, epoch);
            }
            other => panic!("expected ServiceStopCompleted, got {:?}", other),
        }
        assert_eq!(lifecycle.state(), ServiceConnectionState::Disconnected);
        assert_eq!(host.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffer_keeps_one_op_per_kind() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut lifecycle = ServiceLifecycle::new(CountingHost::new(false), tx);

        for index in 0i64..100 {
            lifecycle.buffer(BufferedOp::Metadata(TrackMetadata {
                title: Some(format!("track {}", index)),
                ..TrackMetadata::default()
            }));
            lifecycle.buffer(BufferedOp::Playback {
                status: PlaybackStatus::Playing,
                position_ms: Some(index * 1_000),
                rate: None,
            });
            lifecycle.buffer(BufferedOp::SubmitNotification);
        }
        // A status-only update keeps the last explicit position.
        lifecycle.buffer(BufferedOp::Playback {
            status: PlaybackStatus::Paused,
            position_ms: None,
            rate: None,
        });

        assert_eq!(lifecycle.buffered_len(), 3);
        assert!(lifecycle.buffer.iter().any(|op| matches!(
            op,
            BufferedOp::Metadata(meta) if meta.title.as_deref() == Some("track 99")
        )));
        assert!(lifecycle.buffer.contains(&BufferedOp::Playback {
            status: PlaybackStatus::Paused,
            position_ms: Some(99_000),
            rate: None,
        }));
    }

    #[test]
    fn test_begin_stop_drops_buffered_work() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut lifecycle = ServiceLifecycle::new(CountingHost::new(false), tx);
        lifecycle.state = ServiceConnectionState::Connecting;
        lifecycle.buffer(BufferedOp::SubmitNotification);
        lifecycle.state = ServiceConnectionState::Connected;

        lifecycle.begin_stop();
        assert_eq!(lifecycle.buffered_len(), 0);
    }

    struct UnavailableHost;

    impl ServiceHost for UnavailableHost {
        fn available(&self) -> bool {
            false
        }

        fn start_service(&self) -> Result<(), LifecycleError> {
            unreachable!("start must not be called when the host is unavailable")
        }

        fn bind_channel(&self) -> Result<(), LifecycleError> {
            unreachable!()
        }

        fn stop_service(&self) {}
    }

    #[test]
    fn test_unavailable_host_fails_fast() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut lifecycle = ServiceLifecycle::new(Arc::new(UnavailableHost), tx);
        assert_eq!(
            lifecycle.begin_start(),
            Err(LifecycleError::HostUnavailable)
        );
        assert_eq!(lifecycle.state(), ServiceConnectionState::Disconnected);
    }
}
