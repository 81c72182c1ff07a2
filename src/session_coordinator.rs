//! The session coordinator: sole owner of the session state.
//!
//! Every external trigger is a mailbox message and the loop processes them
//! strictly in arrival order, so no two mutations ever race. Application
//! calls block on a reply channel until their message has been processed;
//! background completions (artwork, focus, lifecycle) carry the generation
//! or epoch they were issued under and are discarded when stale.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::artwork_resolver::{ArtworkCatalog, ArtworkResolver, HttpArtworkCatalog};
use crate::audio_focus::{AudioFocusArbiter, FocusBackend, NoopFocusBackend};
use crate::command_dispatcher::CommandDispatcher;
use crate::error::{CoordinatorError, FocusError, LifecycleError, ResolveError};
use crate::event_bridge::{EventBridge, SubscriptionGuard};
use crate::notification_builder::{
    build_snapshot, EmptyIconRepository, IconRepository, LoggingNotificationSink,
    NotificationSink, NotificationSubmitter,
};
use crate::options::MediaSessionOptions;
use crate::protocol::{
    CommandKind, CommandPayload, CoordinatorMessage, FocusChange, RemoteCommand, Reply,
    SessionCall, SessionEvent,
};
use crate::service_lifecycle::{
    BufferedOp, NoopServiceHost, ServiceConnectionState, ServiceHost, ServiceLifecycle,
    StartOutcome,
};
use crate::session_state::{
    ImageBytes, PlaybackSnapshot, PlaybackStatus, ResolutionState, SessionState, TrackMetadata,
};

/// Platform seams injected into the coordinator. OS-callback adapters hold a
/// `CommandDispatcher` back-reference into the coordinator, never ownership
/// of it.
pub struct SessionBackends {
    pub focus: Arc<dyn FocusBackend>,
    pub host: Arc<dyn ServiceHost>,
    pub icons: Arc<dyn IconRepository>,
    pub sink: Arc<dyn NotificationSink>,
    /// Artwork byte source. When absent, an HTTP catalog is built from the
    /// artwork policy at enable time.
    pub catalog: Option<Arc<dyn ArtworkCatalog>>,
}

impl SessionBackends {
    /// Backends that grant focus, start instantly, and render nowhere.
    pub fn noop() -> Self {
        Self {
            focus: Arc::new(NoopFocusBackend),
            host: Arc::new(NoopServiceHost),
            icons: Arc::new(EmptyIconRepository),
            sink: Arc::new(LoggingNotificationSink),
            catalog: None,
        }
    }
}

/// Blocking call surface over the coordinator mailbox.
///
/// Each method enqueues exactly one message and returns only after the
/// coordinator has processed it. Dropping the handle shuts the coordinator
/// down.
pub struct MediaSessionHandle {
    mailbox: UnboundedSender<CoordinatorMessage>,
    bridge: EventBridge,
    worker: Option<JoinHandle<()>>,
}

impl MediaSessionHandle {
    pub fn enable(&self, options: MediaSessionOptions) -> Result<(), CoordinatorError> {
        self.call(|reply| SessionCall::Enable { options, reply })
    }

    pub fn disable(&self) -> Result<(), CoordinatorError> {
        self.call(|reply| SessionCall::Disable { reply })
    }

    pub fn update_metadata(&self, metadata: TrackMetadata) -> Result<(), CoordinatorError> {
        self.call(|reply| SessionCall::UpdateMetadata { metadata, reply })
    }

    pub fn update_playback(
        &self,
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
    ) -> Result<(), CoordinatorError> {
        self.call(|reply| SessionCall::UpdatePlayback {
            status,
            position_ms,
            rate,
            reply,
        })
    }

    pub fn reset(&self) -> Result<(), CoordinatorError> {
        self.call(|reply| SessionCall::Reset { reply })
    }

    pub fn is_enabled(&self) -> Result<bool, CoordinatorError> {
        self.call(|reply| SessionCall::IsEnabled { reply })
    }

    pub fn current_metadata(&self) -> Result<Option<TrackMetadata>, CoordinatorError> {
        self.call(|reply| SessionCall::CurrentMetadata { reply })
    }

    pub fn current_state(&self) -> Result<PlaybackSnapshot, CoordinatorError> {
        self.call(|reply| SessionCall::CurrentState { reply })
    }

    /// Registers an event subscriber; dropping the guard unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionGuard
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.bridge.subscribe(callback)
    }

    pub fn events(&self) -> EventBridge {
        self.bridge.clone()
    }

    /// Inlet for platform adapters feeding remote commands in.
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.mailbox.clone())
    }

    /// Stops the coordinator and joins its thread. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let (reply, done) = oneshot::channel();
            if self.mailbox.send(CoordinatorMessage::Shutdown { reply }).is_ok() {
                let _ = done.blocking_recv();
            }
            let _ = worker.join();
        }
    }

    fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCall,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(CoordinatorMessage::Call(build(reply)))
            .map_err(|_| CoordinatorError::Disconnected)?;
        response
            .blocking_recv()
            .map_err(|_| CoordinatorError::Disconnected)?
    }
}

impl Drop for MediaSessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The actor owning `SessionState`. Lives on its own thread; everything it
/// touches is mutated only from `run`.
pub struct SessionCoordinator {
    mailbox: UnboundedSender<CoordinatorMessage>,
    state: SessionState,
    options: MediaSessionOptions,
    session_token: Uuid,
    bridge: EventBridge,
    focus: AudioFocusArbiter,
    lifecycle: ServiceLifecycle,
    resolver: Option<ArtworkResolver>,
    submitter: NotificationSubmitter,
    icons: Arc<dyn IconRepository>,
    catalog: Option<Arc<dyn ArtworkCatalog>>,
    resolved_artwork: Option<ImageBytes>,
    pending_enable: Option<Reply<()>>,
    /// Set when disable() arrived while the service was still Connecting;
    /// teardown runs as soon as the start completes.
    pending_disable_teardown: bool,
    /// An enable() that arrived while a previous connection was tearing
    /// down; resumed once the stop completes.
    pending_enable_after_stop: Option<(MediaSessionOptions, Reply<()>)>,
}

impl SessionCoordinator {
    /// Spawns the coordinator on a dedicated thread and returns its handle.
    pub fn spawn(backends: SessionBackends) -> MediaSessionHandle {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let bridge = EventBridge::new();

        let coordinator = Self {
            mailbox: mailbox.clone(),
            state: SessionState::default(),
            options: MediaSessionOptions::default(),
            session_token: Uuid::nil(),
            bridge: bridge.clone(),
            focus: AudioFocusArbiter::new(backends.focus, mailbox.clone()),
            lifecycle: ServiceLifecycle::new(backends.host, mailbox.clone()),
            resolver: None,
            submitter: NotificationSubmitter::new(backends.sink),
            icons: backends.icons,
            catalog: backends.catalog,
            resolved_artwork: None,
            pending_enable: None,
            pending_disable_teardown: false,
            pending_enable_after_stop: None,
        };

        let worker = thread::Builder::new()
            .name("session-coordinator".to_string())
            .spawn(move || coordinator.run(inbox))
            .unwrap_or_else(|error| panic!("failed to spawn session coordinator: {error}"));

        MediaSessionHandle {
            mailbox,
            bridge,
            worker: Some(worker),
        }
    }

    /// The serialized message loop.
    fn run(mut self, mut inbox: UnboundedReceiver<CoordinatorMessage>) {
        info!("SessionCoordinator: started");
        while let Some(message) = inbox.blocking_recv() {
            match message {
                CoordinatorMessage::Call(call) => self.handle_call(call),
                CoordinatorMessage::Remote(command) => self.handle_remote(command),
                CoordinatorMessage::FocusChanged(change) => self.handle_focus_change(change),
                CoordinatorMessage::FocusRequestCompleted { result } => {
                    self.handle_focus_request_completed(result)
                }
                CoordinatorMessage::ArtworkResolved { generation, result } => {
                    self.handle_artwork_resolved(generation, result)
                }
                CoordinatorMessage::ServiceStartCompleted { epoch, result } => {
                    self.handle_service_started(epoch, result)
                }
                CoordinatorMessage::ServiceStopCompleted { epoch } => {
                    self.handle_service_stopped(epoch)
                }
                CoordinatorMessage::VolumeChanged {
                    volume,
                    user_initiated,
                } => {
                    if self.state.enabled {
                        self.bridge.emit(&SessionEvent::VolumeChanged {
                            volume,
                            user_initiated,
                        });
                    }
                }
                CoordinatorMessage::Shutdown { reply } => {
                    self.teardown();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("SessionCoordinator: stopped");
    }

    fn handle_call(&mut self, call: SessionCall) {
        match call {
            SessionCall::Enable { options, reply } => self.handle_enable(options, reply),
            SessionCall::Disable { reply } => self.handle_disable(reply),
            SessionCall::UpdateMetadata { metadata, reply } => {
                self.handle_update_metadata(metadata, reply)
            }
            SessionCall::UpdatePlayback {
                status,
                position_ms,
                rate,
                reply,
            } => self.handle_update_playback(status, position_ms, rate, reply),
            SessionCall::Reset { reply } => self.handle_reset(reply),
            SessionCall::IsEnabled { reply } => {
                let _ = reply.send(Ok(self.state.enabled));
            }
            SessionCall::CurrentMetadata { reply } => {
                let _ = reply.send(Ok(self.state.metadata.clone()));
            }
            SessionCall::CurrentState { reply } => {
                let _ = reply.send(Ok(self.state.playback_snapshot()));
            }
        }
    }

    fn handle_enable(&mut self, options: MediaSessionOptions, reply: Reply<()>) {
        if self.state.enabled {
            // Idempotent: the service and existing state stay untouched.
            let _ = reply.send(Ok(()));
            return;
        }
        if self.lifecycle.state() != ServiceConnectionState::Disconnected {
            // A previous connection is still winding down; resume this
            // enable once it has fully stopped.
            if let Some((_, superseded)) = self.pending_enable_after_stop.take() {
                let _ = superseded.send(Err(LifecycleError::ShuttingDown.into()));
            }
            self.pending_enable_after_stop = Some((options, reply));
            return;
        }
        self.begin_enable(options, reply);
    }

    fn begin_enable(&mut self, options: MediaSessionOptions, reply: Reply<()>) {
        let options = options.sanitize();
        match self.lifecycle.begin_start() {
            Ok(_) => {
                self.state.enabled = true;
                self.state.capabilities = options.capabilities.iter().copied().collect();
                self.session_token = Uuid::new_v4();
                self.submitter.set_live_generation(self.state.generation);

                let catalog = self
                    .catalog
                    .clone()
                    .unwrap_or_else(|| Arc::new(HttpArtworkCatalog::new(&options.artwork)));
                let fresh =
                    ArtworkResolver::new(catalog, &options.artwork, self.mailbox.clone());
                if let Some(old) = self.resolver.replace(fresh) {
                    // The old pool joins on a helper thread so an in-flight
                    // fetch never stalls the mailbox.
                    thread::spawn(move || drop(old));
                }
                self.options = options;
                self.pending_enable = Some(reply);
            }
            Err(error) => {
                let _ = reply.send(Err(error.into()));
            }
        }
    }

    fn handle_disable(&mut self, reply: Reply<()>) {
        if !self.state.enabled {
            let _ = reply.send(Ok(()));
            return;
        }
        self.state.enabled = false;
        self.state.capabilities.clear();
        let generation = self.state.clear_content();
        self.resolved_artwork = None;
        self.submitter.set_live_generation(generation);
        self.submitter.enqueue_cancel();
        self.focus.release();

        match self.lifecycle.state() {
            ServiceConnectionState::Connected => {
                self.lifecycle.begin_stop();
            }
            ServiceConnectionState::Connecting => {
                self.pending_disable_teardown = true;
                if let Some(pending) = self.pending_enable.take() {
                    let _ = pending.send(Err(LifecycleError::ShuttingDown.into()));
                }
            }
            _ => {}
        }
        let _ = reply.send(Ok(()));
    }

    fn handle_update_metadata(&mut self, metadata: TrackMetadata, reply: Reply<()>) {
        if let Err(error) = metadata.validate() {
            let _ = reply.send(Err(error.into()));
            return;
        }
        if !self.state.enabled {
            // Buffered until the next enable rather than erroring.
            self.lifecycle.buffer(BufferedOp::Metadata(metadata));
            let _ = reply.send(Ok(()));
            return;
        }
        self.apply_metadata(metadata);
        let _ = reply.send(Ok(()));
    }

    fn apply_metadata(&mut self, metadata: TrackMetadata) {
        let generation = self.state.replace_metadata(metadata);
        self.resolved_artwork = None;
        self.submitter.set_live_generation(generation);

        let request = self
            .state
            .metadata
            .as_mut()
            .and_then(|meta| meta.artwork.as_mut())
            .map(|artwork| {
                artwork.resolution = ResolutionState::Loading(generation);
                artwork.source.clone()
            });
        if let (Some(source), Some(resolver)) = (request, self.resolver.as_ref()) {
            resolver.resolve(source, generation);
        }
        self.rebuild_and_submit();
    }

    fn handle_update_playback(
        &mut self,
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
        reply: Reply<()>,
    ) {
        if let Err(error) = SessionState::validate_playback(status, position_ms, rate) {
            let _ = reply.send(Err(error.into()));
            return;
        }
        if !self.state.enabled {
            self.lifecycle.buffer(BufferedOp::Playback {
                status,
                position_ms,
                rate,
            });
            let _ = reply.send(Ok(()));
            return;
        }
        self.apply_playback(status, position_ms, rate);
        let _ = reply.send(Ok(()));
    }

    fn apply_playback(
        &mut self,
        status: PlaybackStatus,
        position_ms: Option<i64>,
        rate: Option<f32>,
    ) {
        self.state.apply_playback(status, position_ms, rate);
        if status == PlaybackStatus::Playing {
            self.focus.begin_request();
        } else {
            self.focus.release();
        }
        self.rebuild_and_submit();
    }

    fn handle_reset(&mut self, reply: Reply<()>) {
        if self.state.enabled {
            let generation = self.state.clear_content();
            self.resolved_artwork = None;
            self.submitter.set_live_generation(generation);
            self.submitter.enqueue_cancel();
            self.focus.release();
        }
        let _ = reply.send(Ok(()));
    }

    fn handle_remote(&mut self, mut command: RemoteCommand) {
        if !self.state.enabled {
            debug!("SessionCoordinator: dropping {:?} while disabled", command.kind);
            return;
        }
        if !self.state.capabilities.contains(&command.kind) {
            debug!(
                "SessionCoordinator: dropping {:?} outside advertised capabilities",
                command.kind
            );
            return;
        }
        if command.payload.is_none()
            && matches!(
                command.kind,
                CommandKind::SkipForward | CommandKind::SkipBackward
            )
        {
            command.payload = Some(CommandPayload::SkipInterval {
                seconds: self.options.skip_interval_secs,
            });
        }
        match &command.payload {
            Some(CommandPayload::Rating(rating)) => {
                if let Err(error) = rating.validate() {
                    warn!("SessionCoordinator: dropping malformed rating: {}", error);
                    return;
                }
            }
            Some(CommandPayload::SeekTo { position_seconds }) => {
                if !position_seconds.is_finite() || *position_seconds < 0.0 {
                    warn!(
                        "SessionCoordinator: dropping seek to invalid position {}",
                        position_seconds
                    );
                    return;
                }
            }
            _ => {}
        }
        self.bridge.emit(&SessionEvent::Command(command));
    }

    fn handle_focus_change(&mut self, change: FocusChange) {
        if !self.state.enabled {
            return;
        }
        let Some(reaction) = self.focus.on_change(change) else {
            return;
        };
        if reaction.force_pause && self.state.playback_status == PlaybackStatus::Playing {
            self.state
                .apply_playback(PlaybackStatus::Paused, None, None);
            self.rebuild_and_submit();
        }
        self.bridge
            .emit(&SessionEvent::Interruption(reaction.interruption));
    }

    fn handle_focus_request_completed(&mut self, result: Result<bool, FocusError>) {
        self.focus.on_request_completed(result);
    }

    fn handle_artwork_resolved(
        &mut self,
        generation: u64,
        result: Result<ImageBytes, ResolveError>,
    ) {
        if generation != self.state.generation {
            debug!(
                "SessionCoordinator: discarding artwork for superseded generation {}",
                generation
            );
            return;
        }
        match result {
            Ok(image) => {
                if let Some(artwork) = self
                    .state
                    .metadata
                    .as_mut()
                    .and_then(|meta| meta.artwork.as_mut())
                {
                    artwork.resolution = ResolutionState::Resolved(image.clone());
                }
                self.resolved_artwork = Some(image);
                self.rebuild_and_submit();
            }
            Err(error) => {
                // The notification stays up without a large icon.
                warn!("SessionCoordinator: artwork resolution failed: {}", error);
                if let Some(artwork) = self
                    .state
                    .metadata
                    .as_mut()
                    .and_then(|meta| meta.artwork.as_mut())
                {
                    artwork.resolution = ResolutionState::Failed;
                }
            }
        }
    }

    fn handle_service_started(&mut self, epoch: u64, result: Result<(), LifecycleError>) {
        match self.lifecycle.on_start_completed(epoch, result) {
            StartOutcome::Stale => {}
            StartOutcome::Connected(buffered) => {
                if self.pending_disable_teardown {
                    self.pending_disable_teardown = false;
                    self.lifecycle.begin_stop();
                    return;
                }
                if let Some(reply) = self.pending_enable.take() {
                    let _ = reply.send(Ok(()));
                }
                for op in buffered {
                    match op {
                        BufferedOp::Metadata(metadata) => self.apply_metadata(metadata),
                        BufferedOp::Playback {
                            status,
                            position_ms,
                            rate,
                        } => self.apply_playback(status, position_ms, rate),
                        BufferedOp::SubmitNotification => self.rebuild_and_submit(),
                    }
                }
                self.rebuild_and_submit();
            }
            StartOutcome::Failed(error) => {
                self.pending_disable_teardown = false;
                self.state.enabled = false;
                self.state.capabilities.clear();
                if let Some(reply) = self.pending_enable.take() {
                    let _ = reply.send(Err(error.into()));
                }
                // A failed start means no stop completion will ever arrive,
                // so an enable parked behind the teardown restarts here.
                if let Some((options, reply)) = self.pending_enable_after_stop.take() {
                    self.begin_enable(options, reply);
                }
            }
        }
    }

    fn handle_service_stopped(&mut self, epoch: u64) {
        if !self.lifecycle.on_stop_completed(epoch) {
            return;
        }
        if let Some((options, reply)) = self.pending_enable_after_stop.take() {
            self.begin_enable(options, reply);
        }
    }

    /// Rebuilds the notification from current state and hands it to the
    /// submitter. Deferred while the service connection is still coming up.
    fn rebuild_and_submit(&mut self) {
        if !self.state.enabled || self.state.metadata.is_none() {
            return;
        }
        if !self.lifecycle.is_connected() {
            self.lifecycle.buffer(BufferedOp::SubmitNotification);
            return;
        }
        let snapshot = build_snapshot(
            &self.state,
            self.resolved_artwork.as_ref(),
            &self.options.notification,
            self.icons.as_ref(),
            self.session_token,
        );
        self.submitter.enqueue(snapshot);
    }

    fn teardown(&mut self) {
        self.focus.release();
        self.submitter.enqueue_cancel();
        if self.lifecycle.is_connected() {
            self.lifecycle.begin_stop();
        }
        if let Some(mut resolver) = self.resolver.take() {
            resolver.shutdown();
        }
        self.submitter.shutdown();
    }
}
