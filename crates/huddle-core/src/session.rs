use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::backend::{
    Conference, ConferenceBackend, ConferenceEvent, ConferenceHandler, ConnectionEvent,
    ConnectionHandler, DeviceConstraints, MediaDevices, MediaTrack, SignalingConnection,
    dispatch_conference_event, dispatch_connection_event,
};
use crate::config::ConnectionConfig;
use crate::devices::{DeviceTrackProvider, VideoInput};
use crate::errors::{HuddleError, TeardownReport};
use crate::events::{EventEmitter, HuddleEvent, HuddleEventListener};
use crate::renderer::{RemoteTrackRenderer, SurfaceHost};

type ConferenceOf<B> = <<B as ConferenceBackend>::Connection as SignalingConnection>::Conference;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Signaling requested, waiting for the backend to confirm.
    Connecting { room: String },
    /// Signaling established; the conference is being set up and joined.
    Connected { room: String },
    InConference { room: String },
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn room(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::Connecting { room }
            | SessionState::Connected { room }
            | SessionState::InConference { room } => Some(room),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting { room } => write!(f, "connecting to {room}"),
            SessionState::Connected { room } => write!(f, "connected to {room}"),
            SessionState::InConference { room } => write!(f, "in conference {room}"),
        }
    }
}

struct Session<B: ConferenceBackend> {
    /// Bumped whenever a session starts or ends; event loops of an older
    /// epoch drop their events.
    epoch: u64,
    state: SessionState,
    room: String,
    connection: Option<B::Connection>,
    conference: Option<ConferenceOf<B>>,
    local_tracks: Vec<B::Track>,
    /// Tracks replaced while they were still attached to the conference.
    /// Disposed once that conference is gone.
    retired_tracks: Vec<B::Track>,
    renderer: RemoteTrackRenderer,
    connection_task: Option<JoinHandle<()>>,
    conference_task: Option<JoinHandle<()>>,
}

/// State shared between the controller and its event loops.
struct SessionContext<B: ConferenceBackend> {
    session: Arc<Mutex<Session<B>>>,
    emitter: EventEmitter,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl<B: ConferenceBackend> Clone for SessionContext<B> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            emitter: self.emitter.clone(),
            state_tx: self.state_tx.clone(),
        }
    }
}

impl<B: ConferenceBackend> SessionContext<B> {
    fn set_state(&self, session: &mut Session<B>, state: SessionState) {
        if session.state == state {
            return;
        }
        tracing::debug!(from = %session.state, to = %state, "session state");
        session.state = state.clone();
        self.state_tx.send_replace(state.clone());
        self.emitter.emit(HuddleEvent::StateChanged(state));
    }

    /// Tear down whatever the session holds and return to `Idle`.
    ///
    /// Both steps are always attempted and the handles are always cleared.
    async fn teardown(&self, session: &mut Session<B>) -> TeardownReport {
        session.epoch += 1;
        if let Some(task) = session.conference_task.take() {
            task.abort();
        }

        let mut report = TeardownReport::default();

        if let Some(conference) = session.conference.take() {
            session.renderer.clear();
            if let Err(e) = conference.dispose().await {
                tracing::warn!("error disposing conference: {e}");
                report.dispose = Some(e);
            }
        }
        dispose_retired(session);

        if let Some(connection) = session.connection.take() {
            if let Err(e) = connection.disconnect().await {
                tracing::warn!("error disconnecting: {e}");
                report.disconnect = Some(e);
            }
        }

        // May be the task running this code; nothing is awaited past this point.
        if let Some(task) = session.connection_task.take() {
            task.abort();
        }

        self.set_state(session, SessionState::Idle);
        report
    }

    /// Forget a connection the backend already dropped.
    async fn reset_after_connection_loss(&self, session: &mut Session<B>) {
        session.epoch += 1;
        if let Some(task) = session.conference_task.take() {
            task.abort();
        }
        if let Some(conference) = session.conference.take() {
            session.renderer.clear();
            if let Err(e) = conference.dispose().await {
                tracing::debug!("dispose after connection loss: {e}");
            }
        }
        dispose_retired(session);
        session.connection = None;
        // The connection loop ends on its own after this event.
        session.connection_task = None;
        self.set_state(session, SessionState::Idle);
    }

    async fn start_conference(&self, session: &mut Session<B>, epoch: u64) -> Result<(), HuddleError> {
        let Some(connection) = session.connection.as_ref() else {
            return Err(HuddleError::PreconditionViolation(
                "connection established without a connection handle".into(),
            ));
        };
        if session.local_tracks.is_empty() {
            return Err(HuddleError::PreconditionViolation("local tracks not set".into()));
        }

        let (conference, events) = connection
            .init_conference(&session.room)
            .map_err(|e| HuddleError::ConnectionFailed(format!("init conference: {e}")))?;
        let room = session.room.clone();
        self.set_state(session, SessionState::Connected { room: room.clone() });
        tracing::info!(room = %room, "conference initialised");

        let conference = session.conference.insert(conference);
        for track in &session.local_tracks {
            conference.add_track(track).await.map_err(|e| {
                HuddleError::ConnectionFailed(format!("add track {}: {e}", track.id()))
            })?;
            tracing::debug!(track_id = %track.id(), kind = track.kind().as_str(), "local track attached");
        }

        let ctx = self.clone();
        session.conference_task = Some(tokio::spawn(async move {
            conference_loop(ctx, epoch, events).await;
        }));
        tracing::info!("conference handlers set");

        conference
            .join()
            .map_err(|e| HuddleError::ConnectionFailed(format!("join: {e}")))?;
        Ok(())
    }
}

fn dispose_retired<B: ConferenceBackend>(session: &mut Session<B>) {
    for track in session.retired_tracks.drain(..) {
        if let Err(e) = track.dispose() {
            tracing::debug!(track_id = %track.id(), "dispose retired track: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Connection callbacks
// ---------------------------------------------------------------------------

struct LifecycleHandler<'a, B: ConferenceBackend> {
    ctx: &'a SessionContext<B>,
    epoch: u64,
    finished: bool,
}

impl<B: ConferenceBackend> ConnectionHandler for LifecycleHandler<'_, B> {
    async fn on_established(&mut self) {
        let mut session = self.ctx.session.lock().await;
        if session.epoch != self.epoch {
            return;
        }
        tracing::info!(room = %session.room, "connection established");

        if let Err(e) = self.ctx.start_conference(&mut session, self.epoch).await {
            tracing::error!("cannot start conference: {e}");
            self.ctx.emitter.emit(HuddleEvent::SessionFault(e.to_string()));
            let report = self.ctx.teardown(&mut session).await;
            if !report.is_clean() {
                tracing::warn!("teardown after fault: {report}");
            }
            self.finished = true;
        }
    }

    async fn on_failed(&mut self, reason: String) {
        let mut session = self.ctx.session.lock().await;
        if session.epoch != self.epoch {
            return;
        }
        tracing::error!(room = %session.room, "connection failed: {reason}");
        self.ctx.emitter.emit(HuddleEvent::ConnectionFailed(reason));
        self.ctx.reset_after_connection_loss(&mut session).await;
        self.finished = true;
    }

    async fn on_disconnected(&mut self) {
        let mut session = self.ctx.session.lock().await;
        if session.epoch != self.epoch {
            return;
        }
        tracing::info!(room = %session.room, "connection disconnected");
        self.ctx.emitter.emit(HuddleEvent::ConnectionDisconnected);
        self.ctx.reset_after_connection_loss(&mut session).await;
        self.finished = true;
    }
}

async fn connection_loop<B: ConferenceBackend>(
    ctx: SessionContext<B>,
    epoch: u64,
    mut events: UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut handler = LifecycleHandler {
            ctx: &ctx,
            epoch,
            finished: false,
        };
        dispatch_connection_event(&mut handler, event).await;
        if handler.finished {
            break;
        }
    }
    tracing::debug!(epoch, "connection event loop ended");
}

// ---------------------------------------------------------------------------
// Conference callbacks
// ---------------------------------------------------------------------------

struct ConferenceWiring<'a, B: ConferenceBackend> {
    ctx: &'a SessionContext<B>,
    session: &'a mut Session<B>,
    /// The backend ended the conference without being asked to.
    ended: bool,
}

impl<B: ConferenceBackend> ConferenceHandler<B::Track> for ConferenceWiring<'_, B> {
    fn on_track_added(&mut self, track: B::Track) {
        self.session.renderer.on_track_added(&track);
    }

    fn on_track_removed(&mut self, track: B::Track) {
        self.session.renderer.on_track_removed(&track);
    }

    fn on_conference_joined(&mut self) {
        let room = self.session.room.clone();
        tracing::info!(room = %room, "conference joined");
        self.ctx
            .set_state(self.session, SessionState::InConference { room: room.clone() });
        self.ctx.emitter.emit(HuddleEvent::ConferenceJoined { room });
    }

    fn on_conference_left(&mut self) {
        tracing::info!(room = %self.session.room, "conference left");
        self.ctx.emitter.emit(HuddleEvent::ConferenceLeft);
        self.ended = true;
    }

    fn on_user_joined(&mut self, participant_id: &str) {
        tracing::info!(participant_id, "user joined");
        self.ctx
            .emitter
            .emit(HuddleEvent::UserJoined(participant_id.to_string()));
    }

    fn on_user_left(&mut self, participant_id: &str) {
        tracing::info!(participant_id, "user left");
        self.ctx
            .emitter
            .emit(HuddleEvent::UserLeft(participant_id.to_string()));
    }
}

async fn conference_loop<B: ConferenceBackend>(
    ctx: SessionContext<B>,
    epoch: u64,
    mut events: UnboundedReceiver<ConferenceEvent<B::Track>>,
) {
    while let Some(event) = events.recv().await {
        let mut session = ctx.session.lock().await;
        if session.epoch != epoch {
            break;
        }
        let mut wiring = ConferenceWiring {
            ctx: &ctx,
            session: &mut *session,
            ended: false,
        };
        dispatch_conference_event(&mut wiring, event);

        if wiring.ended {
            // Teardown must not abort the task it runs on.
            session.conference_task = None;
            let report = ctx.teardown(&mut session).await;
            if !report.is_clean() {
                tracing::warn!("teardown after conference ended: {report}");
            }
            break;
        }
    }
    tracing::debug!(epoch, "conference event loop ended");
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives one conference session: connect, acquire local tracks, join,
/// render remote tracks, leave.
///
/// At most one session is active at a time. Operations that do not fit the
/// current [`SessionState`] are rejected with [`HuddleError::InvalidState`].
pub struct SessionController<B: ConferenceBackend, D> {
    backend: B,
    devices: DeviceTrackProvider<D>,
    ctx: SessionContext<B>,
}

impl<B, D> SessionController<B, D>
where
    B: ConferenceBackend,
    D: MediaDevices<Track = B::Track>,
{
    pub fn new(backend: B, devices: D, surfaces: Arc<dyn SurfaceHost>) -> Self {
        let emitter = EventEmitter::new();
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let session = Session {
            epoch: 0,
            state: SessionState::Idle,
            room: String::new(),
            connection: None,
            conference: None,
            local_tracks: Vec::new(),
            retired_tracks: Vec::new(),
            renderer: RemoteTrackRenderer::new(surfaces, emitter.clone()),
            connection_task: None,
            conference_task: None,
        };
        Self {
            backend,
            devices: DeviceTrackProvider::new(devices),
            ctx: SessionContext {
                session: Arc::new(Mutex::new(session)),
                emitter,
                state_tx: Arc::new(state_tx),
            },
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn HuddleEventListener>) {
        self.ctx.emitter.add_listener(listener);
    }

    /// Start connecting to `room`.
    ///
    /// Returns once the attempt is under way. Whether signaling succeeds is
    /// reported later through [`HuddleEvent`]s and [`Self::subscribe_state`];
    /// on success the conference is initialised, local tracks attached and
    /// the room joined without further calls.
    pub async fn connect(&self, room: &str, config: &ConnectionConfig) -> Result<(), HuddleError> {
        let room = room.trim();
        if room.is_empty() {
            return Err(HuddleError::Config("room name is empty".into()));
        }

        let mut session = self.ctx.session.lock().await;
        if !session.state.is_idle() || session.connection.is_some() {
            return Err(HuddleError::InvalidState {
                operation: "connect",
                state: session.state.clone(),
            });
        }

        tracing::info!(
            room,
            websocket = config.websocket.as_deref().unwrap_or("-"),
            p2p = config.p2p.enabled,
            "connecting"
        );
        let (connection, events) = self
            .backend
            .create_connection(config)
            .map_err(|e| HuddleError::ConnectionFailed(e.to_string()))?;

        session.epoch += 1;
        let epoch = session.epoch;
        session.room = room.to_string();
        self.ctx.set_state(&mut session, SessionState::Connecting { room: room.to_string() });

        let ctx = self.ctx.clone();
        session.connection_task = Some(tokio::spawn(async move {
            connection_loop(ctx, epoch, events).await;
        }));

        let connection = session.connection.insert(connection);
        if let Err(e) = connection.connect(room) {
            tracing::error!(room, "connect request rejected: {e}");
            let report = self.ctx.teardown(&mut session).await;
            if !report.is_clean() {
                tracing::warn!("teardown after rejected connect: {report}");
            }
            return Err(HuddleError::ConnectionFailed(e.to_string()));
        }
        Ok(())
    }

    /// Acquire fresh local tracks, optionally pinning the camera, and make
    /// them the session's local tracks.
    ///
    /// The previous tracks are replaced, never merged. If capture fails the
    /// previous tracks stay in place and `TracksUnavailable` is returned.
    ///
    /// During a conference the new tracks are only used by the next join;
    /// the attached ones keep streaming and are disposed when the conference
    /// is torn down.
    pub async fn update_local_tracks(&self, target_device_id: Option<&str>) -> Result<(), HuddleError> {
        let constraints = DeviceConstraints {
            camera_device_id: target_device_id.map(str::to_string),
            ..Default::default()
        };
        let tracks = self.devices.acquire_local_tracks(&constraints).await?;
        let ids: Vec<String> = tracks.iter().map(|t| t.id().to_string()).collect();

        let mut session = self.ctx.session.lock().await;
        let previous = std::mem::replace(&mut session.local_tracks, tracks);
        if session.conference.is_some() {
            session.retired_tracks.extend(previous);
        } else {
            for track in previous {
                if let Err(e) = track.dispose() {
                    tracing::debug!(track_id = %track.id(), "dispose replaced track: {e}");
                }
            }
        }
        drop(session);

        tracing::info!(tracks = ?ids, "local tracks updated");
        self.ctx.emitter.emit(HuddleEvent::LocalTracksUpdated(ids));
        Ok(())
    }

    /// Leave the conference and close the connection.
    ///
    /// Always ends `Idle` with no conference and no connection. If disposing
    /// the conference or disconnecting failed, the returned
    /// [`HuddleError::Teardown`] names the failed steps.
    pub async fn leave(&self) -> Result<(), HuddleError> {
        let mut session = self.ctx.session.lock().await;
        tracing::info!(state = %session.state, "leaving");
        self.ctx.teardown(&mut session).await.into_result()
    }

    pub async fn enumerate_video_inputs(&self) -> Result<Vec<VideoInput>, HuddleError> {
        self.devices.enumerate_video_inputs().await
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state_tx.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.ctx.state_tx.subscribe()
    }

    pub async fn room_name(&self) -> Option<String> {
        let session = self.ctx.session.lock().await;
        session.state.room().map(str::to_string)
    }

    /// Ids of the current local tracks, in acquisition order.
    pub async fn local_track_ids(&self) -> Vec<String> {
        let session = self.ctx.session.lock().await;
        session.local_tracks.iter().map(|t| t.id().to_string()).collect()
    }

    pub async fn local_tracks(&self) -> Vec<B::Track> {
        self.ctx.session.lock().await.local_tracks.clone()
    }

    pub async fn has_connection(&self) -> bool {
        self.ctx.session.lock().await.connection.is_some()
    }

    pub async fn has_conference(&self) -> bool {
        self.ctx.session.lock().await.conference.is_some()
    }

    /// Keys of the render surfaces currently shown.
    pub async fn surface_keys(&self) -> Vec<String> {
        self.ctx.session.lock().await.renderer.surface_keys()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
