//! In-process conferencing service.
//!
//! Implements every backend trait without touching the network: rooms live
//! in memory, published tracks are fanned out to the other members as
//! remote views, and failures can be injected through [`Faults`]. Used by
//! the CLI demo and the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::backend::{
    Conference, ConferenceBackend, ConferenceEvent, ConnectionEvent, DeviceConstraints, DeviceKind,
    MediaDeviceInfo, MediaDevices, MediaTrack, SignalingConnection, TrackKind,
};
use crate::config::ConnectionConfig;
use crate::errors::BackendError;
use crate::renderer::RenderSurface;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Failures the service will simulate.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// `connect` reports `Failed` instead of `Established`.
    pub refuse_connections: bool,
    /// `connect` itself returns an error, before any event is sent.
    pub reject_connect: bool,
    /// Local capture fails as if permission was denied.
    pub deny_capture: bool,
    pub fail_dispose: bool,
    pub fail_disconnect: bool,
    /// Delay applied to every `add_track`.
    pub attach_delay: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

struct TrackState {
    id: String,
    kind: TrackKind,
    participant_id: Option<String>,
    device_id: Option<String>,
    disposed: AtomicBool,
    fail_attach: AtomicBool,
    attached: Mutex<Vec<String>>,
}

/// Track handle of the loopback service.
///
/// Every member of a room receives its own remote view of a published
/// track, so disposing one view does not affect the others.
#[derive(Clone)]
pub struct LoopbackTrack {
    state: Arc<TrackState>,
    local: bool,
}

impl std::fmt::Debug for LoopbackTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTrack")
            .field("id", &self.state.id)
            .field("kind", &self.state.kind)
            .field("local", &self.local)
            .field("participant_id", &self.state.participant_id)
            .finish()
    }
}

impl LoopbackTrack {
    fn build(
        id: &str,
        kind: TrackKind,
        participant_id: Option<String>,
        device_id: Option<String>,
        local: bool,
    ) -> Self {
        Self {
            state: Arc::new(TrackState {
                id: id.to_string(),
                kind,
                participant_id,
                device_id,
                disposed: AtomicBool::new(false),
                fail_attach: AtomicBool::new(false),
                attached: Mutex::new(Vec::new()),
            }),
            local,
        }
    }

    /// A captured track not yet bound to a participant.
    pub fn local(id: &str, kind: TrackKind) -> Self {
        Self::build(id, kind, None, None, true)
    }

    pub fn remote(id: &str, kind: TrackKind, participant_id: &str) -> Self {
        Self::build(id, kind, Some(participant_id.to_string()), None, false)
    }

    fn captured(kind: TrackKind, device_id: &str) -> Self {
        let id = format!("{}-{}", kind.as_str(), Uuid::new_v4());
        Self::build(&id, kind, None, Some(device_id.to_string()), true)
    }

    fn remote_view(&self, participant_id: &str) -> Self {
        Self::remote(&self.state.id, self.state.kind, participant_id)
    }

    /// Capture device this track was created from.
    pub fn device_id(&self) -> Option<&str> {
        self.state.device_id.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Keys of the surfaces this track was attached to, in order.
    pub fn attached_to(&self) -> Vec<String> {
        lock(&self.state.attached).clone()
    }

    /// Make every later `attach` fail.
    pub fn fail_attach(&self) {
        self.state.fail_attach.store(true, Ordering::SeqCst);
    }
}

impl MediaTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.state.id
    }

    fn kind(&self) -> TrackKind {
        self.state.kind
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn participant_id(&self) -> Option<&str> {
        self.state.participant_id.as_deref()
    }

    fn attach(&self, surface: &RenderSurface) -> Result<(), BackendError> {
        if self.state.fail_attach.load(Ordering::SeqCst) {
            return Err(BackendError::new("attach rejected"));
        }
        if self.is_disposed() {
            return Err(BackendError::new(format!("track {} is disposed", self.state.id)));
        }
        lock(&self.state.attached).push(surface.key.clone());
        Ok(())
    }

    fn dispose(&self) -> Result<(), BackendError> {
        self.state.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

type ConferenceSender = UnboundedSender<ConferenceEvent<LoopbackTrack>>;

struct Member {
    participant_id: String,
    tracks: Vec<LoopbackTrack>,
    /// `None` for scripted participants that never consume events.
    events: Option<ConferenceSender>,
}

#[derive(Default)]
struct Room {
    members: Vec<Member>,
    /// Remote views handed out, keyed by (receiver, track id).
    delivered: HashMap<(String, String), LoopbackTrack>,
}

impl Room {
    fn others(&self, participant_id: &str) -> Vec<(String, ConferenceSender)> {
        self.members
            .iter()
            .filter(|m| m.participant_id != participant_id)
            .filter_map(|m| m.events.clone().map(|tx| (m.participant_id.clone(), tx)))
            .collect()
    }

    fn broadcast(&self, from: &str, event: ConferenceEvent<LoopbackTrack>) {
        for (_, tx) in self.others(from) {
            let _ = tx.send(event.clone());
        }
    }

    fn deliver(&mut self, receiver: &str, tx: &ConferenceSender, owner: &str, track: &LoopbackTrack) {
        let view = track.remote_view(owner);
        self.delivered
            .insert((receiver.to_string(), track.id().to_string()), view.clone());
        let _ = tx.send(ConferenceEvent::TrackAdded(view));
    }

    fn announce(&mut self, owner: &str, track: &LoopbackTrack) {
        for (receiver, tx) in self.others(owner) {
            self.deliver(&receiver, &tx, owner, track);
        }
    }

    fn retract(&mut self, owner: &str, track_id: &str) {
        for (receiver, tx) in self.others(owner) {
            if let Some(view) = self.delivered.remove(&(receiver, track_id.to_string())) {
                let _ = tx.send(ConferenceEvent::TrackRemoved(view));
            }
        }
    }

    fn admit(&mut self, member: Member) {
        let pid = member.participant_id.clone();
        let tracks = member.tracks.clone();
        let events = member.events.clone();
        let existing: Vec<(String, Vec<LoopbackTrack>)> = self
            .members
            .iter()
            .map(|m| (m.participant_id.clone(), m.tracks.clone()))
            .collect();

        self.members.push(member);
        self.broadcast(&pid, ConferenceEvent::UserJoined(pid.clone()));
        for track in &tracks {
            self.announce(&pid, track);
        }

        if let Some(tx) = events {
            let _ = tx.send(ConferenceEvent::ConferenceJoined);
            for track in &tracks {
                let _ = tx.send(ConferenceEvent::TrackAdded(track.clone()));
            }
            for (other, other_tracks) in existing {
                let _ = tx.send(ConferenceEvent::UserJoined(other.clone()));
                for track in &other_tracks {
                    self.deliver(&pid, &tx, &other, track);
                }
            }
        }
    }

    fn evict(&mut self, participant_id: &str) -> Option<Member> {
        let idx = self
            .members
            .iter()
            .position(|m| m.participant_id == participant_id)?;

        let track_ids: Vec<String> = self.members[idx]
            .tracks
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        for track_id in &track_ids {
            self.retract(participant_id, track_id);
        }
        self.broadcast(participant_id, ConferenceEvent::UserLeft(participant_id.to_string()));

        self.delivered.retain(|(receiver, _), _| receiver != participant_id);
        Some(self.members.remove(idx))
    }

    fn publish(&mut self, participant_id: &str, track: LoopbackTrack) {
        let Some(member) = self
            .members
            .iter_mut()
            .find(|m| m.participant_id == participant_id)
        else {
            return;
        };
        member.tracks.push(track.clone());
        if let Some(tx) = &member.events {
            let _ = tx.send(ConferenceEvent::TrackAdded(track.clone()));
        }
        self.announce(participant_id, &track);
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Server side of one connection.
struct Link {
    connected: Arc<AtomicBool>,
    events: UnboundedSender<ConnectionEvent>,
}

struct ServiceInner {
    rooms: Mutex<HashMap<String, Room>>,
    links: Mutex<Vec<Link>>,
    faults: Mutex<Faults>,
    attach_log: Mutex<Vec<(String, String)>>,
}

/// Shared handle to one in-memory conferencing service.
#[derive(Clone)]
pub struct LoopbackService {
    inner: Arc<ServiceInner>,
}

impl Default for LoopbackService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                rooms: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                attach_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fault switches; changes apply to subsequent calls.
    pub fn faults(&self) -> MutexGuard<'_, Faults> {
        lock(&self.inner.faults)
    }

    /// `(room, track id)` for every completed `add_track`, in completion order.
    pub fn attach_log(&self) -> Vec<(String, String)> {
        lock(&self.inner.attach_log).clone()
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        lock(&self.inner.rooms)
            .get(room)
            .map(|r| r.members.iter().map(|m| m.participant_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Put a scripted participant publishing `tracks` into `room`.
    pub fn add_participant(&self, room: &str, participant_id: &str, tracks: &[(&str, TrackKind)]) {
        let tracks = tracks
            .iter()
            .map(|(id, kind)| LoopbackTrack::remote(id, *kind, participant_id))
            .collect();
        lock(&self.inner.rooms)
            .entry(room.to_string())
            .or_default()
            .admit(Member {
                participant_id: participant_id.to_string(),
                tracks,
                events: None,
            });
        tracing::debug!(room, participant_id, "scripted participant joined");
    }

    pub fn remove_participant(&self, room: &str, participant_id: &str) {
        let mut rooms = lock(&self.inner.rooms);
        if let Some(r) = rooms.get_mut(room) {
            r.evict(participant_id);
            if r.members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Stop publishing one track, wherever it lives in `room`.
    pub fn unpublish(&self, room: &str, track_id: &str) {
        let mut rooms = lock(&self.inner.rooms);
        let Some(r) = rooms.get_mut(room) else {
            return;
        };
        let Some(owner) = r
            .members
            .iter_mut()
            .find(|m| m.tracks.iter().any(|t| t.id() == track_id))
        else {
            return;
        };
        owner.tracks.retain(|t| t.id() != track_id);
        let owner_id = owner.participant_id.clone();
        r.retract(&owner_id, track_id);
    }

    /// Drop every established connection from the server side.
    pub fn drop_connections(&self) {
        let mut links = lock(&self.inner.links);
        links.retain(|link| !link.events.is_closed());
        for link in links.iter() {
            if link.connected.swap(false, Ordering::SeqCst) {
                let _ = link.events.send(ConnectionEvent::Disconnected);
            }
        }
    }

    /// Remove a participant that joined through a conference, as a moderator
    /// kick would. The participant is told the conference is over.
    pub fn kick(&self, room: &str, participant_id: &str) {
        let mut rooms = lock(&self.inner.rooms);
        let Some(r) = rooms.get_mut(room) else {
            return;
        };
        if let Some(Member {
            events: Some(tx), ..
        }) = r.evict(participant_id)
        {
            let _ = tx.send(ConferenceEvent::ConferenceLeft);
        }
        if r.members.is_empty() {
            rooms.remove(room);
        }
    }

    fn with_room<R>(&self, room: &str, f: impl FnOnce(&mut Room) -> R) -> R {
        let mut rooms = lock(&self.inner.rooms);
        f(rooms.entry(room.to_string()).or_default())
    }

    fn leave_room(&self, room: &str, participant_id: &str) -> bool {
        let mut rooms = lock(&self.inner.rooms);
        let Some(r) = rooms.get_mut(room) else {
            return false;
        };
        let left = r.evict(participant_id).is_some();
        if r.members.is_empty() {
            rooms.remove(room);
        }
        left
    }
}

impl ConferenceBackend for LoopbackService {
    type Track = LoopbackTrack;
    type Connection = LoopbackConnection;

    fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<(LoopbackConnection, UnboundedReceiver<ConnectionEvent>), BackendError> {
        config
            .validate()
            .map_err(|e| BackendError::new(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        lock(&self.inner.links).push(Link {
            connected: connected.clone(),
            events: tx.clone(),
        });
        let connection = LoopbackConnection {
            service: self.clone(),
            domain: config.hosts.domain.clone(),
            events: tx,
            connected,
        };
        Ok((connection, rx))
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct LoopbackConnection {
    service: LoopbackService,
    domain: String,
    events: UnboundedSender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
}

impl SignalingConnection for LoopbackConnection {
    type Track = LoopbackTrack;
    type Conference = LoopbackConference;

    fn connect(&self, room: &str) -> Result<(), BackendError> {
        let (reject, refuse) = {
            let faults = self.service.faults();
            (faults.reject_connect, faults.refuse_connections)
        };
        if reject {
            return Err(BackendError::new(format!("malformed room '{room}'")));
        }
        if refuse {
            tracing::debug!(room, domain = %self.domain, "loopback refusing connection");
            let _ = self
                .events
                .send(ConnectionEvent::Failed("connection refused".into()));
            return Ok(());
        }

        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Established);
        Ok(())
    }

    fn init_conference(
        &self,
        room: &str,
    ) -> Result<(LoopbackConference, UnboundedReceiver<ConferenceEvent<LoopbackTrack>>), BackendError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BackendError::new("connection is not established"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let conference = LoopbackConference {
            service: self.service.clone(),
            room: room.to_string(),
            participant_id: Uuid::new_v4().to_string(),
            tracks: Mutex::new(Vec::new()),
            events: tx,
            joined: AtomicBool::new(false),
        };
        Ok((conference, rx))
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let fail = self.service.faults().fail_disconnect;
        if fail {
            return Err(BackendError::new("socket closed before disconnect completed"));
        }
        if was_connected {
            let _ = self.events.send(ConnectionEvent::Disconnected);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conference
// ---------------------------------------------------------------------------

pub struct LoopbackConference {
    service: LoopbackService,
    room: String,
    participant_id: String,
    tracks: Mutex<Vec<LoopbackTrack>>,
    events: ConferenceSender,
    joined: AtomicBool,
}

impl LoopbackConference {
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }
}

impl Conference for LoopbackConference {
    type Track = LoopbackTrack;

    async fn add_track(&self, track: &LoopbackTrack) -> Result<(), BackendError> {
        let delay = self.service.faults().attach_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if track.is_disposed() {
            return Err(BackendError::new(format!("track {} is disposed", track.id())));
        }

        lock(&self.tracks).push(track.clone());
        if self.joined.load(Ordering::SeqCst) {
            let pid = self.participant_id.clone();
            self.service
                .with_room(&self.room, |r| r.publish(&pid, track.clone()));
        }
        lock(&self.service.inner.attach_log).push((self.room.clone(), track.id().to_string()));
        Ok(())
    }

    fn join(&self) -> Result<(), BackendError> {
        if self.joined.swap(true, Ordering::SeqCst) {
            return Err(BackendError::new("conference already joined"));
        }
        let member = Member {
            participant_id: self.participant_id.clone(),
            tracks: lock(&self.tracks).clone(),
            events: Some(self.events.clone()),
        };
        self.service.with_room(&self.room, |r| r.admit(member));
        tracing::debug!(room = %self.room, participant_id = %self.participant_id, "loopback join");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), BackendError> {
        if self.joined.swap(false, Ordering::SeqCst)
            && self.service.leave_room(&self.room, &self.participant_id)
        {
            let _ = self.events.send(ConferenceEvent::ConferenceLeft);
        }
        let fail = self.service.faults().fail_dispose;
        if fail {
            return Err(BackendError::new("conference dispose timed out"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Synthetic capture devices backed by a [`LoopbackService`].
pub struct LoopbackDevices {
    service: LoopbackService,
    devices: Vec<MediaDeviceInfo>,
}

impl LoopbackDevices {
    /// One camera and one microphone.
    pub fn new(service: &LoopbackService) -> Self {
        Self::with_devices(
            service,
            vec![
                MediaDeviceInfo {
                    device_id: "cam-0".into(),
                    label: "Integrated Camera".into(),
                    kind: DeviceKind::VideoInput,
                },
                MediaDeviceInfo {
                    device_id: "mic-0".into(),
                    label: "Built-in Microphone".into(),
                    kind: DeviceKind::AudioInput,
                },
            ],
        )
    }

    pub fn with_devices(service: &LoopbackService, devices: Vec<MediaDeviceInfo>) -> Self {
        Self {
            service: service.clone(),
            devices,
        }
    }

    fn pick(&self, kind: DeviceKind, wanted: Option<&str>) -> Result<&MediaDeviceInfo, BackendError> {
        let mut candidates = self
            .devices
            .iter()
            .filter(|d| d.kind == kind && !d.device_id.is_empty());
        match wanted {
            Some(id) => candidates
                .find(|d| d.device_id == id)
                .ok_or_else(|| BackendError::new(format!("device '{id}' not found"))),
            None => candidates
                .next()
                .ok_or_else(|| BackendError::new(format!("no {kind:?} device present"))),
        }
    }
}

impl MediaDevices for LoopbackDevices {
    type Track = LoopbackTrack;

    async fn create_local_tracks(
        &self,
        constraints: &DeviceConstraints,
    ) -> Result<Vec<LoopbackTrack>, BackendError> {
        let denied = self.service.faults().deny_capture;
        if denied {
            return Err(BackendError::new("permission denied"));
        }

        constraints
            .devices
            .iter()
            .map(|kind| -> Result<LoopbackTrack, BackendError> {
                let device = match kind {
                    TrackKind::Audio => self.pick(DeviceKind::AudioInput, None)?,
                    TrackKind::Video => self.pick(
                        DeviceKind::VideoInput,
                        constraints.camera_device_id.as_deref(),
                    )?,
                };
                Ok(LoopbackTrack::captured(*kind, &device.device_id))
            })
            .collect()
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>, BackendError> {
        Ok(self.devices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::for_deployment("https://localhost:8443", "room1").unwrap()
    }

    async fn joined_conference(
        service: &LoopbackService,
        room: &str,
    ) -> (LoopbackConference, UnboundedReceiver<ConferenceEvent<LoopbackTrack>>) {
        let (conn, mut events) = service.create_connection(&config()).unwrap();
        conn.connect(room).unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Established));
        let (conf, rx) = conn.init_conference(room).unwrap();
        conf.join().unwrap();
        (conf, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ConferenceEvent<LoopbackTrack>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(match ev {
                ConferenceEvent::TrackAdded(t) => format!("added:{}", t.id()),
                ConferenceEvent::TrackRemoved(t) => format!("removed:{}", t.id()),
                ConferenceEvent::ConferenceJoined => "joined".to_string(),
                ConferenceEvent::ConferenceLeft => "left".to_string(),
                ConferenceEvent::UserJoined(_) => "user-joined".to_string(),
                ConferenceEvent::UserLeft(_) => "user-left".to_string(),
            });
        }
        out
    }

    #[tokio::test]
    async fn refused_connection_reports_failed() {
        let service = LoopbackService::new();
        service.faults().refuse_connections = true;
        let (conn, mut events) = service.create_connection(&config()).unwrap();

        conn.connect("room1").unwrap();

        assert!(matches!(events.recv().await, Some(ConnectionEvent::Failed(_))));
        assert!(conn.init_conference("room1").is_err());
    }

    #[tokio::test]
    async fn joining_sees_existing_participants() {
        let service = LoopbackService::new();
        service.add_participant("room1", "bot", &[("v1", TrackKind::Video), ("a1", TrackKind::Audio)]);

        let (_conf, mut rx) = joined_conference(&service, "room1").await;

        assert_eq!(drain(&mut rx), vec!["joined", "user-joined", "added:v1", "added:a1"]);
    }

    #[tokio::test]
    async fn remote_views_are_not_local() {
        let service = LoopbackService::new();
        service.add_participant("room1", "bot", &[("v1", TrackKind::Video)]);
        let (_conf, mut rx) = joined_conference(&service, "room1").await;

        let _ = rx.try_recv(); // joined
        let _ = rx.try_recv(); // user joined
        match rx.try_recv() {
            Ok(ConferenceEvent::TrackAdded(track)) => {
                assert!(!track.is_local());
                assert_eq!(track.participant_id(), Some("bot"));
            }
            other => panic!("expected TrackAdded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn published_tracks_fan_out_and_retract() {
        let service = LoopbackService::new();
        let (alice, mut alice_rx) = joined_conference(&service, "room1").await;
        let (_bob, mut bob_rx) = joined_conference(&service, "room1").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let cam = LoopbackTrack::local("cam", TrackKind::Video);
        alice.add_track(&cam).await.unwrap();
        assert_eq!(drain(&mut alice_rx), vec!["added:cam"]);
        assert_eq!(drain(&mut bob_rx), vec!["added:cam"]);

        alice.dispose().await.unwrap();
        assert_eq!(drain(&mut alice_rx), vec!["left"]);
        assert_eq!(drain(&mut bob_rx), vec!["removed:cam", "user-left"]);
        assert_eq!(service.members("room1").len(), 1);
    }

    #[tokio::test]
    async fn unpublish_removes_one_track() {
        let service = LoopbackService::new();
        service.add_participant("room1", "bot", &[("v1", TrackKind::Video), ("v2", TrackKind::Video)]);
        let (_conf, mut rx) = joined_conference(&service, "room1").await;
        drain(&mut rx);

        service.unpublish("room1", "v1");

        assert_eq!(drain(&mut rx), vec!["removed:v1"]);
    }

    #[tokio::test]
    async fn failing_dispose_still_leaves_the_room() {
        let service = LoopbackService::new();
        let (conf, _rx) = joined_conference(&service, "room1").await;
        service.faults().fail_dispose = true;

        assert!(conf.dispose().await.is_err());
        assert!(service.members("room1").is_empty());
    }

    #[tokio::test]
    async fn dropped_connection_reports_disconnected() {
        let service = LoopbackService::new();
        let (conn, mut events) = service.create_connection(&config()).unwrap();
        conn.connect("room1").unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Established));

        service.drop_connections();
        service.drop_connections();

        assert_eq!(events.try_recv().ok(), Some(ConnectionEvent::Disconnected));
        assert!(events.try_recv().is_err());
        assert!(conn.init_conference("room1").is_err());
    }

    #[tokio::test]
    async fn kicked_participant_is_told_conference_left() {
        let service = LoopbackService::new();
        let (alice, mut alice_rx) = joined_conference(&service, "room1").await;
        let (_bob, mut bob_rx) = joined_conference(&service, "room1").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        service.kick("room1", alice.participant_id());

        assert_eq!(drain(&mut alice_rx), vec!["left"]);
        assert_eq!(drain(&mut bob_rx), vec!["user-left"]);
        assert_eq!(service.members("room1").len(), 1);
        // Disposing afterwards does not announce a second departure.
        alice.dispose().await.unwrap();
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_emits_disconnected_once() {
        let service = LoopbackService::new();
        let (conn, mut events) = service.create_connection(&config()).unwrap();
        conn.connect("room1").unwrap();
        assert_eq!(events.recv().await, Some(ConnectionEvent::Established));

        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();

        assert_eq!(events.try_recv().ok(), Some(ConnectionEvent::Disconnected));
        assert!(events.try_recv().is_err());
    }
}
