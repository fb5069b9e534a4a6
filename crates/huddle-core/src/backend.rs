//! Seam between the session controller and the external conferencing library.
//!
//! The library owns signaling, media negotiation and the track objects
//! themselves. It reports what happens through two event streams, one per
//! connection and one per conference, which the controller consumes through
//! the [`ConnectionHandler`] and [`ConferenceHandler`] traits.

use std::future::Future;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::ConnectionConfig;
use crate::errors::BackendError;
use crate::renderer::RenderSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// One media stream owned by the conferencing library.
///
/// Clones refer to the same underlying stream.
pub trait MediaTrack: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn is_local(&self) -> bool;
    fn participant_id(&self) -> Option<&str>;
    /// Start presenting the stream on `surface`.
    fn attach(&self, surface: &RenderSurface) -> Result<(), BackendError>;
    /// Release the underlying media resources.
    fn dispose(&self) -> Result<(), BackendError>;

    fn is_video(&self) -> bool {
        self.kind() == TrackKind::Video
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Established,
    Failed(String),
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum ConferenceEvent<T> {
    TrackAdded(T),
    TrackRemoved(T),
    ConferenceJoined,
    ConferenceLeft,
    UserJoined(String),
    UserLeft(String),
}

/// Entry point of a conferencing library.
pub trait ConferenceBackend: Send + Sync + 'static {
    type Track: MediaTrack;
    type Connection: SignalingConnection<Track = Self::Track>;

    /// Build a connection handle. Nothing goes on the wire until
    /// [`SignalingConnection::connect`] is called.
    fn create_connection(
        &self,
        config: &ConnectionConfig,
    ) -> Result<(Self::Connection, UnboundedReceiver<ConnectionEvent>), BackendError>;
}

pub trait SignalingConnection: Send + Sync + 'static {
    type Track: MediaTrack;
    type Conference: Conference<Track = Self::Track>;

    /// Begin connecting. The outcome is reported on the connection event stream.
    fn connect(&self, room: &str) -> Result<(), BackendError>;

    fn init_conference(
        &self,
        room: &str,
    ) -> Result<(Self::Conference, UnboundedReceiver<ConferenceEvent<Self::Track>>), BackendError>;

    fn disconnect(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

pub trait Conference: Send + Sync + 'static {
    type Track: MediaTrack;

    fn add_track(&self, track: &Self::Track)
    -> impl Future<Output = Result<(), BackendError>> + Send;

    fn join(&self) -> Result<(), BackendError>;

    fn dispose(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// A capture or playout device as reported by the platform.
///
/// Before permission is granted platforms report placeholder entries with
/// an empty `device_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConstraints {
    pub devices: Vec<TrackKind>,
    /// Pin the camera to this device instead of the platform default.
    pub camera_device_id: Option<String>,
}

impl Default for DeviceConstraints {
    fn default() -> Self {
        Self {
            devices: vec![TrackKind::Audio, TrackKind::Video],
            camera_device_id: None,
        }
    }
}

/// Platform media-capture API.
pub trait MediaDevices: Send + Sync + 'static {
    type Track: MediaTrack;

    fn create_local_tracks(
        &self,
        constraints: &DeviceConstraints,
    ) -> impl Future<Output = Result<Vec<Self::Track>, BackendError>> + Send;

    fn enumerate_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<MediaDeviceInfo>, BackendError>> + Send;
}

/// Receiver side of the connection lifecycle callbacks.
pub trait ConnectionHandler: Send {
    fn on_established(&mut self) -> impl Future<Output = ()> + Send;
    fn on_failed(&mut self, reason: String) -> impl Future<Output = ()> + Send;
    fn on_disconnected(&mut self) -> impl Future<Output = ()> + Send;
}

/// Receiver side of the conference lifecycle callbacks.
pub trait ConferenceHandler<T: MediaTrack> {
    fn on_track_added(&mut self, track: T);
    fn on_track_removed(&mut self, track: T);
    fn on_conference_joined(&mut self) {}
    fn on_conference_left(&mut self) {}
    fn on_user_joined(&mut self, _participant_id: &str) {}
    fn on_user_left(&mut self, _participant_id: &str) {}
}

pub async fn dispatch_connection_event<H: ConnectionHandler>(handler: &mut H, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Established => handler.on_established().await,
        ConnectionEvent::Failed(reason) => handler.on_failed(reason).await,
        ConnectionEvent::Disconnected => handler.on_disconnected().await,
    }
}

pub fn dispatch_conference_event<T, H>(handler: &mut H, event: ConferenceEvent<T>)
where
    T: MediaTrack,
    H: ConferenceHandler<T>,
{
    match event {
        ConferenceEvent::TrackAdded(track) => handler.on_track_added(track),
        ConferenceEvent::TrackRemoved(track) => handler.on_track_removed(track),
        ConferenceEvent::ConferenceJoined => handler.on_conference_joined(),
        ConferenceEvent::ConferenceLeft => handler.on_conference_left(),
        ConferenceEvent::UserJoined(id) => handler.on_user_joined(&id),
        ConferenceEvent::UserLeft(id) => handler.on_user_left(&id),
    }
}
