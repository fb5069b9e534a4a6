//! Huddle core: conference session lifecycle.
//!
//! Sequences connection, local track acquisition, conference join, remote
//! track rendering and teardown on top of an external conferencing library
//! reached through the traits in [`backend`].

pub mod backend;
pub mod config;
pub mod devices;
pub mod errors;
pub mod events;
pub mod loopback;
pub mod renderer;
pub mod session;

pub use backend::{
    Conference, ConferenceBackend, ConferenceEvent, ConnectionEvent, DeviceConstraints, DeviceKind,
    MediaDeviceInfo, MediaDevices, MediaTrack, SignalingConnection, TrackKind,
};
pub use config::{ConnectionConfig, Hosts, P2pPolicy};
pub use devices::{DeviceTrackProvider, VideoInput};
pub use errors::{BackendError, HuddleError, TeardownReport};
pub use events::{EventEmitter, HuddleEvent, HuddleEventListener};
pub use loopback::{LoopbackDevices, LoopbackService, LoopbackTrack};
pub use renderer::{RemoteTrackRenderer, RenderSurface, SurfaceGrid, SurfaceHost, Tile};
pub use session::{SessionController, SessionState};
