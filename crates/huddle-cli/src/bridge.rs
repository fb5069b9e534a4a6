//! Executes operator commands against a session controller.

use std::sync::Arc;

use huddle_core::{
    ConnectionConfig, HuddleError, HuddleEvent, HuddleEventListener, LoopbackDevices,
    LoopbackService, SessionController, SurfaceGrid, TrackKind,
};

use crate::form::{Command, FormControls, HELP};

/// Where the connection config comes from at join time.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Derive endpoints from a deployment base URL and the room name.
    Deployment(String),
    /// Use a loaded config as is.
    Fixed(ConnectionConfig),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub quit: bool,
}

impl Reply {
    fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            quit: false,
        }
    }
}

pub struct Bridge {
    controller: SessionController<LoopbackService, LoopbackDevices>,
    grid: Arc<SurfaceGrid>,
    source: ConfigSource,
    room: Option<String>,
    peers: Vec<String>,
}

impl Bridge {
    pub fn new(service: LoopbackService, source: ConfigSource) -> Self {
        let grid = Arc::new(SurfaceGrid::new());
        let devices = LoopbackDevices::new(&service);
        let controller = SessionController::new(service, devices, grid.clone());
        Self {
            controller,
            grid,
            source,
            room: None,
            peers: Vec::new(),
        }
    }

    pub fn with_room(mut self, room: Option<String>) -> Self {
        self.room = room;
        self
    }

    /// Simulated participants already present in whatever room is joined.
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn HuddleEventListener>) {
        self.controller.add_listener(listener);
    }

    pub fn controller(&self) -> &SessionController<LoopbackService, LoopbackDevices> {
        &self.controller
    }

    pub fn controls(&self) -> FormControls {
        FormControls::for_state(&self.controller.state())
    }

    pub async fn execute(&mut self, command: Command) -> Result<Reply, HuddleError> {
        match command {
            Command::Init(camera) => {
                self.controller.update_local_tracks(camera.as_deref()).await?;
                let ids = self.controller.local_track_ids().await;
                Ok(Reply::line(format!("local tracks: {}", ids.join(", "))))
            }
            Command::Devices => {
                let inputs = self.controller.enumerate_video_inputs().await?;
                if inputs.is_empty() {
                    return Ok(Reply::line("no cameras"));
                }
                Ok(Reply {
                    lines: inputs
                        .into_iter()
                        .map(|i| format!("{}  {}", i.id, i.label))
                        .collect(),
                    quit: false,
                })
            }
            Command::Room(name) => {
                if !self.controls().room_input {
                    return Err(HuddleError::InvalidState {
                        operation: "room",
                        state: self.controller.state(),
                    });
                }
                let reply = Reply::line(format!("room set to {name}"));
                self.room = Some(name);
                Ok(reply)
            }
            Command::Join => self.join().await,
            Command::Leave => {
                self.controller.leave().await?;
                Ok(Reply::line(self.controls().to_string()))
            }
            Command::Status => Ok(self.status()),
            Command::Help => Ok(Reply::line(HELP)),
            Command::Quit => {
                if let Err(e) = self.controller.leave().await {
                    tracing::warn!("leave on quit: {e}");
                }
                Ok(Reply {
                    lines: vec!["bye".into()],
                    quit: true,
                })
            }
        }
    }

    async fn join(&mut self) -> Result<Reply, HuddleError> {
        let Some(room) = self.room.clone() else {
            return Err(HuddleError::Config("no room set, use `room <name>`".into()));
        };
        let mut lines = Vec::new();
        let config = match &self.source {
            ConfigSource::Deployment(base_url) => ConnectionConfig::for_deployment(base_url, &room)?,
            ConfigSource::Fixed(config) => {
                if let Some(hint) = config.room_hint().filter(|hint| hint != &room) {
                    tracing::warn!(room = %room, config_room = %hint, "loaded config targets another room");
                    lines.push(format!("warning: config was generated for room {hint}"));
                }
                config.clone()
            }
        };
        self.seed_peers(&room);
        self.controller.connect(&room, &config).await?;
        lines.push(format!("joining {room}"));
        Ok(Reply { lines, quit: false })
    }

    fn seed_peers(&self, room: &str) {
        let service = self.controller.backend();
        let present = service.members(room);
        for peer in self.peers.iter().filter(|p| !present.contains(*p)) {
            let audio = format!("{peer}-audio");
            let video = format!("{peer}-video");
            service.add_participant(
                room,
                peer,
                &[(audio.as_str(), TrackKind::Audio), (video.as_str(), TrackKind::Video)],
            );
        }
    }

    fn status(&self) -> Reply {
        let mut lines = vec![
            format!("state: {}", self.controller.state()),
            self.controls().to_string(),
        ];
        if let Some(room) = &self.room {
            lines.push(format!("room: {room}"));
        }
        let tiles = self.grid.tiles();
        lines.push(format!("surfaces: {}", tiles.len()));
        for tile in tiles {
            lines.push(format!(
                "  [{}] {} {}",
                tile.kind.as_str(),
                tile.key,
                tile.label.as_deref().unwrap_or("")
            ));
        }
        Reply { lines, quit: false }
    }
}

/// Prints session events for the operator.
pub struct EventPrinter;

impl HuddleEventListener for EventPrinter {
    fn on_event(&self, event: HuddleEvent) {
        match event {
            HuddleEvent::StateChanged(state) => {
                println!("* {state} ({})", FormControls::for_state(&state));
            }
            HuddleEvent::ConferenceJoined { room } => println!("* joined {room}"),
            HuddleEvent::ConferenceLeft => println!("* left the conference"),
            HuddleEvent::UserJoined(id) => println!("* {id} joined"),
            HuddleEvent::UserLeft(id) => println!("* {id} left"),
            HuddleEvent::ConnectionFailed(reason) => println!("! connection failed: {reason}"),
            HuddleEvent::ConnectionDisconnected => println!("! disconnected"),
            HuddleEvent::SessionFault(msg) => println!("! {msg}"),
            HuddleEvent::SurfaceAdded { .. }
            | HuddleEvent::SurfaceRemoved(_)
            | HuddleEvent::LocalTracksUpdated(_) => {}
        }
    }
}
