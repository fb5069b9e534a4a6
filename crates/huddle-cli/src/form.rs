//! Form state: which controls are usable, and parsing of operator input.

use huddle_core::SessionState;

/// Enablement of the join form's controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormControls {
    pub room_input: bool,
    pub join: bool,
    pub leave: bool,
}

impl FormControls {
    /// Room input and join are usable only while no session is active;
    /// leave only while one is.
    pub fn for_state(state: &SessionState) -> Self {
        let idle = state.is_idle();
        Self {
            room_input: idle,
            join: idle,
            leave: !idle,
        }
    }
}

impl std::fmt::Display for FormControls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = |on: bool| if on { "on" } else { "off" };
        write!(
            f,
            "room input: {}, join: {}, leave: {}",
            mark(self.room_input),
            mark(self.join),
            mark(self.leave)
        )
    }
}

/// Trimmed room name, or `None` if nothing is left.
pub fn normalize_room_name(input: &str) -> Option<String> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acquire local tracks, optionally pinning the camera.
    Init(Option<String>),
    Devices,
    Room(String),
    Join,
    Leave,
    Status,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word {
            "init" => Ok(Command::Init((!rest.is_empty()).then(|| rest.to_string()))),
            "devices" => Ok(Command::Devices),
            "room" => normalize_room_name(rest)
                .map(Command::Room)
                .ok_or_else(|| "room name is empty".to_string()),
            "join" => Ok(Command::Join),
            "leave" => Ok(Command::Leave),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

pub const HELP: &str = "\
commands:
  init [camera-id]  acquire microphone and camera
  devices           list cameras
  room <name>       set the room to join
  join              connect and join the room
  leave             leave the conference
  status            show session state and render grid
  quit              leave and exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_enables_join_only() {
        let c = FormControls::for_state(&SessionState::Idle);
        assert_eq!(
            c,
            FormControls {
                room_input: true,
                join: true,
                leave: false
            }
        );
    }

    #[test]
    fn active_session_enables_leave_only() {
        for state in [
            SessionState::Connecting { room: "a".into() },
            SessionState::Connected { room: "a".into() },
            SessionState::InConference { room: "a".into() },
        ] {
            let c = FormControls::for_state(&state);
            assert!(!c.room_input && !c.join && c.leave, "{state}");
        }
    }

    #[test]
    fn room_names_are_trimmed() {
        assert_eq!(normalize_room_name("  standup \n").as_deref(), Some("standup"));
        assert_eq!(normalize_room_name("   "), None);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("init"), Ok(Command::Init(None)));
        assert_eq!(Command::parse("init cam-1"), Ok(Command::Init(Some("cam-1".into()))));
        assert_eq!(Command::parse("room   weekly sync "), Ok(Command::Room("weekly sync".into())));
        assert_eq!(Command::parse(" join "), Ok(Command::Join));
        assert_eq!(Command::parse("exit"), Ok(Command::Quit));
        assert!(Command::parse("room  ").is_err());
        assert!(Command::parse("dance").is_err());
        assert!(Command::parse("").is_err());
    }
}
