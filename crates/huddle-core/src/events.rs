use std::sync::{Arc, RwLock};

use crate::backend::TrackKind;
use crate::session::SessionState;

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum HuddleEvent {
    StateChanged(SessionState),
    LocalTracksUpdated(Vec<String>), // track ids, acquisition order
    ConnectionFailed(String),
    ConnectionDisconnected,
    ConferenceJoined { room: String },
    ConferenceLeft,
    UserJoined(String), // participant id
    UserLeft(String),
    SurfaceAdded { key: String, kind: TrackKind },
    SurfaceRemoved(String), // surface key
    /// An unrecoverable fault inside a callback (e.g. established without tracks).
    SessionFault(String),
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait HuddleEventListener: Send + Sync {
    fn on_event(&self, event: HuddleEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn HuddleEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn HuddleEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: HuddleEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        seen: Mutex<Vec<HuddleEvent>>,
    }

    impl HuddleEventListener for Journal {
        fn on_event(&self, event: HuddleEvent) {
            self.seen.lock().unwrap().push(event);
        }
    }

    impl Journal {
        fn seen(&self) -> Vec<HuddleEvent> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[test]
    fn session_events_arrive_in_emit_order() {
        let emitter = EventEmitter::new();
        let journal = Arc::new(Journal::default());
        emitter.add_listener(journal.clone());

        let joined = SessionState::InConference { room: "standup".into() };
        emitter.emit(HuddleEvent::StateChanged(joined.clone()));
        emitter.emit(HuddleEvent::SurfaceAdded {
            key: "v1".into(),
            kind: TrackKind::Video,
        });
        emitter.emit(HuddleEvent::SurfaceRemoved("v1".into()));

        assert_eq!(
            journal.seen(),
            vec![
                HuddleEvent::StateChanged(joined),
                HuddleEvent::SurfaceAdded {
                    key: "v1".into(),
                    kind: TrackKind::Video
                },
                HuddleEvent::SurfaceRemoved("v1".into()),
            ]
        );
    }

    #[test]
    fn late_listener_sees_only_later_events() {
        let emitter = EventEmitter::new();
        let early = Arc::new(Journal::default());
        emitter.add_listener(early.clone());
        emitter.emit(HuddleEvent::UserJoined("bob".into()));

        let late = Arc::new(Journal::default());
        emitter.add_listener(late.clone());
        emitter.emit(HuddleEvent::UserLeft("bob".into()));

        assert_eq!(early.seen().len(), 2);
        assert_eq!(late.seen(), vec![HuddleEvent::UserLeft("bob".into())]);
    }

    #[test]
    fn clones_share_listeners() {
        let emitter = EventEmitter::new();
        let journal = Arc::new(Journal::default());
        emitter.clone().add_listener(journal.clone());

        emitter.emit(HuddleEvent::ConnectionDisconnected);

        assert_eq!(journal.seen(), vec![HuddleEvent::ConnectionDisconnected]);
    }
}
