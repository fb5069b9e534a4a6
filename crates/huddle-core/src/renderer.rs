use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::backend::{MediaTrack, TrackKind};
use crate::events::{EventEmitter, HuddleEvent};

/// A UI element presenting exactly one track, keyed by the track id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSurface {
    pub key: String,
    pub kind: TrackKind,
    pub participant_id: Option<String>,
    /// Caption shown under video tiles.
    pub label: Option<String>,
}

impl RenderSurface {
    fn for_track<T: MediaTrack>(track: &T) -> Self {
        let participant_id = track.participant_id().map(str::to_string);
        let label = match track.kind() {
            TrackKind::Video => Some(if track.is_local() {
                "me".to_string()
            } else {
                participant_id.clone().unwrap_or_else(|| track.id().to_string())
            }),
            TrackKind::Audio => None,
        };
        Self {
            key: track.id().to_string(),
            kind: track.kind(),
            participant_id,
            label,
        }
    }
}

/// The container surfaces are placed in (the meeting grid).
pub trait SurfaceHost: Send + Sync {
    fn insert(&self, surface: &RenderSurface);
    /// Video surfaces are removed together with the tile wrapping them.
    fn remove(&self, surface: &RenderSurface);
}

/// Creates and destroys render surfaces in response to conference track events.
///
/// Local audio is never rendered.
pub struct RemoteTrackRenderer {
    host: Arc<dyn SurfaceHost>,
    emitter: EventEmitter,
    surfaces: HashMap<String, RenderSurface>,
}

impl RemoteTrackRenderer {
    pub fn new(host: Arc<dyn SurfaceHost>, emitter: EventEmitter) -> Self {
        Self {
            host,
            emitter,
            surfaces: HashMap::new(),
        }
    }

    pub fn on_track_added<T: MediaTrack>(&mut self, track: &T) {
        tracing::info!(
            track_id = %track.id(),
            kind = track.kind().as_str(),
            local = track.is_local(),
            "track added"
        );

        if !track.is_video() && track.is_local() {
            return;
        }

        // A re-announced track replaces its previous surface.
        self.remove_surface(track.id());

        let surface = RenderSurface::for_track(track);
        if let Err(e) = track.attach(&surface) {
            tracing::warn!(track_id = %track.id(), "failed to attach track: {e}");
            return;
        }

        self.host.insert(&surface);
        self.emitter.emit(HuddleEvent::SurfaceAdded {
            key: surface.key.clone(),
            kind: surface.kind,
        });
        self.surfaces.insert(surface.key.clone(), surface);
    }

    pub fn on_track_removed<T: MediaTrack>(&mut self, track: &T) {
        tracing::info!(track_id = %track.id(), "track removed");
        if let Err(e) = track.dispose() {
            tracing::warn!(track_id = %track.id(), "failed to dispose track: {e}");
        }
        self.remove_surface(track.id());
    }

    /// Remove every surface. Tracks are left to their owner.
    pub fn clear(&mut self) {
        for (_, surface) in self.surfaces.drain() {
            self.host.remove(&surface);
            self.emitter.emit(HuddleEvent::SurfaceRemoved(surface.key));
        }
    }

    pub fn surface(&self, key: &str) -> Option<&RenderSurface> {
        self.surfaces.get(key)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Surface keys in ascending order.
    pub fn surface_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.surfaces.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn remove_surface(&mut self, key: &str) {
        if let Some(surface) = self.surfaces.remove(key) {
            self.host.remove(&surface);
            self.emitter.emit(HuddleEvent::SurfaceRemoved(surface.key));
        }
    }
}

/// One entry of the [`SurfaceGrid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub key: String,
    pub kind: TrackKind,
    pub label: Option<String>,
}

/// In-memory meeting grid, in insertion order.
#[derive(Default)]
pub struct SurfaceGrid {
    tiles: Mutex<Vec<Tile>>,
}

impl SurfaceGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tiles(&self) -> Vec<Tile> {
        self.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().iter().map(|t| t.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Tile>> {
        self.tiles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SurfaceHost for SurfaceGrid {
    fn insert(&self, surface: &RenderSurface) {
        self.lock().push(Tile {
            key: surface.key.clone(),
            kind: surface.kind,
            label: surface.label.clone(),
        });
    }

    fn remove(&self, surface: &RenderSurface) {
        self.lock().retain(|t| t.key != surface.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTrack;

    fn renderer() -> (RemoteTrackRenderer, Arc<SurfaceGrid>) {
        let grid = Arc::new(SurfaceGrid::new());
        (RemoteTrackRenderer::new(grid.clone(), EventEmitter::new()), grid)
    }

    #[test]
    fn remote_video_gets_labelled_tile() {
        let (mut r, grid) = renderer();
        let track = LoopbackTrack::remote("v1", TrackKind::Video, "alice");

        r.on_track_added(&track);

        assert_eq!(r.surface_keys(), vec!["v1"]);
        assert_eq!(
            grid.tiles(),
            vec![Tile {
                key: "v1".into(),
                kind: TrackKind::Video,
                label: Some("alice".into()),
            }]
        );
        assert_eq!(track.attached_to(), vec!["v1"]);
    }

    #[test]
    fn local_video_is_rendered_local_audio_is_not() {
        let (mut r, grid) = renderer();
        r.on_track_added(&LoopbackTrack::local("cam", TrackKind::Video));
        r.on_track_added(&LoopbackTrack::local("mic", TrackKind::Audio));

        assert_eq!(grid.keys(), vec!["cam"]);
        assert!(r.surface("mic").is_none());
    }

    #[test]
    fn remote_audio_gets_unlabelled_surface() {
        let (mut r, _grid) = renderer();
        r.on_track_added(&LoopbackTrack::remote("a1", TrackKind::Audio, "bob"));

        let surface = r.surface("a1").unwrap();
        assert_eq!(surface.kind, TrackKind::Audio);
        assert!(surface.label.is_none());
    }

    #[test]
    fn add_then_remove_leaves_nothing() {
        let (mut r, grid) = renderer();
        let track = LoopbackTrack::remote("v1", TrackKind::Video, "alice");

        r.on_track_added(&track);
        r.on_track_removed(&track);

        assert_eq!(r.surface_count(), 0);
        assert!(grid.is_empty());
        assert!(track.is_disposed());
    }

    #[test]
    fn removing_unknown_track_is_a_no_op() {
        let (mut r, grid) = renderer();
        r.on_track_added(&LoopbackTrack::remote("v2", TrackKind::Video, "bob"));

        r.on_track_removed(&LoopbackTrack::remote("nope", TrackKind::Video, "x"));

        assert_eq!(grid.keys(), vec!["v2"]);
    }

    #[test]
    fn two_videos_then_remove_first() {
        let (mut r, grid) = renderer();
        let v1 = LoopbackTrack::remote("v1", TrackKind::Video, "alice");
        let v2 = LoopbackTrack::remote("v2", TrackKind::Video, "bob");

        r.on_track_added(&v1);
        r.on_track_added(&v2);
        assert_eq!(r.surface_keys(), vec!["v1", "v2"]);

        r.on_track_removed(&v1);
        assert_eq!(r.surface_keys(), vec!["v2"]);
        assert_eq!(grid.keys(), vec!["v2"]);
    }

    #[test]
    fn re_added_track_keeps_a_single_surface() {
        let (mut r, grid) = renderer();
        let v1 = LoopbackTrack::remote("v1", TrackKind::Video, "alice");

        r.on_track_added(&v1);
        r.on_track_added(&v1);

        assert_eq!(grid.keys(), vec!["v1"]);
        assert_eq!(r.surface_count(), 1);
    }

    #[test]
    fn clear_removes_everything_without_disposing() {
        let (mut r, grid) = renderer();
        let v1 = LoopbackTrack::remote("v1", TrackKind::Video, "alice");
        let a1 = LoopbackTrack::remote("a1", TrackKind::Audio, "alice");
        r.on_track_added(&v1);
        r.on_track_added(&a1);

        r.clear();

        assert!(grid.is_empty());
        assert_eq!(r.surface_count(), 0);
        assert!(!v1.is_disposed());
    }

    #[test]
    fn failed_attach_creates_no_surface() {
        let (mut r, grid) = renderer();
        let track = LoopbackTrack::remote("v1", TrackKind::Video, "alice");
        track.fail_attach();

        r.on_track_added(&track);

        assert!(grid.is_empty());
        assert_eq!(r.surface_count(), 0);
    }
}
