use crate::backend::{DeviceConstraints, DeviceKind, MediaDevices};
use crate::errors::HuddleError;

/// A selectable camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInput {
    pub id: String,
    pub label: String,
}

/// Acquires local capture tracks and lists cameras for device selection.
pub struct DeviceTrackProvider<D> {
    devices: D,
}

impl<D: MediaDevices> DeviceTrackProvider<D> {
    pub fn new(devices: D) -> Self {
        Self { devices }
    }

    /// Request camera and microphone capture.
    ///
    /// Any capture failure (permission denied, device busy, no device)
    /// is returned as [`HuddleError::TracksUnavailable`].
    pub async fn acquire_local_tracks(
        &self,
        constraints: &DeviceConstraints,
    ) -> Result<Vec<D::Track>, HuddleError> {
        let tracks = self
            .devices
            .create_local_tracks(constraints)
            .await
            .map_err(|e| HuddleError::TracksUnavailable(e.to_string()))?;

        if tracks.is_empty() {
            return Err(HuddleError::TracksUnavailable(
                "capture returned no tracks".into(),
            ));
        }

        tracing::info!(
            count = tracks.len(),
            camera = constraints.camera_device_id.as_deref().unwrap_or("default"),
            "local tracks acquired"
        );
        Ok(tracks)
    }

    /// Cameras with a real identity, sorted by label.
    pub async fn enumerate_video_inputs(&self) -> Result<Vec<VideoInput>, HuddleError> {
        let devices = self
            .devices
            .enumerate_devices()
            .await
            .map_err(|e| HuddleError::TracksUnavailable(format!("enumerate devices: {e}")))?;

        let mut inputs: Vec<VideoInput> = devices
            .into_iter()
            .filter(|d| d.kind == DeviceKind::VideoInput && !d.device_id.is_empty())
            .map(|d| VideoInput {
                id: d.device_id,
                label: d.label,
            })
            .collect();
        inputs.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(inputs)
    }

    pub fn media_devices(&self) -> &D {
        &self.devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MediaDeviceInfo, MediaTrack, TrackKind};
    use crate::loopback::{LoopbackDevices, LoopbackService};

    fn device(id: &str, label: &str, kind: DeviceKind) -> MediaDeviceInfo {
        MediaDeviceInfo {
            device_id: id.to_string(),
            label: label.to_string(),
            kind,
        }
    }

    fn provider(devices: Vec<MediaDeviceInfo>) -> (DeviceTrackProvider<LoopbackDevices>, LoopbackService) {
        let service = LoopbackService::new();
        let media = LoopbackDevices::with_devices(&service, devices);
        (DeviceTrackProvider::new(media), service)
    }

    #[tokio::test]
    async fn video_inputs_are_filtered_and_sorted() {
        let (p, _service) = provider(vec![
            device("cam-z", "Zeta Cam", DeviceKind::VideoInput),
            device("", "", DeviceKind::VideoInput),
            device("mic-1", "Built-in Mic", DeviceKind::AudioInput),
            device("cam-a", "Alpha Cam", DeviceKind::VideoInput),
            device("spk", "Speakers", DeviceKind::AudioOutput),
        ]);

        let inputs = p.enumerate_video_inputs().await.unwrap();

        assert_eq!(
            inputs,
            vec![
                VideoInput { id: "cam-a".into(), label: "Alpha Cam".into() },
                VideoInput { id: "cam-z".into(), label: "Zeta Cam".into() },
            ]
        );
    }

    #[tokio::test]
    async fn acquires_audio_then_video_pinned_to_camera() {
        let (p, _service) = provider(vec![
            device("camA", "Camera A", DeviceKind::VideoInput),
            device("camB", "Camera B", DeviceKind::VideoInput),
            device("micA", "Mic A", DeviceKind::AudioInput),
        ]);
        let constraints = DeviceConstraints {
            camera_device_id: Some("camB".into()),
            ..Default::default()
        };

        let tracks = p.acquire_local_tracks(&constraints).await.unwrap();

        let kinds: Vec<TrackKind> = tracks.iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec![TrackKind::Audio, TrackKind::Video]);
        assert_eq!(tracks[1].device_id(), Some("camB"));
        assert!(tracks.iter().all(|t| t.is_local()));
    }

    #[tokio::test]
    async fn capture_failure_is_tracks_unavailable() {
        let (p, service) = provider(vec![device("camA", "Camera A", DeviceKind::VideoInput)]);
        service.faults().deny_capture = true;

        let err = p.acquire_local_tracks(&DeviceConstraints::default()).await.unwrap_err();
        assert!(matches!(err, HuddleError::TracksUnavailable(_)));
    }

    #[tokio::test]
    async fn unknown_camera_is_tracks_unavailable() {
        let (p, _service) = provider(vec![
            device("camA", "Camera A", DeviceKind::VideoInput),
            device("micA", "Mic A", DeviceKind::AudioInput),
        ]);
        let constraints = DeviceConstraints {
            camera_device_id: Some("ghost".into()),
            ..Default::default()
        };

        let err = p.acquire_local_tracks(&constraints).await.unwrap_err();
        assert!(matches!(err, HuddleError::TracksUnavailable(_)));
    }
}
