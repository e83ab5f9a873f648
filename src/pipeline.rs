use crate::config::TorchMode;
use crate::device::{DeviceDescriptor, DeviceFormat};
use crate::error::{DeviceError, Result, ViewcamError};
use crate::frame::{Frame, FrameFormat, Orientation};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// One bindable capability of the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UseCase {
    Preview,
    Photo,
    Video,
    FrameAnalysis,
}

/// A fully validated binding plan produced by the session configurator.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub device: DeviceDescriptor,
    pub format: DeviceFormat,
    pub use_cases: Vec<UseCase>,
    /// Negotiated capture frame rate
    pub fps: u32,
    pub enable_audio: bool,
    /// Photo demoted to on-demand snapshot because the device cannot bind
    /// enough concurrent use-cases
    pub fallback_to_snapshot: bool,
}

/// Flash behavior for a single photo capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    Off,
    On,
    #[default]
    Auto,
}

/// Options for a single photo capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoOptions {
    pub flash: FlashMode,
    pub enable_raw: bool,
}

/// Result of a photo or snapshot capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoResult {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub is_raw_photo: bool,
    pub exif_metadata: serde_json::Map<String, serde_json::Value>,
}

/// A normalized focus point, both coordinates in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusPoint {
    pub x: f64,
    pub y: f64,
}

impl FocusPoint {
    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Receiver of captured frames. The capture pipeline calls `on_frame` once
/// per frame on its delivery context; implementations own the handle from
/// that point and must close it exactly once.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: Arc<Frame>);
}

/// The platform capture pipeline behind the core.
#[async_trait]
pub trait CapturePipeline: Send + Sync {
    async fn available_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Bind a validated plan to the device, exclusively. At most one bound
    /// camera per pipeline is active at a time; the configurator releases
    /// the previous binding first.
    async fn bind(&self, plan: &SessionPlan) -> Result<Arc<dyn BoundCamera>>;
}

/// A device with a bound set of use-cases.
#[async_trait]
pub trait BoundCamera: Send + Sync {
    fn device(&self) -> &DeviceDescriptor;

    async fn set_zoom(&self, factor: f32) -> Result<()>;
    async fn set_torch(&self, mode: TorchMode) -> Result<()>;
    async fn set_orientation(&self, orientation: Orientation) -> Result<()>;
    async fn focus(&self, point: FocusPoint) -> Result<()>;

    async fn take_photo(&self, options: &PhotoOptions) -> Result<PhotoResult>;
    /// Grab the latest preview frame instead of a bound photo use-case.
    async fn take_snapshot(&self, options: &PhotoOptions) -> Result<PhotoResult>;

    async fn start_frames(&self, sink: Arc<dyn FrameSink>) -> Result<()>;
    async fn stop_frames(&self);
    async fn release(&self);
}

/// In-process capture pipeline with a configurable device table.
///
/// Synthesizes frames at the negotiated rate on a tokio task and writes
/// capture artifacts into a scratch directory. Serves as the test double
/// for the whole crate and as a way to drive the core without hardware.
pub struct SimulatedPipeline {
    devices: Vec<DeviceDescriptor>,
    output_dir: PathBuf,
    bind_count: AtomicU64,
    injected_bind_errors: Mutex<Vec<ViewcamError>>,
}

impl SimulatedPipeline {
    pub fn new(devices: Vec<DeviceDescriptor>, output_dir: PathBuf) -> Self {
        Self {
            devices,
            output_dir,
            bind_count: AtomicU64::new(0),
            injected_bind_errors: Mutex::new(Vec::new()),
        }
    }

    /// Pipeline with a typical two-camera device table.
    pub fn with_default_devices() -> Self {
        Self::new(default_device_table(), std::env::temp_dir())
    }

    /// Number of successful binds since creation. Lets tests assert that
    /// runtime-only changes never rebind.
    pub fn bind_count(&self) -> u64 {
        self.bind_count.load(Ordering::SeqCst)
    }

    /// Queue an error to be returned by the next `bind` call.
    pub fn inject_bind_error(&self, error: ViewcamError) {
        self.injected_bind_errors.lock().push(error);
    }
}

#[async_trait]
impl CapturePipeline for SimulatedPipeline {
    async fn available_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    async fn bind(&self, plan: &SessionPlan) -> Result<Arc<dyn BoundCamera>> {
        if let Some(error) = {
            let mut injected = self.injected_bind_errors.lock();
            if injected.is_empty() {
                None
            } else {
                Some(injected.remove(0))
            }
        } {
            warn!("Simulated bind failure: {}", error);
            return Err(error);
        }

        let device = self
            .devices
            .iter()
            .find(|d| d.id == plan.device.id)
            .ok_or_else(|| DeviceError::NotFound {
                camera_id: plan.device.id.clone(),
            })?;

        self.bind_count.fetch_add(1, Ordering::SeqCst);
        info!(
            "Bound simulated camera \"{}\" with {} use-cases at {} fps",
            device.id,
            plan.use_cases.len(),
            plan.fps
        );

        Ok(Arc::new(SimulatedCamera {
            device: device.clone(),
            plan: plan.clone(),
            output_dir: self.output_dir.clone(),
            zoom: Mutex::new(1.0),
            torch: Mutex::new(TorchMode::Off),
            orientation: Mutex::new(Orientation::Portrait),
            cancel: CancellationToken::new(),
            frame_task: Mutex::new(None),
        }))
    }
}

/// A bound simulated camera generating synthetic frames.
pub struct SimulatedCamera {
    device: DeviceDescriptor,
    plan: SessionPlan,
    output_dir: PathBuf,
    zoom: Mutex<f32>,
    torch: Mutex<TorchMode>,
    orientation: Mutex<Orientation>,
    cancel: CancellationToken,
    frame_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedCamera {
    fn synthesize_capture(&self, width: u32, height: u32, snapshot: bool) -> PhotoResult {
        let path = self
            .output_dir
            .join(format!("viewcam-{}.jpg", Uuid::new_v4()));

        // Small deterministic payload; enough for the artifact to exist.
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let mut exif = serde_json::Map::new();
        exif.insert(
            "DateTimeOriginal".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        exif.insert("PixelXDimension".to_string(), width.into());
        exif.insert("PixelYDimension".to_string(), height.into());
        if snapshot {
            exif.insert("Snapshot".to_string(), true.into());
        }

        match std::fs::write(&path, &data) {
            Ok(()) => {}
            Err(e) => warn!("Failed to write capture artifact: {}", e),
        }

        PhotoResult {
            path,
            width,
            height,
            is_raw_photo: false,
            exif_metadata: exif,
        }
    }
}

#[async_trait]
impl BoundCamera for SimulatedCamera {
    fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    async fn set_zoom(&self, factor: f32) -> Result<()> {
        *self.zoom.lock() = factor;
        Ok(())
    }

    async fn set_torch(&self, mode: TorchMode) -> Result<()> {
        if mode == TorchMode::On && !self.device.has_torch {
            return Err(DeviceError::ConfigureError {
                details: format!("device \"{}\" has no torch", self.device.id),
            }
            .into());
        }
        *self.torch.lock() = mode;
        Ok(())
    }

    async fn set_orientation(&self, orientation: Orientation) -> Result<()> {
        *self.orientation.lock() = orientation;
        Ok(())
    }

    async fn focus(&self, point: FocusPoint) -> Result<()> {
        if !self.device.supports_focus {
            return Err(DeviceError::FocusNotSupported.into());
        }
        debug!(
            "Simulated focus on \"{}\" at ({:.2}, {:.2})",
            self.device.id, point.x, point.y
        );
        Ok(())
    }

    async fn take_photo(&self, options: &PhotoOptions) -> Result<PhotoResult> {
        let mut result = self.synthesize_capture(
            self.plan.format.photo_width,
            self.plan.format.photo_height,
            false,
        );
        result.is_raw_photo = options.enable_raw && self.device.supports_raw_capture;
        Ok(result)
    }

    async fn take_snapshot(&self, _options: &PhotoOptions) -> Result<PhotoResult> {
        Ok(self.synthesize_capture(
            self.plan.format.video_width,
            self.plan.format.video_height,
            true,
        ))
    }

    async fn start_frames(&self, sink: Arc<dyn FrameSink>) -> Result<()> {
        let mut task = self.frame_task.lock();
        if task.is_some() {
            debug!("Frame generation already running");
            return Ok(());
        }

        let fps = self.plan.fps.max(1);
        let frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
        let width = self.plan.format.video_width;
        let height = self.plan.format.video_height;
        let orientation = *self.orientation.lock();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame_interval);
            let mut sequence: u64 = 0;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Frame generation stopped after {} frames", sequence);
                        break;
                    }
                    _ = interval.tick() => {
                        // Deterministic presentation timestamps derived from
                        // the frame index, like a sensor clock.
                        let pts = frame_interval * sequence as u32;
                        let size = FrameFormat::Nv12.buffer_size(width, height);
                        let fill = (sequence % 256) as u8;
                        let frame = Frame::new(
                            sequence,
                            pts,
                            vec![fill; size],
                            width,
                            height,
                            FrameFormat::Nv12,
                            orientation,
                        );
                        trace!("Generated simulated frame {}", sequence);
                        sink.on_frame(Arc::new(frame));
                        sequence += 1;
                    }
                }
            }
        });

        *task = Some(handle);
        Ok(())
    }

    async fn stop_frames(&self) {
        self.cancel.cancel();
        let task = self.frame_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn release(&self) {
        self.stop_frames().await;
        info!("Released simulated camera \"{}\"", self.device.id);
    }
}

/// A typical two-camera device table for tests and demos.
pub fn default_device_table() -> Vec<DeviceDescriptor> {
    use crate::device::{ColorSpace, DevicePosition};

    let back_formats = vec![
        DeviceFormat {
            photo_width: 4000,
            photo_height: 3000,
            video_width: 1920,
            video_height: 1080,
            min_fps: 1,
            max_fps: 60,
            supports_hdr: true,
            color_spaces: vec![ColorSpace::Srgb, ColorSpace::P3D65],
        },
        DeviceFormat {
            photo_width: 2000,
            photo_height: 1500,
            video_width: 1280,
            video_height: 720,
            min_fps: 1,
            max_fps: 30,
            supports_hdr: false,
            color_spaces: vec![ColorSpace::Srgb],
        },
    ];

    let front_formats = vec![DeviceFormat {
        photo_width: 2000,
        photo_height: 1500,
        video_width: 1280,
        video_height: 720,
        min_fps: 1,
        max_fps: 30,
        supports_hdr: false,
        color_spaces: vec![ColorSpace::Srgb],
    }];

    vec![
        DeviceDescriptor {
            id: "back".to_string(),
            name: "Back Camera".to_string(),
            position: DevicePosition::Back,
            min_zoom: 1.0,
            max_zoom: 8.0,
            has_flash: true,
            has_torch: true,
            supports_focus: true,
            supports_low_light_boost: true,
            supports_depth_capture: false,
            supports_raw_capture: true,
            max_concurrent_use_cases: 4,
            formats: back_formats,
        },
        DeviceDescriptor {
            id: "front".to_string(),
            name: "Front Camera".to_string(),
            position: DevicePosition::Front,
            min_zoom: 1.0,
            max_zoom: 4.0,
            has_flash: false,
            has_torch: false,
            supports_focus: false,
            supports_low_light_boost: false,
            supports_depth_capture: true,
            supports_raw_capture: false,
            max_concurrent_use_cases: 3,
            formats: front_formats,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::time::timeout;

    struct CountingSink {
        frames: AtomicU64,
    }

    impl FrameSink for CountingSink {
        fn on_frame(&self, frame: Arc<Frame>) {
            self.frames.fetch_add(1, Ordering::SeqCst);
            frame.close();
        }
    }

    fn plan_for(pipeline_device: &DeviceDescriptor, fps: u32) -> SessionPlan {
        SessionPlan {
            device: pipeline_device.clone(),
            format: pipeline_device.formats[0].clone(),
            use_cases: vec![UseCase::Preview, UseCase::FrameAnalysis],
            fps,
            enable_audio: false,
            fallback_to_snapshot: false,
        }
    }

    #[tokio::test]
    async fn test_available_devices() {
        let pipeline = SimulatedPipeline::with_default_devices();
        let devices = pipeline.available_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().any(|d| d.id == "back"));
        assert!(devices.iter().any(|d| d.id == "front"));
    }

    #[tokio::test]
    async fn test_bind_unknown_device_fails() {
        let pipeline = SimulatedPipeline::with_default_devices();
        let mut ghost = pipeline.available_devices().await.unwrap()[0].clone();
        ghost.id = "ultrawide".to_string();

        let result = pipeline.bind(&plan_for(&ghost, 30)).await;
        assert_eq!(result.err().unwrap().code(), "device/not-found");
    }

    #[tokio::test]
    async fn test_injected_bind_error_fires_once() {
        let pipeline = SimulatedPipeline::with_default_devices();
        let device = pipeline.available_devices().await.unwrap()[0].clone();
        pipeline.inject_bind_error(crate::error::SessionError::CameraNotReady.into());

        let first = pipeline.bind(&plan_for(&device, 30)).await;
        assert_eq!(first.err().unwrap().code(), "session/camera-not-ready");

        let second = pipeline.bind(&plan_for(&device, 30)).await;
        assert!(second.is_ok());
        assert_eq!(pipeline.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_frame_generation_delivers_to_sink() {
        let pipeline = SimulatedPipeline::with_default_devices();
        let device = pipeline.available_devices().await.unwrap()[0].clone();
        let camera = pipeline.bind(&plan_for(&device, 100)).await.unwrap();

        let sink = Arc::new(CountingSink {
            frames: AtomicU64::new(0),
        });
        camera.start_frames(sink.clone()).await.unwrap();

        timeout(Duration::from_secs(2), async {
            while sink.frames.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink should receive frames");

        camera.stop_frames().await;
        let after_stop = sink.frames.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.frames.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_take_photo_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            SimulatedPipeline::new(default_device_table(), dir.path().to_path_buf());
        let device = pipeline.available_devices().await.unwrap()[0].clone();
        let camera = pipeline.bind(&plan_for(&device, 30)).await.unwrap();

        let result = camera.take_photo(&PhotoOptions::default()).await.unwrap();
        assert_eq!(result.width, 4000);
        assert_eq!(result.height, 3000);
        assert!(result.path.exists());
        assert!(result.exif_metadata.contains_key("DateTimeOriginal"));
    }

    #[tokio::test]
    async fn test_snapshot_uses_video_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            SimulatedPipeline::new(default_device_table(), dir.path().to_path_buf());
        let device = pipeline.available_devices().await.unwrap()[0].clone();
        let camera = pipeline.bind(&plan_for(&device, 30)).await.unwrap();

        let result = camera
            .take_snapshot(&PhotoOptions::default())
            .await
            .unwrap();
        assert_eq!(result.width, 1920);
        assert_eq!(result.height, 1080);
        assert_eq!(result.exif_metadata["Snapshot"], true);
    }

    #[tokio::test]
    async fn test_focus_unsupported_device() {
        let pipeline = SimulatedPipeline::with_default_devices();
        let front = pipeline
            .available_devices()
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.id == "front")
            .unwrap();
        let camera = pipeline.bind(&plan_for(&front, 30)).await.unwrap();

        let result = camera.focus(FocusPoint { x: 0.5, y: 0.5 }).await;
        assert_eq!(result.err().unwrap().code(), "device/focus-not-supported");
    }

    #[test]
    fn test_focus_point_normalization() {
        assert!(FocusPoint { x: 0.0, y: 1.0 }.is_normalized());
        assert!(!FocusPoint { x: 1.5, y: 0.5 }.is_normalized());
        assert!(!FocusPoint { x: 0.5, y: -0.1 }.is_normalized());
    }
}
