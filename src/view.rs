use crate::config::{CaptureConfig, ChangeSet, SharedConfig, TorchMode};
use crate::device::DeviceDescriptor;
use crate::dispatcher::{FrameDispatcher, FrameProcessor, FrameProcessorSettings};
use crate::error::{CaptureError, ParameterError, Result, SessionError, ViewcamError};
use crate::events::{EventBus, ViewcamEvent};
use crate::lifecycle::{EffectiveState, HostState, LifecycleController, LifecycleObserver};
use crate::performance::{PerformanceDataCollector, PerformanceStatsSnapshot};
use crate::pipeline::{CapturePipeline, FocusPoint, PhotoOptions, PhotoResult};
use crate::recorder::{
    FileSampleWriter, RecordingCallback, RecordingResult, RecordingSession, VideoFileType,
};
use crate::session::{RebuildFailurePolicy, SessionConfigurator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Options for starting a video recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingOptions {
    pub file_type: VideoFileType,
    /// Use the torch as the video's flash for the duration of the
    /// recording; the previous torch mode is restored afterwards.
    pub flash: Option<TorchMode>,
}

/// One logical camera instance: the core object owned by the bridging
/// adapter.
///
/// Owns the declarative configuration, the session configurator, the frame
/// dispatcher and the lifecycle controller, and exposes the command surface
/// (photo, recording, focus, device enumeration). All collaborators are
/// injected at construction; there is no process-wide registry.
pub struct CameraView {
    runtime: Handle,
    pipeline: Arc<dyn CapturePipeline>,
    config: SharedConfig,
    events: EventBus,
    collector: Arc<PerformanceDataCollector>,
    dispatcher: Arc<FrameDispatcher>,
    configurator: Arc<SessionConfigurator>,
    lifecycle: Arc<LifecycleController>,
    capture_dir: PathBuf,
}

/// Routes lifecycle transitions into session work on the runtime.
struct LifecycleBridge {
    runtime: Handle,
    configurator: Arc<SessionConfigurator>,
    dispatcher: Arc<FrameDispatcher>,
    events: EventBus,
}

impl LifecycleObserver for LifecycleBridge {
    fn on_transition(&self, from: EffectiveState, to: EffectiveState) {
        debug!("Lifecycle transition {:?} -> {:?}", from, to);
        let configurator = Arc::clone(&self.configurator);
        let dispatcher = Arc::clone(&self.dispatcher);

        match to {
            EffectiveState::Running => {
                self.runtime.spawn(async move {
                    configurator.ensure_running().await;
                });
            }
            EffectiveState::Paused => {
                self.runtime.spawn(async move {
                    configurator.pause().await;
                });
            }
            EffectiveState::Destroyed => {
                self.runtime.spawn(async move {
                    // A recording surviving until teardown is aborted; its
                    // completion callback must still fire exactly once.
                    if let Some(recording) = dispatcher.recording() {
                        dispatcher.set_recording(None);
                        recording.abort(ViewcamError::Capture(CaptureError::Aborted));
                    }
                    configurator.destroy().await;
                });
            }
        }
    }

    fn on_view_ready(&self) {
        self.events.publish(ViewcamEvent::ViewReady);
    }
}

impl CameraView {
    pub fn builder() -> CameraViewBuilder {
        CameraViewBuilder::new()
    }

    // --- declarative properties -------------------------------------------

    /// Mutate the declarative configuration. The change takes effect once
    /// the corresponding change-set is applied.
    pub fn update_config(&self, mutate: impl FnOnce(&mut CaptureConfig)) {
        self.config.update(mutate);
    }

    pub fn config_snapshot(&self) -> CaptureConfig {
        self.config.snapshot()
    }

    /// Apply a set of changed property names. Fire-and-forget semantics:
    /// errors surface through the event channel, never as a return value.
    pub async fn apply_property_changes(&self, changes: ChangeSet) {
        self.configurator.apply_changes(changes).await;
    }

    /// Like [`Self::apply_property_changes`] but detached, for callers on
    /// non-async paths.
    pub fn apply_property_changes_detached(&self, changes: ChangeSet) {
        let configurator = Arc::clone(&self.configurator);
        self.runtime.spawn(async move {
            configurator.apply_changes(changes).await;
        });
    }

    // --- lifecycle --------------------------------------------------------

    pub fn set_host_state(&self, state: HostState) {
        self.lifecycle.set_host_state(state);
    }

    pub fn set_active(&self, is_active: bool) {
        self.lifecycle.set_active(is_active);
    }

    pub fn set_attached(&self, is_attached: bool) {
        self.lifecycle.set_attached(is_attached);
    }

    pub fn effective_state(&self) -> EffectiveState {
        self.lifecycle.effective_state()
    }

    /// Tear the view down. Terminal; equivalent to the host being
    /// destroyed.
    pub fn destroy(&self) {
        self.lifecycle.set_host_state(HostState::Destroyed);
    }

    // --- frame processor --------------------------------------------------

    pub fn set_frame_processor(&self, processor: Arc<dyn FrameProcessor>) {
        self.dispatcher.set_processor(Some(processor));
    }

    pub fn clear_frame_processor(&self) {
        self.dispatcher.set_processor(None);
    }

    // --- commands ---------------------------------------------------------

    /// Capture a photo, or a preview snapshot when the photo use-case was
    /// demoted on constrained hardware.
    pub async fn take_photo(&self, options: PhotoOptions) -> Result<PhotoResult> {
        if self.config.snapshot().photo != Some(true) {
            return Err(CaptureError::PhotoNotEnabled.into());
        }
        let camera = self
            .configurator
            .bound_camera()
            .await
            .ok_or(ViewcamError::Session(SessionError::CameraNotReady))?;

        if self.configurator.fallback_to_snapshot().await {
            debug!("Photo use-case demoted; taking snapshot instead");
            camera.take_snapshot(&options).await
        } else {
            camera.take_photo(&options).await
        }
    }

    /// Start an exclusive video recording. `on_finished` fires exactly once
    /// with the result or an error, including on teardown.
    pub async fn start_recording(
        &self,
        options: RecordingOptions,
        on_finished: RecordingCallback,
    ) -> Result<()> {
        if self.config.snapshot().video != Some(true) {
            return Err(CaptureError::VideoNotEnabled.into());
        }
        let camera = self
            .configurator
            .bound_camera()
            .await
            .ok_or(ViewcamError::Session(SessionError::CameraNotReady))?;
        if self.dispatcher.recording().is_some() {
            return Err(CaptureError::RecordingInProgress.into());
        }

        let path = self.capture_dir.join(format!(
            "viewcam-{}.{}",
            Uuid::new_v4(),
            options.file_type.extension()
        ));
        let writer = FileSampleWriter::create(&path)?;

        // Drive the torch as the video flash, restoring the configured mode
        // once the recording completes.
        let callback = if let Some(flash) = options.flash {
            camera.set_torch(flash).await?;
            let runtime = self.runtime.clone();
            let restore_camera = Arc::clone(&camera);
            let restore_mode = self.config.snapshot().torch;
            Box::new(move |result: Result<RecordingResult>| {
                runtime.spawn(async move {
                    if let Err(e) = restore_camera.set_torch(restore_mode).await {
                        warn!("Failed to restore torch after recording: {}", e);
                    }
                });
                on_finished(result);
            }) as RecordingCallback
        } else {
            on_finished
        };

        let session = Arc::new(RecordingSession::new(path, Box::new(writer), callback));
        self.dispatcher.set_recording(Some(session));
        info!("Recording started");
        Ok(())
    }

    /// Stop the active recording and deliver its result.
    pub async fn stop_recording(&self) -> Result<()> {
        let recording = self
            .dispatcher
            .recording()
            .ok_or(ViewcamError::Capture(CaptureError::NoRecordingInProgress))?;
        self.dispatcher.set_recording(None);
        recording.finish();
        Ok(())
    }

    pub async fn pause_recording(&self) -> Result<()> {
        let recording = self
            .dispatcher
            .recording()
            .ok_or(ViewcamError::Capture(CaptureError::NoRecordingInProgress))?;
        recording.pause();
        Ok(())
    }

    pub async fn resume_recording(&self) -> Result<()> {
        let recording = self
            .dispatcher
            .recording()
            .ok_or(ViewcamError::Capture(CaptureError::NoRecordingInProgress))?;
        recording.resume();
        Ok(())
    }

    /// Best-effort focus at a normalized point.
    pub async fn focus(&self, point: FocusPoint) -> Result<()> {
        if !point.is_normalized() {
            return Err(ParameterError::Invalid {
                name: "point".to_string(),
                value: format!("({}, {})", point.x, point.y),
            }
            .into());
        }
        let camera = self
            .configurator
            .bound_camera()
            .await
            .ok_or(ViewcamError::Session(SessionError::CameraNotReady))?;
        camera.focus(point).await
    }

    pub async fn available_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.pipeline.available_devices().await
    }

    // --- observation ------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn dispatcher_stats(&self) -> crate::dispatcher::DispatcherStatsSnapshot {
        self.dispatcher.stats()
    }

    pub fn performance_stats(&self) -> PerformanceStatsSnapshot {
        self.collector.stats()
    }
}

/// Builder wiring a [`CameraView`] and its collaborators.
///
/// Must be built inside a tokio runtime; the handle is captured for work
/// dispatched from non-async contexts.
pub struct CameraViewBuilder {
    pipeline: Option<Arc<dyn CapturePipeline>>,
    failure_policy: RebuildFailurePolicy,
    processor_settings: FrameProcessorSettings,
    capture_dir: Option<PathBuf>,
    event_capacity: usize,
    rebuild_retry_delay: Option<Duration>,
}

impl CameraViewBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            failure_policy: RebuildFailurePolicy::default(),
            processor_settings: FrameProcessorSettings::default(),
            capture_dir: None,
            event_capacity: 64,
            rebuild_retry_delay: None,
        }
    }

    pub fn pipeline(mut self, pipeline: Arc<dyn CapturePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn failure_policy(mut self, policy: RebuildFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn processor_settings(mut self, settings: FrameProcessorSettings) -> Self {
        self.processor_settings = settings;
        self
    }

    /// Directory receiving temporary capture files.
    pub fn capture_dir(mut self, dir: PathBuf) -> Self {
        self.capture_dir = Some(dir);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn rebuild_retry_delay(mut self, delay: Duration) -> Self {
        self.rebuild_retry_delay = Some(delay);
        self
    }

    pub fn build(self) -> Result<Arc<CameraView>> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| ViewcamError::unknown("A capture pipeline must be specified"))?;

        let runtime = Handle::current();
        let events = EventBus::new(self.event_capacity);
        let config = SharedConfig::default();
        let collector = Arc::new(PerformanceDataCollector::new());
        let dispatcher = Arc::new(FrameDispatcher::new(
            Arc::clone(&collector),
            events.clone(),
            self.processor_settings,
        ));

        let mut configurator = SessionConfigurator::new(
            Arc::clone(&pipeline),
            config.clone(),
            Arc::clone(&dispatcher),
            events.clone(),
            self.failure_policy,
        );
        if let Some(delay) = self.rebuild_retry_delay {
            configurator = configurator.with_retry_delay(delay);
        }
        let configurator = Arc::new(configurator);

        let lifecycle = Arc::new(LifecycleController::new());
        lifecycle.set_observer(Arc::new(LifecycleBridge {
            runtime: runtime.clone(),
            configurator: Arc::clone(&configurator),
            dispatcher: Arc::clone(&dispatcher),
            events: events.clone(),
        }));

        Ok(Arc::new(CameraView {
            runtime,
            pipeline,
            config,
            events,
            collector,
            dispatcher,
            configurator,
            lifecycle,
            capture_dir: self.capture_dir.unwrap_or_else(std::env::temp_dir),
        }))
    }
}

impl Default for CameraViewBuilder {
    fn default() -> Self {
        Self::new()
    }
}
