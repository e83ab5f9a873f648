use crate::config::{CaptureConfig, ChangeSet, PropName, SharedConfig};
use crate::device::DeviceFormat;
use crate::dispatcher::FrameDispatcher;
use crate::error::{DeviceError, FormatError, Result, SessionError, ViewcamError};
use crate::events::{EventBus, ViewcamEvent};
use crate::pipeline::{BoundCamera, CapturePipeline, FrameSink, SessionPlan, UseCase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before the single automatic re-attempt after a transient rebuild
/// failure.
const DEFAULT_REBUILD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What to do with the session when a rebuild fails at the bind stage.
///
/// The two platform implementations this core descends from disagreed; the
/// choice is an explicit, testable policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RebuildFailurePolicy {
    /// Re-bind the previously working plan so the session stays usable.
    #[default]
    RestorePrevious,
    /// Leave the session unbound until the next property change.
    LeaveUnbound,
}

struct SessionState {
    bound: Option<Arc<dyn BoundCamera>>,
    /// Last successfully validated plan; kept across pauses so resuming is
    /// a plain re-bind.
    plan: Option<SessionPlan>,
    /// Whether frame delivery should be running (lifecycle "running")
    delivering: bool,
}

/// Owns the declarative configuration's application to the capture
/// pipeline: classifies change-sets, rebuilds/binds use-cases, and applies
/// runtime properties to the live session.
///
/// Rebuilds are serialized with each other through an async mutex and run
/// off the frame-delivery context. Configuration/session errors are never
/// returned to the caller; they go through the event channel.
pub struct SessionConfigurator {
    pipeline: Arc<dyn CapturePipeline>,
    config: SharedConfig,
    dispatcher: Arc<FrameDispatcher>,
    events: EventBus,
    failure_policy: RebuildFailurePolicy,
    retry_delay: Duration,
    state: AsyncMutex<SessionState>,
    cancel: CancellationToken,
}

impl SessionConfigurator {
    pub fn new(
        pipeline: Arc<dyn CapturePipeline>,
        config: SharedConfig,
        dispatcher: Arc<FrameDispatcher>,
        events: EventBus,
        failure_policy: RebuildFailurePolicy,
    ) -> Self {
        Self {
            pipeline,
            config,
            dispatcher,
            events,
            failure_policy,
            retry_delay: DEFAULT_REBUILD_RETRY_DELAY,
            state: AsyncMutex::new(SessionState {
                bound: None,
                plan: None,
                delivering: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the transient-failure retry delay (tests).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply a classified change-set. Fire-and-forget: failures surface as
    /// error events, successes as one `Initialized` event per rebuild.
    pub async fn apply_changes(self: &Arc<Self>, changes: ChangeSet) {
        if changes.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        // The frame-processor rate is owned by the dispatcher; hand it over
        // before any session work.
        if changes.contains(PropName::FrameProcessorFps) {
            let fps = self.config.snapshot().frame_processor_fps;
            self.dispatcher.set_target_fps(fps);
        }

        if changes.requires_rebuild() {
            self.run_rebuild().await;
        } else if let Err(e) = self.apply_runtime(&changes).await {
            self.events.emit_error(&e);
        }
    }

    /// Transition into the running state: re-bind the retained plan if the
    /// device was released, or run a full rebuild when nothing was
    /// validated yet, then start frame delivery.
    pub async fn ensure_running(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let need_full_rebuild = {
            let mut state = self.state.lock().await;
            state.delivering = true;

            if let Some(camera) = state.bound.clone() {
                let sink: Arc<dyn FrameSink> = Arc::clone(&self.dispatcher) as _;
                if let Err(e) = camera.start_frames(sink).await {
                    drop(state);
                    self.events.emit_error(&e);
                    return;
                }
                false
            } else if let Some(plan) = state.plan.clone() {
                let config = self.config.snapshot();
                match self.bind_plan(&plan, &config, true).await {
                    Ok(camera) => {
                        state.bound = Some(camera);
                        info!("Resumed capture session for \"{}\"", plan.device.id);
                        false
                    }
                    Err(e) => {
                        drop(state);
                        self.events.emit_error(&e);
                        return;
                    }
                }
            } else {
                true
            }
        };

        self.dispatcher.set_active(true);

        if need_full_rebuild {
            self.run_rebuild().await;
        }
    }

    /// Transition out of the running state: stop frame delivery and release
    /// the device, but keep the validated plan for a cheap resume.
    pub async fn pause(&self) {
        self.dispatcher.set_active(false);
        let mut state = self.state.lock().await;
        state.delivering = false;
        if let Some(camera) = state.bound.take() {
            camera.stop_frames().await;
            camera.release().await;
            info!("Capture session paused, device released");
        }
    }

    /// Terminal teardown. Idempotent; everything after it is a no-op.
    pub async fn destroy(&self) {
        self.cancel.cancel();
        self.dispatcher.shutdown();
        let mut state = self.state.lock().await;
        state.delivering = false;
        state.plan = None;
        if let Some(camera) = state.bound.take() {
            camera.stop_frames().await;
            camera.release().await;
        }
        info!("Capture session destroyed");
    }

    /// The currently bound camera, if any.
    pub async fn bound_camera(&self) -> Option<Arc<dyn BoundCamera>> {
        self.state.lock().await.bound.clone()
    }

    /// The last validated plan, if any.
    pub async fn current_plan(&self) -> Option<SessionPlan> {
        self.state.lock().await.plan.clone()
    }

    /// Whether photo capture is currently demoted to on-demand snapshots.
    pub async fn fallback_to_snapshot(&self) -> bool {
        self.state
            .lock()
            .await
            .plan
            .as_ref()
            .map(|p| p.fallback_to_snapshot)
            .unwrap_or(false)
    }

    /// One rebuild with the single-retry policy for transient failures.
    /// Emits exactly one `Initialized` on success, exactly one error event
    /// on (final) failure.
    async fn run_rebuild(self: &Arc<Self>) {
        match self.rebuild_once().await {
            Ok(true) => {
                self.events.publish(ViewcamEvent::Initialized);
            }
            Ok(false) => {}
            Err(e) if e.is_transient() => {
                warn!(
                    "Session rebuild failed with transient error ({}), retrying once in {:?}",
                    e.code(),
                    self.retry_delay
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
                match self.rebuild_once().await {
                    Ok(true) => {
                        self.events.publish(ViewcamEvent::Initialized);
                    }
                    Ok(false) => {}
                    Err(e) => self.events.emit_error(&e),
                }
            }
            Err(e) => self.events.emit_error(&e),
        }
    }

    /// Returns `Ok(true)` when a configuration was applied, `Ok(false)`
    /// when the rebuild was skipped because the session is being torn down.
    async fn rebuild_once(&self) -> Result<bool> {
        // Serialized against concurrent rebuilds; the configuration is read
        // as one consistent snapshot.
        let mut state = self.state.lock().await;
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let config = self.config.snapshot();
        info!("Configuring camera session...");
        let plan = self.build_plan(&config).await?;

        let previous_plan = state.plan.clone();
        if let Some(old) = state.bound.take() {
            old.stop_frames().await;
            old.release().await;
        }

        if !state.delivering {
            // Paused: keep the hardware closed, retain the validated plan
            // for the next transition into running.
            debug!("Session not running; plan validated and stored");
            state.plan = Some(plan);
            return Ok(true);
        }

        match self.bind_plan(&plan, &config, true).await {
            Ok(camera) => {
                info!(
                    "Session configured: device \"{}\", {} use-cases, {} fps",
                    plan.device.id,
                    plan.use_cases.len(),
                    plan.fps
                );
                state.bound = Some(camera);
                state.plan = Some(plan);
                Ok(true)
            }
            Err(e) => {
                match self.failure_policy {
                    RebuildFailurePolicy::RestorePrevious => {
                        if let Some(previous) = previous_plan {
                            match self.bind_plan(&previous, &config, true).await {
                                Ok(camera) => {
                                    warn!(
                                        "Rebuild failed; restored previous configuration \
                                         for \"{}\"",
                                        previous.device.id
                                    );
                                    state.bound = Some(camera);
                                    state.plan = Some(previous);
                                }
                                Err(restore_error) => {
                                    warn!(
                                        "Could not restore previous configuration: {}",
                                        restore_error
                                    );
                                }
                            }
                        }
                    }
                    RebuildFailurePolicy::LeaveUnbound => {
                        debug!("Rebuild failed; leaving session unbound");
                    }
                }
                Err(e)
            }
        }
    }

    /// Validate the configuration snapshot into a bindable plan. Pure with
    /// respect to the current binding.
    async fn build_plan(&self, config: &CaptureConfig) -> Result<SessionPlan> {
        let camera_id = config
            .camera_id
            .clone()
            .ok_or(ViewcamError::Device(DeviceError::NoDevice))?;

        let devices = self.pipeline.available_devices().await?;
        let device = devices
            .into_iter()
            .find(|d| d.id == camera_id)
            .ok_or(ViewcamError::Device(DeviceError::NotFound {
                camera_id: camera_id.clone(),
            }))?;

        let photo = config.photo == Some(true);
        let video = config.video == Some(true);
        let frame_processing = config.enable_frame_processor;

        // Re-evaluated on every rebuild, never cached across configurations.
        let fallback_to_snapshot =
            evaluate_snapshot_fallback(device.max_concurrent_use_cases, photo, video, frame_processing);

        let mut use_cases = vec![UseCase::Preview];
        if photo && !fallback_to_snapshot {
            use_cases.push(UseCase::Photo);
        }
        if video {
            use_cases.push(UseCase::Video);
        }
        if frame_processing {
            use_cases.push(UseCase::FrameAnalysis);
        }

        if use_cases.len() > device.max_concurrent_use_cases {
            return Err(SessionError::ParallelUseNotSupported {
                requested: use_cases.len(),
                supported: device.max_concurrent_use_cases,
            }
            .into());
        }

        let filter = config.effective_format_filter();
        let format: DeviceFormat = match filter.select(&device.formats) {
            Some(format) => format.clone(),
            None => return Err(most_specific_format_error(&device.formats, config)),
        };

        if config.low_light_boost == Some(true) && !device.supports_low_light_boost {
            return Err(DeviceError::LowLightBoostNotSupported.into());
        }

        let fps = config.fps.unwrap_or_else(|| format.max_fps.min(30));

        Ok(SessionPlan {
            device,
            format,
            use_cases,
            fps,
            enable_audio: config.audio == Some(true),
            fallback_to_snapshot,
        })
    }

    /// Bind a plan and re-apply the runtime properties; on any failure the
    /// partially configured camera is released so no half-bound session
    /// survives.
    async fn bind_plan(
        &self,
        plan: &SessionPlan,
        config: &CaptureConfig,
        start_delivery: bool,
    ) -> Result<Arc<dyn BoundCamera>> {
        let camera = self.pipeline.bind(plan).await?;

        let configure = async {
            camera
                .set_zoom(plan.device.clamp_zoom(config.zoom))
                .await?;
            camera.set_torch(config.torch).await?;
            if let Some(orientation) = config.orientation {
                camera.set_orientation(orientation).await?;
            }
            if start_delivery {
                let sink: Arc<dyn FrameSink> = Arc::clone(&self.dispatcher) as _;
                camera.start_frames(sink).await?;
            }
            Ok::<(), ViewcamError>(())
        };

        match configure.await {
            Ok(()) => Ok(camera),
            Err(e) => {
                camera.release().await;
                Err(e)
            }
        }
    }

    /// Apply a runtime-only change-set to the live session; the bound
    /// device identity is untouched.
    async fn apply_runtime(&self, changes: &ChangeSet) -> Result<()> {
        let state = self.state.lock().await;
        let config = self.config.snapshot();

        let Some(camera) = state.bound.clone() else {
            // Nothing bound; the values are picked up by the next bind.
            return Ok(());
        };

        if changes.contains(PropName::Zoom) {
            let clamped = camera.device().clamp_zoom(config.zoom);
            camera.set_zoom(clamped).await?;
        }
        if changes.contains(PropName::Torch) {
            camera.set_torch(config.torch).await?;
        }
        if changes.contains(PropName::Orientation) {
            if let Some(orientation) = config.orientation {
                camera.set_orientation(orientation).await?;
            }
        }
        Ok(())
    }
}

/// Whether photo capture must be demoted to on-demand snapshots: the device
/// cannot bind preview + photo + the other requested use-cases at once, but
/// dropping the photo use-case makes the rest fit.
fn evaluate_snapshot_fallback(
    max_concurrent: usize,
    photo: bool,
    video: bool,
    frame_processing: bool,
) -> bool {
    if !photo {
        return false;
    }
    if !video && !frame_processing {
        // Photo is the only supplementary use-case; nothing to demote for.
        return false;
    }
    let requested =
        1 + usize::from(photo) + usize::from(video) + usize::from(frame_processing);
    requested > max_concurrent
}

/// Map a failed format selection to the most specific error the
/// configuration allows.
fn most_specific_format_error(
    formats: &[DeviceFormat],
    config: &CaptureConfig,
) -> ViewcamError {
    if let Some(fps) = config.fps {
        if !formats.iter().any(|f| f.supports_fps(fps)) {
            return FormatError::InvalidFps { fps }.into();
        }
    }
    if config.hdr == Some(true) && !formats.iter().any(|f| f.supports_hdr) {
        return FormatError::InvalidHdr.into();
    }
    if let Some(color_space) = config.color_space {
        if !formats.iter().any(|f| f.supports_color_space(color_space)) {
            return FormatError::InvalidColorSpace {
                color_space: format!("{color_space:?}"),
            }
            .into();
        }
    }
    FormatError::InvalidFormat.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TorchMode;
    use crate::device::{ColorSpace, DeviceDescriptor, DevicePosition};
    use crate::dispatcher::FrameProcessorSettings;
    use crate::error::SessionError;
    use crate::performance::PerformanceDataCollector;
    use crate::pipeline::SimulatedPipeline;
    use tokio::sync::broadcast;

    fn constrained_device(id: &str, max_concurrent: usize) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: format!("{id} camera"),
            position: DevicePosition::Back,
            min_zoom: 1.0,
            max_zoom: 4.0,
            has_flash: true,
            has_torch: true,
            supports_focus: true,
            supports_low_light_boost: false,
            supports_depth_capture: false,
            supports_raw_capture: false,
            max_concurrent_use_cases: max_concurrent,
            formats: vec![DeviceFormat {
                photo_width: 4000,
                photo_height: 3000,
                video_width: 1920,
                video_height: 1080,
                min_fps: 1,
                max_fps: 30,
                supports_hdr: false,
                color_spaces: vec![ColorSpace::Srgb],
            }],
        }
    }

    struct Harness {
        configurator: Arc<SessionConfigurator>,
        pipeline: Arc<SimulatedPipeline>,
        config: SharedConfig,
        events: broadcast::Receiver<ViewcamEvent>,
    }

    fn harness_with(
        devices: Vec<DeviceDescriptor>,
        policy: RebuildFailurePolicy,
    ) -> Harness {
        let events = EventBus::new(64);
        let receiver = events.subscribe();
        let pipeline = Arc::new(SimulatedPipeline::new(devices, std::env::temp_dir()));
        let config = SharedConfig::default();
        let dispatcher = Arc::new(FrameDispatcher::new(
            Arc::new(PerformanceDataCollector::new()),
            events.clone(),
            FrameProcessorSettings::default(),
        ));
        let configurator = Arc::new(
            SessionConfigurator::new(
                Arc::clone(&pipeline) as Arc<dyn CapturePipeline>,
                config.clone(),
                dispatcher,
                events,
                policy,
            )
            .with_retry_delay(Duration::from_millis(10)),
        );
        Harness {
            configurator,
            pipeline,
            config,
            events: receiver,
        }
    }

    fn default_harness() -> Harness {
        harness_with(
            crate::pipeline::default_device_table(),
            RebuildFailurePolicy::default(),
        )
    }

    fn drain_events(rx: &mut broadcast::Receiver<ViewcamEvent>) -> Vec<ViewcamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count_by_type(events: &[ViewcamEvent], event_type: &str) -> usize {
        events.iter().filter(|e| e.event_type() == event_type).count()
    }

    async fn bind_back_camera(harness: &mut Harness) {
        harness.config.update(|c| {
            c.camera_id = Some("back".to_string());
            c.photo = Some(true);
        });
        harness.configurator.ensure_running().await;
        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 1);
    }

    #[tokio::test]
    async fn test_session_prop_change_rebuilds_exactly_once() {
        let mut harness = default_harness();
        bind_back_camera(&mut harness).await;
        assert_eq!(harness.pipeline.bind_count(), 1);

        harness.config.update(|c| c.camera_id = Some("front".to_string()));
        harness
            .configurator
            .apply_changes(ChangeSet::of([PropName::CameraId]))
            .await;

        assert_eq!(harness.pipeline.bind_count(), 2);
        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 1);
        assert_eq!(count_by_type(&events, "error"), 0);

        let plan = harness.configurator.current_plan().await.unwrap();
        assert_eq!(plan.device.id, "front");
    }

    #[tokio::test]
    async fn test_runtime_only_changes_never_rebind() {
        let mut harness = default_harness();
        bind_back_camera(&mut harness).await;
        assert_eq!(harness.pipeline.bind_count(), 1);

        harness.config.update(|c| {
            c.zoom = 3.0;
            c.torch = TorchMode::On;
        });
        harness
            .configurator
            .apply_changes(ChangeSet::of([PropName::Zoom, PropName::Torch]))
            .await;

        // Same bound device, no rebuild, no new lifecycle events.
        assert_eq!(harness.pipeline.bind_count(), 1);
        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 0);
        assert_eq!(count_by_type(&events, "error"), 0);
    }

    #[tokio::test]
    async fn test_unknown_device_emits_single_error() {
        let mut harness = default_harness();
        harness.config.update(|c| c.camera_id = Some("ghost".to_string()));
        harness.configurator.ensure_running().await;

        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 0);
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ViewcamEvent::Error { code, .. } => Some(code.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec!["device/not-found".to_string()]);
        assert!(harness.configurator.bound_camera().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_camera_id_is_no_device() {
        let mut harness = default_harness();
        harness.configurator.ensure_running().await;

        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "error"), 1);
        assert!(matches!(
            &events[0],
            ViewcamEvent::Error { code, .. } if code == "device/no-device"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_fps_is_specific_error() {
        let mut harness = default_harness();
        harness.config.update(|c| {
            c.camera_id = Some("front".to_string());
            c.fps = Some(120);
        });
        harness.configurator.ensure_running().await;

        let events = drain_events(&mut harness.events);
        assert!(matches!(
            &events[0],
            ViewcamEvent::Error { code, .. } if code == "format/invalid-fps"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_hdr_is_specific_error() {
        let mut harness = default_harness();
        harness.config.update(|c| {
            c.camera_id = Some("front".to_string());
            c.hdr = Some(true);
        });
        harness.configurator.ensure_running().await;

        let events = drain_events(&mut harness.events);
        assert!(matches!(
            &events[0],
            ViewcamEvent::Error { code, .. } if code == "format/invalid-hdr"
        ));
    }

    #[tokio::test]
    async fn test_parallel_use_not_supported_is_specific() {
        let mut harness = harness_with(
            vec![constrained_device("limited", 2)],
            RebuildFailurePolicy::default(),
        );
        harness.config.update(|c| {
            c.camera_id = Some("limited".to_string());
            c.photo = Some(true);
            c.video = Some(true);
            c.enable_frame_processor = true;
        });
        harness.configurator.ensure_running().await;

        // Even with photo demoted, preview + video + analysis exceed the
        // two concurrent use-cases; the error must name the condition.
        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 0);
        assert!(matches!(
            &events[0],
            ViewcamEvent::Error { code, .. } if code == "session/parallel-use-not-supported"
        ));
    }

    #[tokio::test]
    async fn test_snapshot_fallback_demotes_photo_use_case() {
        let mut harness = harness_with(
            vec![constrained_device("mid", 3)],
            RebuildFailurePolicy::default(),
        );
        harness.config.update(|c| {
            c.camera_id = Some("mid".to_string());
            c.photo = Some(true);
            c.video = Some(true);
            c.enable_frame_processor = true;
        });
        harness.configurator.ensure_running().await;

        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 1);
        assert!(harness.configurator.fallback_to_snapshot().await);
        let plan = harness.configurator.current_plan().await.unwrap();
        assert!(!plan.use_cases.contains(&UseCase::Photo));
        assert!(plan.use_cases.contains(&UseCase::Video));
        assert!(plan.use_cases.contains(&UseCase::FrameAnalysis));
    }

    #[tokio::test]
    async fn test_snapshot_fallback_reevaluated_per_rebuild() {
        let mut harness = harness_with(
            vec![constrained_device("mid", 3)],
            RebuildFailurePolicy::default(),
        );
        harness.config.update(|c| {
            c.camera_id = Some("mid".to_string());
            c.photo = Some(true);
            c.video = Some(true);
            c.enable_frame_processor = true;
        });
        harness.configurator.ensure_running().await;
        assert!(harness.configurator.fallback_to_snapshot().await);

        // Disabling video frees a slot: the next rebuild must bind photo
        // again instead of keeping the stale fallback.
        harness.config.update(|c| c.video = Some(false));
        harness
            .configurator
            .apply_changes(ChangeSet::of([PropName::Video]))
            .await;

        assert!(!harness.configurator.fallback_to_snapshot().await);
        let plan = harness.configurator.current_plan().await.unwrap();
        assert!(plan.use_cases.contains(&UseCase::Photo));
    }

    #[tokio::test]
    async fn test_transient_failure_retries_once_then_succeeds() {
        let mut harness = default_harness();
        harness.config.update(|c| c.camera_id = Some("back".to_string()));
        harness
            .pipeline
            .inject_bind_error(SessionError::CameraNotReady.into());

        harness.configurator.ensure_running().await;

        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 1);
        assert_eq!(count_by_type(&events, "error"), 0);
        assert!(harness.configurator.bound_camera().await.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_twice_surfaces_error() {
        let mut harness = default_harness();
        harness.config.update(|c| c.camera_id = Some("back".to_string()));
        harness
            .pipeline
            .inject_bind_error(SessionError::CameraNotReady.into());
        harness
            .pipeline
            .inject_bind_error(SessionError::CameraNotReady.into());

        harness.configurator.ensure_running().await;

        // The single retry budget is spent; no retry loop, one error.
        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 0);
        assert_eq!(count_by_type(&events, "error"), 1);
    }

    #[tokio::test]
    async fn test_restore_previous_keeps_session_usable() {
        let mut harness = default_harness();
        bind_back_camera(&mut harness).await;

        harness
            .pipeline
            .inject_bind_error(DeviceError::Invalid {
                camera_id: "back".to_string(),
            }
            .into());
        harness
            .configurator
            .apply_changes(ChangeSet::of([PropName::Fps]))
            .await;

        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "error"), 1);
        assert_eq!(count_by_type(&events, "initialized"), 0);
        // The previous configuration was re-bound and stays usable.
        assert!(harness.configurator.bound_camera().await.is_some());
    }

    #[tokio::test]
    async fn test_leave_unbound_policy() {
        let mut harness = harness_with(
            crate::pipeline::default_device_table(),
            RebuildFailurePolicy::LeaveUnbound,
        );
        bind_back_camera(&mut harness).await;

        harness
            .pipeline
            .inject_bind_error(DeviceError::Invalid {
                camera_id: "back".to_string(),
            }
            .into());
        harness
            .configurator
            .apply_changes(ChangeSet::of([PropName::Fps]))
            .await;

        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "error"), 1);
        assert!(harness.configurator.bound_camera().await.is_none());
    }

    #[tokio::test]
    async fn test_pause_releases_device_and_resume_rebinds_cheaply() {
        let mut harness = default_harness();
        bind_back_camera(&mut harness).await;
        assert_eq!(harness.pipeline.bind_count(), 1);

        harness.configurator.pause().await;
        assert!(harness.configurator.bound_camera().await.is_none());
        // Plan retained for cheap resume.
        assert!(harness.configurator.current_plan().await.is_some());

        harness.configurator.ensure_running().await;
        assert!(harness.configurator.bound_camera().await.is_some());
        assert_eq!(harness.pipeline.bind_count(), 2);
        // A resume is not a reconfiguration; no second initialized event.
        let events = drain_events(&mut harness.events);
        assert_eq!(count_by_type(&events, "initialized"), 0);
    }

    #[tokio::test]
    async fn test_destroy_is_terminal() {
        let mut harness = default_harness();
        bind_back_camera(&mut harness).await;

        harness.configurator.destroy().await;
        assert!(harness.configurator.bound_camera().await.is_none());
        assert!(harness.configurator.current_plan().await.is_none());

        // Late property changes are ignored entirely.
        harness
            .configurator
            .apply_changes(ChangeSet::of([PropName::CameraId]))
            .await;
        let events = drain_events(&mut harness.events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_snapshot_fallback_rules() {
        // Photo alone never falls back.
        assert!(!evaluate_snapshot_fallback(1, true, false, false));
        // Legacy single-use-case device with any extra consumer.
        assert!(evaluate_snapshot_fallback(2, true, true, false));
        assert!(evaluate_snapshot_fallback(2, true, false, true));
        // Both video and frame processing on a 3-slot device.
        assert!(evaluate_snapshot_fallback(3, true, true, true));
        // Plenty of capacity: no fallback.
        assert!(!evaluate_snapshot_fallback(4, true, true, true));
        // No photo requested: nothing to demote.
        assert!(!evaluate_snapshot_fallback(1, false, true, true));
    }
}
