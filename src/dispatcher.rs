use crate::config::FRAME_PROCESSOR_FPS_AUTO;
use crate::events::{EventBus, SuggestionKind, ViewcamEvent};
use crate::frame::Frame;
use crate::performance::PerformanceDataCollector;
use crate::pipeline::FrameSink;
use crate::recorder::RecordingSession;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Caller-supplied per-frame analysis callback.
///
/// Invoked with a bounded, throttled subset of captured frames on a worker
/// context. Errors are logged and swallowed; they never reach the capture
/// path.
pub trait FrameProcessor: Send + Sync {
    fn process(&self, frame: &Frame) -> anyhow::Result<()>;
}

impl<F> FrameProcessor for F
where
    F: Fn(&Frame) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, frame: &Frame) -> anyhow::Result<()> {
        self(frame)
    }
}

/// Tunable constants of the frame-processor throttle and evaluation policy.
///
/// The thresholds are inherited ad hoc values, kept configurable rather
/// than assumed optimal.
#[derive(Debug, Clone)]
pub struct FrameProcessorSettings {
    /// Minimum change before the auto policy adjusts the effective rate
    pub auto_adjust_min_delta_fps: f64,
    /// Minimum difference before a suggestion event is emitted
    pub suggestion_min_delta_fps: f64,
    /// Minimum time between two performance evaluations
    pub evaluation_cooldown: Duration,
    /// Soft bound on how long the delivery path waits for one invocation
    pub processor_soft_timeout: Duration,
    /// Upper bound for auto-negotiated rates
    pub default_max_fps: f64,
}

impl Default for FrameProcessorSettings {
    fn default() -> Self {
        Self {
            auto_adjust_min_delta_fps: 0.5,
            suggestion_min_delta_fps: 2.0,
            evaluation_cooldown: Duration::from_secs(1),
            processor_soft_timeout: Duration::from_millis(100),
            default_max_fps: 30.0,
        }
    }
}

/// Sentinel for "no frame forwarded yet".
const NO_FORWARDED_PTS: u64 = u64::MAX;

#[derive(Debug, Default)]
struct DispatcherStats {
    frames_received: AtomicU64,
    frames_recorded: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_dropped_throttled: AtomicU64,
    frames_dropped_busy: AtomicU64,
}

/// Snapshot of dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    pub frames_received: u64,
    pub frames_recorded: u64,
    pub frames_forwarded: u64,
    pub frames_dropped_throttled: u64,
    pub frames_dropped_busy: u64,
}

/// Multiplexes the single captured frame stream between the active
/// recording, and the throttled, back-pressured frame-processor callback.
///
/// `on_frame` runs on whatever context the capture pipeline delivers frames
/// on and never blocks it: recording appends are synchronous and cheap,
/// processing happens on a worker context behind a reentrancy guard, and
/// every frame handle is closed exactly once on every path.
///
/// Must be constructed inside a tokio runtime; the handle is captured so
/// frames may be delivered from non-runtime threads.
pub struct FrameDispatcher {
    runtime: Handle,
    collector: Arc<PerformanceDataCollector>,
    events: EventBus,
    settings: FrameProcessorSettings,

    processor: RwLock<Option<Arc<dyn FrameProcessor>>>,
    recording: RwLock<Option<Arc<RecordingSession>>>,

    active: AtomicBool,
    /// Reentrancy guard: true while a processor invocation is in flight
    busy: Arc<AtomicBool>,
    /// pts (nanos) of the last frame forwarded to the processor
    last_forwarded_pts: AtomicU64,

    /// Bits of the requested fps (AUTO sentinel included)
    requested_fps_bits: AtomicU64,
    /// Bits of the rate the throttle actually uses
    effective_fps_bits: AtomicU64,
    last_evaluation: Mutex<Instant>,
    last_suggested_fps: Mutex<f64>,

    stats: DispatcherStats,
    cancel: CancellationToken,
}

impl FrameDispatcher {
    pub fn new(
        collector: Arc<PerformanceDataCollector>,
        events: EventBus,
        settings: FrameProcessorSettings,
    ) -> Self {
        let default_max_fps = settings.default_max_fps;
        Self {
            runtime: Handle::current(),
            collector,
            events,
            settings,
            processor: RwLock::new(None),
            recording: RwLock::new(None),
            active: AtomicBool::new(true),
            busy: Arc::new(AtomicBool::new(false)),
            last_forwarded_pts: AtomicU64::new(NO_FORWARDED_PTS),
            requested_fps_bits: AtomicU64::new(FRAME_PROCESSOR_FPS_AUTO.to_bits()),
            effective_fps_bits: AtomicU64::new(default_max_fps.to_bits()),
            last_evaluation: Mutex::new(Instant::now()),
            last_suggested_fps: Mutex::new(0.0),
            stats: DispatcherStats::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Install or replace the frame-processor callback.
    pub fn set_processor(&self, processor: Option<Arc<dyn FrameProcessor>>) {
        *self.processor.write() = processor;
    }

    /// Attach the active recording; every subsequent frame is offered to it.
    pub fn set_recording(&self, recording: Option<Arc<RecordingSession>>) {
        *self.recording.write() = recording;
    }

    pub fn recording(&self) -> Option<Arc<RecordingSession>> {
        self.recording.read().clone()
    }

    /// Gate frame handling on the effective lifecycle state.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Change the requested frame-processor rate.
    ///
    /// Resets the performance collector and the evaluation state so stale
    /// samples from the previous rate cannot skew the new estimate.
    pub fn set_target_fps(&self, fps: f64) {
        let effective = if fps == FRAME_PROCESSOR_FPS_AUTO {
            self.settings.default_max_fps
        } else {
            fps
        };
        self.requested_fps_bits.store(fps.to_bits(), Ordering::Release);
        self.effective_fps_bits
            .store(effective.to_bits(), Ordering::Release);
        *self.last_evaluation.lock() = Instant::now();
        *self.last_suggested_fps.lock() = 0.0;
        self.collector.clear();
        debug!("Frame processor target fps set to {:.1}", fps);
    }

    pub fn requested_fps(&self) -> f64 {
        f64::from_bits(self.requested_fps_bits.load(Ordering::Acquire))
    }

    /// The rate the throttle currently uses; equals the requested rate
    /// unless auto, in which case it is continuously re-estimated.
    pub fn effective_fps(&self) -> f64 {
        f64::from_bits(self.effective_fps_bits.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            frames_received: self.stats.frames_received.load(Ordering::Relaxed),
            frames_recorded: self.stats.frames_recorded.load(Ordering::Relaxed),
            frames_forwarded: self.stats.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped_throttled: self
                .stats
                .frames_dropped_throttled
                .load(Ordering::Relaxed),
            frames_dropped_busy: self.stats.frames_dropped_busy.load(Ordering::Relaxed),
        }
    }

    /// Stop dispatching permanently. In-flight processor completions become
    /// no-ops for the dispatch state.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn handle_frame(&self, frame: Arc<Frame>) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        if self.cancel.is_cancelled() || !self.active.load(Ordering::Acquire) {
            frame.close();
            return;
        }

        // Recording comes first, synchronously, and is never throttled.
        if let Some(recording) = self.recording.read().clone() {
            recording.append_frame(&frame);
            self.stats.frames_recorded.fetch_add(1, Ordering::Relaxed);
        }

        let processor = match self.processor.read().clone() {
            Some(processor) => processor,
            None => {
                frame.close();
                return;
            }
        };

        let effective_fps = self.effective_fps();
        if effective_fps <= 0.0 {
            frame.close();
            return;
        }

        // Throttle on the presentation-timestamp clock.
        let pts_nanos = frame.pts.as_nanos() as u64;
        let min_interval_nanos = (1_000_000_000.0 / effective_fps) as u64;
        let last_forwarded = self.last_forwarded_pts.load(Ordering::Acquire);
        if last_forwarded != NO_FORWARDED_PTS
            && pts_nanos.saturating_sub(last_forwarded) < min_interval_nanos
        {
            self.stats
                .frames_dropped_throttled
                .fetch_add(1, Ordering::Relaxed);
            trace!("Frame {} dropped by throttle", frame.sequence);
            frame.close();
            self.maybe_evaluate();
            return;
        }

        // Reentrancy guard: drop, never queue, never block the capture
        // context.
        if self.busy.swap(true, Ordering::AcqRel) {
            warn!(
                "Frame {} dropped because the frame processor is still running",
                frame.sequence
            );
            self.stats.frames_dropped_busy.fetch_add(1, Ordering::Relaxed);
            frame.close();
            self.maybe_evaluate();
            return;
        }

        self.last_forwarded_pts.store(pts_nanos, Ordering::Release);
        self.stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);

        let sample = self.collector.begin_sample();
        let busy = Arc::clone(&self.busy);
        let soft_timeout = self.settings.processor_soft_timeout;
        let processing_frame = Arc::clone(&frame);

        self.runtime.spawn(async move {
            let worker =
                tokio::task::spawn_blocking(move || processor.process(&processing_frame));

            match tokio::time::timeout(soft_timeout, worker).await {
                Ok(Ok(Ok(()))) => {
                    trace!("Frame {} processed", frame.sequence);
                }
                Ok(Ok(Err(e))) => {
                    error!("Frame processor error: {:#}", e);
                }
                Ok(Err(join_error)) => {
                    error!("Frame processor panicked: {}", join_error);
                }
                Err(_) => {
                    // Best-effort cancellation only: the callback keeps
                    // running detached, but the dispatch state clears now.
                    error!(
                        "Frame processor exceeded the {:?} soft timeout",
                        soft_timeout
                    );
                }
            }

            sample.end();
            frame.close();
            busy.store(false, Ordering::Release);
        });

        self.maybe_evaluate();
    }

    /// Re-evaluate the sustainable frame-processor rate, at most once per
    /// cooldown interval.
    fn maybe_evaluate(&self) {
        {
            let mut last_evaluation = self.last_evaluation.lock();
            if last_evaluation.elapsed() < self.settings.evaluation_cooldown {
                return;
            }
            *last_evaluation = Instant::now();
        }

        if !self.collector.has_enough_data() {
            return;
        }

        let max_fps = self.settings.default_max_fps;
        let suggested = self.collector.suggested_frame_rate(max_fps);
        let requested = self.requested_fps();

        if requested == FRAME_PROCESSOR_FPS_AUTO {
            // Silently converge the effective rate; the caller asked us to
            // pick one.
            let new_fps = suggested.clamp(1.0, max_fps);
            let current = self.effective_fps();
            if (current - new_fps).abs() > self.settings.auto_adjust_min_delta_fps {
                self.effective_fps_bits
                    .store(new_fps.to_bits(), Ordering::Release);
                debug!("Auto-adjusted frame processor fps to {:.1}", new_fps);
            }
        } else {
            // The caller pinned a rate; surface a one-shot suggestion when
            // it is significantly off.
            let difference = (suggested - requested).abs();
            let mut last_suggested = self.last_suggested_fps.lock();
            if difference > self.settings.suggestion_min_delta_fps && suggested != *last_suggested
            {
                let kind = if suggested > requested {
                    SuggestionKind::CanUseHigherFps
                } else {
                    SuggestionKind::ShouldUseLowerFps
                };
                self.events.publish(ViewcamEvent::PerformanceSuggestion {
                    kind,
                    current_fps: requested,
                    suggested_fps: suggested,
                });
                *last_suggested = suggested;
            }
        }
    }
}

impl FrameSink for FrameDispatcher {
    fn on_frame(&self, frame: Arc<Frame>) {
        self.handle_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameFormat, Orientation};
    use crate::recorder::{RecordingSession, SampleWriter};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;

    fn test_settings() -> FrameProcessorSettings {
        FrameProcessorSettings {
            processor_soft_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn dispatcher_with(settings: FrameProcessorSettings) -> (Arc<FrameDispatcher>, EventBus) {
        let events = EventBus::new(32);
        let dispatcher = Arc::new(FrameDispatcher::new(
            Arc::new(PerformanceDataCollector::new()),
            events.clone(),
            settings,
        ));
        (dispatcher, events)
    }

    fn frame_at_ms(sequence: u64, pts_ms: u64) -> Arc<Frame> {
        Arc::new(Frame::new(
            sequence,
            Duration::from_millis(pts_ms),
            vec![0u8; 64],
            8,
            8,
            FrameFormat::Rgba8,
            Orientation::Portrait,
        ))
    }

    struct CountingProcessor {
        calls: AtomicU64,
    }

    impl FrameProcessor for CountingProcessor {
        fn process(&self, _frame: &Frame) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullWriter;

    impl SampleWriter for NullWriter {
        fn append(&mut self, _data: &[u8], _pts: Duration) -> std::io::Result<()> {
            Ok(())
        }
        fn finish(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn null_recording() -> Arc<RecordingSession> {
        Arc::new(RecordingSession::new(
            PathBuf::from("/tmp/dispatcher-test.mov"),
            Box::new(NullWriter),
            Box::new(|_| {}),
        ))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_frame_without_processor_or_recording_is_closed() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        let frame = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&frame));
        assert_eq!(frame.close_count(), 1);
        assert_eq!(dispatcher.stats().frames_received, 1);
    }

    #[tokio::test]
    async fn test_throttle_forwards_expected_count() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_target_fps(10.0);

        let processor = Arc::new(CountingProcessor {
            calls: AtomicU64::new(0),
        });
        dispatcher.set_processor(Some(processor.clone()));

        // 60 frames at ~60 fps pts spacing: one second of stream time at an
        // effective 10 fps should forward 10 +/- 1 frames.
        let mut frames = Vec::new();
        for i in 0..60u64 {
            let frame = frame_at_ms(i, i * 1000 / 60);
            frames.push(Arc::clone(&frame));
            dispatcher.on_frame(frame);
            // Leave the trivial processor room to finish so the reentrancy
            // guard does not interfere with the throttle measurement.
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        let stats = dispatcher.stats();
        assert!(
            (9..=11).contains(&stats.frames_forwarded),
            "forwarded {} frames",
            stats.frames_forwarded
        );
        assert_eq!(
            stats.frames_forwarded + stats.frames_dropped_throttled + stats.frames_dropped_busy,
            60
        );

        wait_until(|| frames.iter().all(|f| f.close_count() == 1)).await;
    }

    #[tokio::test]
    async fn test_recording_receives_every_frame_despite_throttle() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_target_fps(1.0);
        dispatcher.set_processor(Some(Arc::new(CountingProcessor {
            calls: AtomicU64::new(0),
        })));
        let recording = null_recording();
        dispatcher.set_recording(Some(Arc::clone(&recording)));

        for i in 0..30u64 {
            dispatcher.on_frame(frame_at_ms(i, i * 16));
        }

        assert_eq!(recording.frames_written(), 30);
        let stats = dispatcher.stats();
        assert_eq!(stats.frames_recorded, 30);
        assert!(stats.frames_forwarded <= 2);
    }

    #[tokio::test]
    async fn test_reentrant_frame_is_dropped_not_queued() {
        let (dispatcher, _) = dispatcher_with(FrameProcessorSettings {
            processor_soft_timeout: Duration::from_secs(2),
            ..Default::default()
        });
        dispatcher.set_target_fps(30.0);
        dispatcher.set_processor(Some(Arc::new(|_: &Frame| -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })));
        let recording = null_recording();
        dispatcher.set_recording(Some(Arc::clone(&recording)));

        let first = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&first));
        wait_until(|| dispatcher.stats().frames_forwarded == 1).await;

        // Well past the throttle interval, but the processor is still busy.
        let second = frame_at_ms(2, 500);
        dispatcher.on_frame(Arc::clone(&second));

        let stats = dispatcher.stats();
        assert_eq!(stats.frames_dropped_busy, 1);
        assert_eq!(stats.frames_forwarded, 1);
        // The busy-dropped frame was closed immediately and still recorded.
        assert_eq!(second.close_count(), 1);
        assert_eq!(recording.frames_written(), 2);

        wait_until(|| first.close_count() == 1).await;
    }

    #[tokio::test]
    async fn test_frame_closed_once_on_processor_error() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_target_fps(30.0);
        dispatcher.set_processor(Some(Arc::new(|_: &Frame| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("analysis failed"))
        })));

        let frame = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&frame));

        wait_until(|| frame.close_count() == 1).await;
        // Guard must clear so the next frame can be forwarded.
        wait_until(|| !dispatcher.busy.load(Ordering::Acquire)).await;
    }

    #[tokio::test]
    async fn test_frame_closed_once_on_processor_panic() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_target_fps(30.0);
        dispatcher.set_processor(Some(Arc::new(|_: &Frame| -> anyhow::Result<()> {
            panic!("processor blew up");
        })));

        let frame = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&frame));

        wait_until(|| frame.close_count() == 1).await;
        wait_until(|| !dispatcher.busy.load(Ordering::Acquire)).await;
    }

    #[tokio::test]
    async fn test_frame_closed_once_on_soft_timeout() {
        let (dispatcher, _) = dispatcher_with(FrameProcessorSettings {
            processor_soft_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        dispatcher.set_target_fps(30.0);
        dispatcher.set_processor(Some(Arc::new(|_: &Frame| -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })));

        let frame = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&frame));

        // The handle closes and the guard clears at the soft timeout, well
        // before the callback finishes.
        wait_until(|| frame.close_count() == 1).await;
        wait_until(|| !dispatcher.busy.load(Ordering::Acquire)).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.frames_forwarded, 1);
    }

    #[tokio::test]
    async fn test_inactive_dispatcher_closes_frames() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_processor(Some(Arc::new(CountingProcessor {
            calls: AtomicU64::new(0),
        })));
        dispatcher.set_active(false);

        let frame = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&frame));

        assert_eq!(frame.close_count(), 1);
        assert_eq!(dispatcher.stats().frames_forwarded, 0);
    }

    #[tokio::test]
    async fn test_shutdown_makes_dispatch_a_noop() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_processor(Some(Arc::new(CountingProcessor {
            calls: AtomicU64::new(0),
        })));
        dispatcher.shutdown();

        let frame = frame_at_ms(1, 0);
        dispatcher.on_frame(Arc::clone(&frame));
        assert_eq!(frame.close_count(), 1);
        assert_eq!(dispatcher.stats().frames_forwarded, 0);
    }

    #[tokio::test]
    async fn test_auto_mode_converges_effective_fps() {
        let (dispatcher, _) = dispatcher_with(FrameProcessorSettings {
            evaluation_cooldown: Duration::from_millis(0),
            ..test_settings()
        });
        assert_eq!(dispatcher.requested_fps(), FRAME_PROCESSOR_FPS_AUTO);
        assert_eq!(dispatcher.effective_fps(), 30.0);

        // Feed 50ms samples directly: suggested = 0.8/0.05 = 16 fps.
        for _ in 0..15 {
            dispatcher.collector.record(0.05);
        }
        dispatcher.set_processor(Some(Arc::new(CountingProcessor {
            calls: AtomicU64::new(0),
        })));
        dispatcher.on_frame(frame_at_ms(1, 0));

        wait_until(|| (dispatcher.effective_fps() - 16.0).abs() < 1e-9).await;
    }

    #[tokio::test]
    async fn test_pinned_fps_emits_one_shot_suggestion() {
        let (dispatcher, events) = dispatcher_with(FrameProcessorSettings {
            evaluation_cooldown: Duration::from_millis(0),
            ..test_settings()
        });
        let mut rx = events.subscribe();
        dispatcher.set_target_fps(30.0);

        // Slow processor: suggested 16 fps, well below the pinned 30.
        for _ in 0..15 {
            dispatcher.collector.record(0.05);
        }
        dispatcher.set_processor(Some(Arc::new(CountingProcessor {
            calls: AtomicU64::new(0),
        })));

        dispatcher.on_frame(frame_at_ms(1, 0));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ViewcamEvent::PerformanceSuggestion {
                kind,
                current_fps,
                suggested_fps,
            } => {
                assert_eq!(kind, SuggestionKind::ShouldUseLowerFps);
                assert_eq!(current_fps, 30.0);
                assert!((suggested_fps - 16.0).abs() < 1e-9);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Same suggestion again: deduplicated, no second event. Follow-up
        // frames fall inside the throttle interval so no new samples shift
        // the estimate.
        dispatcher.on_frame(frame_at_ms(2, 10));
        dispatcher.on_frame(frame_at_ms(3, 20));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_set_target_fps_resets_collector() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        for _ in 0..10 {
            dispatcher.collector.record(0.05);
        }
        assert!(dispatcher.collector.has_enough_data());

        dispatcher.set_target_fps(15.0);
        assert!(!dispatcher.collector.has_enough_data());
        assert_eq!(dispatcher.effective_fps(), 15.0);
        assert_eq!(dispatcher.requested_fps(), 15.0);
    }

    #[tokio::test]
    async fn test_effective_follows_requested_when_pinned() {
        let (dispatcher, _) = dispatcher_with(test_settings());
        dispatcher.set_target_fps(5.0);
        assert_eq!(dispatcher.effective_fps(), 5.0);

        dispatcher.set_target_fps(FRAME_PROCESSOR_FPS_AUTO);
        assert_eq!(dispatcher.effective_fps(), 30.0);
    }
}
