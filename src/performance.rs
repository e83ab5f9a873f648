use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Maximum number of historical execution-time samples kept.
pub const MAX_SAMPLE_SIZE: usize = 20;

/// Samples excluded from the reported average as cold-start warm-up.
pub const WARMUP_SAMPLES: usize = 5;

/// Fraction trimmed from each end of the sorted samples as outliers.
const OUTLIER_TRIM_FRACTION: f64 = 0.1;

/// Safety margin applied to the theoretical maximum frame rate.
const SAFETY_MARGIN: f64 = 0.8;

#[derive(Debug)]
struct CollectorState {
    /// Sample ring, overwritten at `counter % MAX_SAMPLE_SIZE` once full
    samples: Vec<f64>,
    counter: usize,
    total_samples: u64,
    total_time_seconds: f64,
    min_execution_time: f64,
    max_execution_time: f64,
}

impl CollectorState {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(MAX_SAMPLE_SIZE),
            counter: 0,
            total_samples: 0,
            total_time_seconds: 0.0,
            min_execution_time: f64::MAX,
            max_execution_time: 0.0,
        }
    }
}

/// Snapshot of collector statistics for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceStatsSnapshot {
    pub total_samples: u64,
    pub total_time_seconds: f64,
    pub average_execution_time: f64,
    pub min_execution_time: f64,
    pub max_execution_time: f64,
    pub sample_count: usize,
}

/// Bounded, thread-safe collection of frame-processor execution times.
///
/// Mutations arrive from the frame-delivery context while evaluations read
/// from the control context; a single short-lived mutex covers both.
pub struct PerformanceDataCollector {
    state: Mutex<CollectorState>,
}

impl PerformanceDataCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState::new()),
        }
    }

    /// Begin measuring one frame-processor execution. Calling
    /// [`PerformanceSample::end`] on the returned handle records the
    /// sample; dropping it without `end` records nothing.
    pub fn begin_sample(self: &Arc<Self>) -> PerformanceSample {
        PerformanceSample {
            collector: Arc::clone(self),
            begin: Instant::now(),
        }
    }

    pub(crate) fn record(&self, seconds: f64) {
        let mut state = self.state.lock();
        let index = state.counter % MAX_SAMPLE_SIZE;

        if state.samples.len() > index {
            state.samples[index] = seconds;
        } else {
            state.samples.push(seconds);
        }

        state.total_samples += 1;
        state.total_time_seconds += seconds;
        state.min_execution_time = state.min_execution_time.min(seconds);
        state.max_execution_time = state.max_execution_time.max(seconds);
        state.counter += 1;

        trace!("Recorded performance sample: {:.4}s", seconds);
    }

    /// True once enough samples exist for the average to be meaningful.
    pub fn has_enough_data(&self) -> bool {
        self.state.lock().samples.len() >= WARMUP_SAMPLES
    }

    /// Trimmed mean of the recorded execution times in seconds.
    ///
    /// The first [`WARMUP_SAMPLES`] are discarded as cold-start cost, then
    /// the top and bottom 10% of the remainder are dropped as outliers.
    /// Returns 0.0 when no valid samples remain.
    pub fn average_execution_time(&self) -> f64 {
        let state = self.state.lock();

        if state.samples.len() <= WARMUP_SAMPLES {
            return 0.0;
        }
        let valid = &state.samples[WARMUP_SAMPLES..];

        let mut sorted = valid.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let trim_count = (sorted.len() as f64 * OUTLIER_TRIM_FRACTION) as usize;
        let trimmed: &[f64] = if trim_count > 0 && sorted.len() > trim_count * 2 {
            &sorted[trim_count..sorted.len() - trim_count]
        } else {
            &sorted
        };

        if trimmed.is_empty() {
            return 0.0;
        }
        trimmed.iter().sum::<f64>() / trimmed.len() as f64
    }

    /// Sustainable frame-processor rate derived from the measured average,
    /// with a 20% safety margin, clamped into `[1, max_fps]`.
    pub fn suggested_frame_rate(&self, max_fps: f64) -> f64 {
        if !self.has_enough_data() {
            return max_fps;
        }

        let average = self.average_execution_time();
        if average <= 0.0 {
            return max_fps;
        }

        let theoretical_max_fps = 1.0 / average;
        let safe_max_fps = theoretical_max_fps * SAFETY_MARGIN;
        safe_max_fps.clamp(1.0, max_fps)
    }

    /// Reset all samples and counters. Used whenever the target fps
    /// configuration changes.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = CollectorState::new();
    }

    /// Get current statistics as a snapshot
    pub fn stats(&self) -> PerformanceStatsSnapshot {
        let (total_samples, total_time_seconds, min, max, sample_count) = {
            let state = self.state.lock();
            (
                state.total_samples,
                state.total_time_seconds,
                state.min_execution_time,
                state.max_execution_time,
                state.samples.len(),
            )
        };
        PerformanceStatsSnapshot {
            total_samples,
            total_time_seconds,
            average_execution_time: self.average_execution_time(),
            min_execution_time: if total_samples == 0 { 0.0 } else { min },
            max_execution_time: max,
            sample_count,
        }
    }
}

impl Default for PerformanceDataCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion handle for one in-flight measurement.
pub struct PerformanceSample {
    collector: Arc<PerformanceDataCollector>,
    begin: Instant,
}

impl PerformanceSample {
    /// Record the elapsed time since `begin_sample` as one sample.
    pub fn end(self) {
        let seconds = self.begin.elapsed().as_secs_f64();
        self.collector.record(seconds);
    }
}
