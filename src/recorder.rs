use crate::error::{CaptureError, Result, ViewcamError};
use crate::frame::Frame;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Container format of a recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFileType {
    #[default]
    Mov,
    Mp4,
}

impl VideoFileType {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoFileType::Mov => "mov",
            VideoFileType::Mp4 => "mp4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mov" => Some(VideoFileType::Mov),
            "mp4" => Some(VideoFileType::Mp4),
            _ => None,
        }
    }
}

/// Status of an active recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Recording,
    Paused,
    Finished,
    Errored,
}

impl RecordingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingStatus::Finished | RecordingStatus::Errored)
    }
}

/// Delivered to the `on_finished` callback when a recording completes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub path: PathBuf,
    pub duration_seconds: f64,
}

pub type RecordingCallback = Box<dyn FnOnce(Result<RecordingResult>) + Send>;

/// Sink receiving encoded samples from a recording session. The concrete
/// muxing/encoding collaborator lives behind this seam.
pub trait SampleWriter: Send {
    fn append(&mut self, data: &[u8], pts: Duration) -> std::io::Result<()>;
    fn finish(&mut self) -> std::io::Result<()>;
}

/// Plain file-backed writer appending raw sample payloads.
pub struct FileSampleWriter {
    writer: BufWriter<File>,
}

impl FileSampleWriter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl SampleWriter for FileSampleWriter {
    fn append(&mut self, data: &[u8], _pts: Duration) -> std::io::Result<()> {
        self.writer.write_all(data)
    }

    fn finish(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

struct SessionState {
    status: RecordingStatus,
    writer: Box<dyn SampleWriter>,
    first_pts: Option<Duration>,
    last_pts: Option<Duration>,
    frames_written: u64,
    frames_rejected: u64,
    on_finished: Option<RecordingCallback>,
}

/// One exclusive recording, alive from `start_recording` until its terminal
/// completion.
///
/// Frames are appended synchronously from the frame-delivery context in
/// non-decreasing presentation-timestamp order; an out-of-order timestamp
/// is rejected with a warning rather than corrupting the output. The
/// completion callback fires exactly once; any append or completion arriving
/// after a terminal state is a no-op.
pub struct RecordingSession {
    path: PathBuf,
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl RecordingSession {
    pub fn new(
        path: PathBuf,
        writer: Box<dyn SampleWriter>,
        on_finished: RecordingCallback,
    ) -> Self {
        info!("Recording session started: {}", path.display());
        Self {
            path,
            started_at: Utc::now(),
            state: Mutex::new(SessionState {
                status: RecordingStatus::Recording,
                writer,
                first_pts: None,
                last_pts: None,
                frames_written: 0,
                frames_rejected: 0,
                on_finished: Some(on_finished),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> RecordingStatus {
        self.state.lock().status
    }

    /// Recorded duration so far, derived from appended timestamps.
    pub fn duration(&self) -> Duration {
        let state = self.state.lock();
        match (state.first_pts, state.last_pts) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => Duration::ZERO,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.state.lock().frames_written
    }

    /// Append one frame. Called synchronously from the frame-delivery
    /// context before any frame-processing dispatch.
    pub fn append_frame(&self, frame: &Frame) {
        let mut state = self.state.lock();

        match state.status {
            RecordingStatus::Recording => {}
            RecordingStatus::Paused => {
                // Paused recordings skip frames without advancing duration.
                return;
            }
            RecordingStatus::Finished | RecordingStatus::Errored => {
                // Late frame after completion/teardown: defined no-op.
                return;
            }
        }

        if let Some(last) = state.last_pts {
            if frame.pts < last {
                warn!(
                    "Rejecting out-of-order frame {} (pts {:?} < last {:?})",
                    frame.sequence, frame.pts, last
                );
                state.frames_rejected += 1;
                return;
            }
        }

        if let Err(e) = state.writer.append(&frame.data, frame.pts) {
            state.status = RecordingStatus::Errored;
            let callback = state.on_finished.take();
            drop(state);

            warn!("Recording write failed: {}", e);
            if let Some(callback) = callback {
                callback(Err(ViewcamError::Capture(CaptureError::FileIo {
                    source: e,
                })));
            }
            return;
        }

        if state.first_pts.is_none() {
            state.first_pts = Some(frame.pts);
        }
        state.last_pts = Some(frame.pts);
        state.frames_written += 1;
    }

    /// Pause appending. Frames delivered while paused are skipped.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.status == RecordingStatus::Recording {
            debug!("Recording paused: {}", self.path.display());
            state.status = RecordingStatus::Paused;
        }
    }

    /// Resume appending after a pause.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.status == RecordingStatus::Paused {
            debug!("Recording resumed: {}", self.path.display());
            state.status = RecordingStatus::Recording;
        }
    }

    /// Finish the recording and invoke the completion callback with the
    /// final result. No-op if the session already reached a terminal state.
    pub fn finish(&self) {
        let (callback, result) = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }

            match state.writer.finish() {
                Ok(()) => {
                    state.status = RecordingStatus::Finished;
                    let duration = match (state.first_pts, state.last_pts) {
                        (Some(first), Some(last)) => last.saturating_sub(first),
                        _ => Duration::ZERO,
                    };
                    (
                        state.on_finished.take(),
                        Ok(RecordingResult {
                            path: self.path.clone(),
                            duration_seconds: duration.as_secs_f64(),
                        }),
                    )
                }
                Err(e) => {
                    state.status = RecordingStatus::Errored;
                    (
                        state.on_finished.take(),
                        Err(ViewcamError::Capture(CaptureError::FileIo { source: e })),
                    )
                }
            }
        };

        info!(
            "Recording session finished: {} ({} frames)",
            self.path.display(),
            self.frames_written()
        );

        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// Abort the recording with an error. No-op after a terminal state, so
    /// a completion racing teardown cannot fire the callback twice.
    pub fn abort(&self, error: ViewcamError) {
        let callback = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = RecordingStatus::Errored;
            state.on_finished.take()
        };

        warn!("Recording session aborted: {}", self.path.display());
        if let Some(callback) = callback {
            callback(Err(error));
        }
    }
}
