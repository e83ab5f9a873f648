use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Planar YUV 4:2:0 - 12 bits per pixel
    Yuv420,
    /// Semi-planar YUV 4:2:0 (NV12) - 12 bits per pixel
    Nv12,
    /// RGBA - 4 bytes per pixel
    Rgba8,
}

impl FrameFormat {
    /// Expected buffer size in bytes for a frame of the given dimensions.
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            FrameFormat::Yuv420 | FrameFormat::Nv12 => pixels * 3 / 2,
            FrameFormat::Rgba8 => pixels * 4,
        }
    }
}

/// Display orientation of the capture output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    LandscapeRight,
    PortraitUpsideDown,
    LandscapeLeft,
}

impl Orientation {
    /// Parse the wire string used by the bridging layer.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "portrait" => Some(Orientation::Portrait),
            "landscapeRight" => Some(Orientation::LandscapeRight),
            "portraitUpsideDown" => Some(Orientation::PortraitUpsideDown),
            "landscapeLeft" => Some(Orientation::LandscapeLeft),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u16 {
        match self {
            Orientation::Portrait => 0,
            Orientation::LandscapeRight => 90,
            Orientation::PortraitUpsideDown => 180,
            Orientation::LandscapeLeft => 270,
        }
    }
}

/// One captured frame, handed to [`crate::pipeline::FrameSink::on_frame`].
///
/// The handle must be closed exactly once on every dispatch path; the pixel
/// data itself is shared and stays readable for as long as anyone holds the
/// `Arc`, so a frame-processor callback that outlives its soft timeout can
/// still finish reading while the handle is already closed.
#[derive(Debug)]
pub struct Frame {
    /// Monotonically increasing frame number assigned by the pipeline
    pub sequence: u64,
    /// Presentation timestamp relative to session start
    pub pts: Duration,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Orientation of the buffer contents
    pub orientation: Orientation,
    close_count: AtomicU32,
}

impl Frame {
    pub fn new(
        sequence: u64,
        pts: Duration,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
        orientation: Orientation,
    ) -> Self {
        Self {
            sequence,
            pts,
            data: Arc::new(data),
            width,
            height,
            format,
            orientation,
            close_count: AtomicU32::new(0),
        }
    }

    /// Close the frame handle, returning it to the capture pipeline.
    ///
    /// Closing twice is a logged no-op, never a crash; the close counter
    /// still records the duplicate so tests can assert exactly-once
    /// behavior.
    pub fn close(&self) {
        let previous = self.close_count.fetch_add(1, Ordering::AcqRel);
        if previous > 0 {
            warn!(
                "Frame {} was closed {} times - handles must be closed exactly once",
                self.sequence,
                previous + 1
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close_count.load(Ordering::Acquire) > 0
    }

    /// Number of times `close()` was called. Diagnostic accessor used to
    /// verify the exactly-once guarantee.
    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::Acquire)
    }

    /// Validate frame data size against the format's expected size.
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.format.buffer_size(self.width, self.height)
    }
}
