use crate::device::{ColorSpace, FormatFilter};
use crate::frame::Orientation;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Sentinel for `frame_processor_fps` meaning "pick a sustainable rate
/// automatically from measured execution times".
pub const FRAME_PROCESSOR_FPS_AUTO: f64 = -1.0;

/// Torch (continuous light) mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorchMode {
    #[default]
    Off,
    On,
}

/// Every declarative property of the camera view that the bridging layer
/// can set. Used to classify change-sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropName {
    CameraId,
    Photo,
    Video,
    Audio,
    EnableFrameProcessor,
    Format,
    Fps,
    Hdr,
    ColorSpace,
    LowLightBoost,
    Zoom,
    Torch,
    Orientation,
    FrameProcessorFps,
}

impl PropName {
    /// Parse the wire name used by the bridging layer.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cameraId" => Some(PropName::CameraId),
            "photo" => Some(PropName::Photo),
            "video" => Some(PropName::Video),
            "audio" => Some(PropName::Audio),
            "enableFrameProcessor" => Some(PropName::EnableFrameProcessor),
            "format" => Some(PropName::Format),
            "fps" => Some(PropName::Fps),
            "hdr" => Some(PropName::Hdr),
            "colorSpace" => Some(PropName::ColorSpace),
            "lowLightBoost" => Some(PropName::LowLightBoost),
            "zoom" => Some(PropName::Zoom),
            "torch" => Some(PropName::Torch),
            "orientation" => Some(PropName::Orientation),
            "frameProcessorFps" => Some(PropName::FrameProcessorFps),
            _ => None,
        }
    }
}

/// Properties whose change requires tearing down and rebuilding the bound
/// capture session. Everything else applies to a live session in place.
pub const SESSION_PROPS: [PropName; 10] = [
    PropName::CameraId,
    PropName::Photo,
    PropName::Video,
    PropName::Audio,
    PropName::EnableFrameProcessor,
    PropName::Format,
    PropName::Fps,
    PropName::Hdr,
    PropName::ColorSpace,
    PropName::LowLightBoost,
];

/// A set of changed property names, classified before being applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    props: HashSet<PropName>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(props: impl IntoIterator<Item = PropName>) -> Self {
        Self {
            props: props.into_iter().collect(),
        }
    }

    /// All session properties; used to force a full rebuild, e.g. on host
    /// resume.
    pub fn all_session_props() -> Self {
        Self::of(SESSION_PROPS)
    }

    pub fn insert(&mut self, prop: PropName) {
        self.props.insert(prop);
    }

    pub fn contains(&self, prop: PropName) -> bool {
        self.props.contains(&prop)
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// True when this change-set intersects [`SESSION_PROPS`].
    pub fn requires_rebuild(&self) -> bool {
        SESSION_PROPS.iter().any(|p| self.props.contains(p))
    }

    /// True when every changed property applies to a live session.
    pub fn runtime_only(&self) -> bool {
        !self.is_empty() && !self.requires_rebuild()
    }
}

impl FromIterator<PropName> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = PropName>>(iter: T) -> Self {
        Self::of(iter)
    }
}

/// The declarative capture configuration, owned by the camera view and
/// written only from the control context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Opaque device identifier, or none when no device is selected yet
    pub camera_id: Option<String>,

    /// Enable the photo capture use-case
    pub photo: Option<bool>,

    /// Enable the video recording use-case
    pub video: Option<bool>,

    /// Record audio alongside video
    pub audio: Option<bool>,

    /// Enable the frame-analysis use-case feeding the frame processor
    pub enable_frame_processor: bool,

    /// Resolution targets for format selection
    pub format: Option<FormatFilter>,

    /// Target capture frame rate
    pub fps: Option<u32>,

    /// Request HDR output
    pub hdr: Option<bool>,

    /// Request a specific output color space
    pub color_space: Option<ColorSpace>,

    /// Request low-light boost on devices that support it
    pub low_light_boost: Option<bool>,

    /// Zoom factor, clamped to the device range when applied
    pub zoom: f32,

    /// Torch mode
    pub torch: TorchMode,

    /// Output orientation override; none follows the display rotation
    pub orientation: Option<Orientation>,

    /// Target frame-processor rate, or [`FRAME_PROCESSOR_FPS_AUTO`]
    pub frame_processor_fps: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_id: None,
            photo: None,
            video: None,
            audio: None,
            enable_frame_processor: false,
            format: None,
            fps: None,
            hdr: None,
            color_space: None,
            low_light_boost: None,
            zoom: 1.0,
            torch: TorchMode::Off,
            orientation: None,
            frame_processor_fps: FRAME_PROCESSOR_FPS_AUTO,
        }
    }
}

impl CaptureConfig {
    pub fn is_frame_processor_fps_auto(&self) -> bool {
        self.frame_processor_fps == FRAME_PROCESSOR_FPS_AUTO
    }

    /// The format filter actually used during a rebuild: resolution targets
    /// from `format`, merged with the session-level fps/HDR/color-space
    /// requests.
    pub fn effective_format_filter(&self) -> FormatFilter {
        let mut filter = self.format.clone().unwrap_or_default();
        if self.fps.is_some() {
            filter.fps = self.fps;
        }
        if self.hdr.is_some() {
            filter.hdr = self.hdr;
        }
        if self.color_space.is_some() {
            filter.color_space = self.color_space;
        }
        filter
    }
}

/// Shared handle around the configuration.
///
/// Writers mutate under the lock; a session rebuild takes a whole-struct
/// snapshot so it always observes a consistent configuration, never a
/// partially-updated one.
#[derive(Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<CaptureConfig>>,
}

impl SharedConfig {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Apply a mutation from the control context.
    pub fn update(&self, mutate: impl FnOnce(&mut CaptureConfig)) {
        let mut config = self.inner.write();
        mutate(&mut config);
    }

    /// Consistent point-in-time copy of the full configuration.
    pub fn snapshot(&self) -> CaptureConfig {
        self.inner.read().clone()
    }
}
