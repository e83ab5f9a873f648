use thiserror::Error;

/// Top-level error type for the viewcam core.
///
/// Configuration and session errors are delivered through the event channel
/// (see [`crate::events::EventBus`]); command-style operations return them
/// directly. `code()` yields the stable `"domain/error-id"` string used on
/// the wire.
#[derive(Error, Debug)]
pub enum ViewcamError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// Wraps any unanticipated error, preserving its message and cause.
    #[error("Unknown error: {message}")]
    Unknown {
        message: String,
        cause: Option<anyhow::Error>,
    },
}

/// Errors related to resolving or controlling a camera device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No camera device is set")]
    NoDevice,

    #[error("Camera device \"{camera_id}\" was not found")]
    NotFound { camera_id: String },

    #[error("Camera device \"{camera_id}\" is invalid or no longer available")]
    Invalid { camera_id: String },

    #[error("The selected camera device does not support focusing")]
    FocusNotSupported,

    #[error("The selected camera device does not support low-light boost")]
    LowLightBoostNotSupported,

    #[error("Failed to configure the camera device: {details}")]
    ConfigureError { details: String },
}

/// Errors raised while (re)building the capture session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("The camera session is not ready yet")]
    CameraNotReady,

    #[error(
        "The camera device cannot run {requested} use-cases in parallel \
         (it supports at most {supported})"
    )]
    ParallelUseNotSupported { requested: usize, supported: usize },
}

/// Errors raised while validating or applying a format filter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("No camera format matches the requested filter")]
    InvalidFormat,

    #[error("The selected format does not support {fps} fps")]
    InvalidFps { fps: u32 },

    #[error("The selected format does not support HDR")]
    InvalidHdr,

    #[error("The selected format does not support the \"{color_space}\" color space")]
    InvalidColorSpace { color_space: String },
}

/// Errors raised by photo capture and video recording.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Photo capture is not enabled on this camera view")]
    PhotoNotEnabled,

    #[error("Video recording is not enabled on this camera view")]
    VideoNotEnabled,

    #[error("A recording is already in progress")]
    RecordingInProgress,

    #[error("No recording is in progress")]
    NoRecordingInProgress,

    #[error("File I/O error: {source}")]
    FileIo {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to create the recorder: {details}")]
    CreateRecorderError { details: String },

    #[error("The capture was aborted")]
    Aborted,

    #[error("Capture failed: {message}")]
    Failed { message: String },
}

/// Malformed input from the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Invalid value for parameter \"{name}\": {value}")]
    Invalid { name: String, value: String },
}

impl ViewcamError {
    /// Stable error code, `"domain/error-id"`, as reported in error events.
    pub fn code(&self) -> &'static str {
        match self {
            ViewcamError::Device(e) => match e {
                DeviceError::NoDevice => "device/no-device",
                DeviceError::NotFound { .. } => "device/not-found",
                DeviceError::Invalid { .. } => "device/invalid",
                DeviceError::FocusNotSupported => "device/focus-not-supported",
                DeviceError::LowLightBoostNotSupported => "device/low-light-boost-not-supported",
                DeviceError::ConfigureError { .. } => "device/configure-error",
            },
            ViewcamError::Session(e) => match e {
                SessionError::CameraNotReady => "session/camera-not-ready",
                SessionError::ParallelUseNotSupported { .. } => {
                    "session/parallel-use-not-supported"
                }
            },
            ViewcamError::Format(e) => match e {
                FormatError::InvalidFormat => "format/invalid-format",
                FormatError::InvalidFps { .. } => "format/invalid-fps",
                FormatError::InvalidHdr => "format/invalid-hdr",
                FormatError::InvalidColorSpace { .. } => "format/invalid-color-space",
            },
            ViewcamError::Capture(e) => match e {
                CaptureError::PhotoNotEnabled => "capture/photo-not-enabled",
                CaptureError::VideoNotEnabled => "capture/video-not-enabled",
                CaptureError::RecordingInProgress => "capture/recording-in-progress",
                CaptureError::NoRecordingInProgress => "capture/no-recording-in-progress",
                CaptureError::FileIo { .. } => "capture/file-io-error",
                CaptureError::CreateRecorderError { .. } => "capture/create-recorder-error",
                CaptureError::Aborted => "capture/aborted",
                CaptureError::Failed { .. } => "capture/capture-failed",
            },
            ViewcamError::Parameter(_) => "parameter/invalid",
            ViewcamError::Unknown { .. } => "unknown/unknown",
        }
    }

    /// Transient errors are eligible for the single delayed rebuild retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ViewcamError::Session(SessionError::CameraNotReady))
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::Unknown {
            message: message.into(),
            cause: None,
        }
    }

    pub fn unknown_with_cause<S: Into<String>>(message: S, cause: anyhow::Error) -> Self {
        Self::Unknown {
            message: message.into(),
            cause: Some(cause),
        }
    }
}

impl From<std::io::Error> for ViewcamError {
    fn from(source: std::io::Error) -> Self {
        ViewcamError::Capture(CaptureError::FileIo { source })
    }
}

pub type Result<T> = std::result::Result<T, ViewcamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            ViewcamError::from(DeviceError::NotFound {
                camera_id: "back-wide".to_string()
            })
            .code(),
            "device/not-found"
        );
        assert_eq!(
            ViewcamError::from(SessionError::ParallelUseNotSupported {
                requested: 3,
                supported: 1
            })
            .code(),
            "session/parallel-use-not-supported"
        );
        assert_eq!(
            ViewcamError::from(CaptureError::NoRecordingInProgress).code(),
            "capture/no-recording-in-progress"
        );
        assert_eq!(ViewcamError::unknown("boom").code(), "unknown/unknown");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ViewcamError::from(SessionError::CameraNotReady).is_transient());
        assert!(!ViewcamError::from(FormatError::InvalidHdr).is_transient());
        assert!(!ViewcamError::from(DeviceError::NoDevice).is_transient());
    }

    #[test]
    fn test_io_errors_map_to_capture_domain() {
        let err: ViewcamError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.code(), "capture/file-io-error");
    }

    #[test]
    fn test_unknown_preserves_cause() {
        let err = ViewcamError::unknown_with_cause("wrapped", anyhow::anyhow!("inner failure"));
        match err {
            ViewcamError::Unknown { message, cause } => {
                assert_eq!(message, "wrapped");
                assert!(cause.unwrap().to_string().contains("inner failure"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
