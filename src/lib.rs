pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod frame;
pub mod lifecycle;
pub mod performance;
pub mod pipeline;
pub mod recorder;
pub mod session;
pub mod view;

pub use config::{
    CaptureConfig, ChangeSet, PropName, SharedConfig, TorchMode, FRAME_PROCESSOR_FPS_AUTO,
    SESSION_PROPS,
};
pub use device::{ColorSpace, DeviceDescriptor, DeviceFormat, DevicePosition, FormatFilter};
pub use dispatcher::{
    DispatcherStatsSnapshot, FrameDispatcher, FrameProcessor, FrameProcessorSettings,
};
pub use error::{
    CaptureError, DeviceError, FormatError, ParameterError, Result, SessionError, ViewcamError,
};
pub use events::{EventBus, SuggestionKind, ViewcamEvent};
pub use frame::{Frame, FrameFormat, Orientation};
pub use lifecycle::{EffectiveState, HostState, LifecycleController, LifecycleObserver};
pub use performance::{
    PerformanceDataCollector, PerformanceSample, PerformanceStatsSnapshot, MAX_SAMPLE_SIZE,
    WARMUP_SAMPLES,
};
pub use pipeline::{
    BoundCamera, CapturePipeline, FlashMode, FocusPoint, FrameSink, PhotoOptions, PhotoResult,
    SessionPlan, SimulatedPipeline, UseCase,
};
pub use recorder::{
    RecordingCallback, RecordingResult, RecordingSession, RecordingStatus, SampleWriter,
    VideoFileType,
};
pub use session::{RebuildFailurePolicy, SessionConfigurator};
pub use view::{CameraView, CameraViewBuilder, RecordingOptions};
