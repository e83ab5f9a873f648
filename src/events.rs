use crate::error::ViewcamError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Direction of a frame-processor performance suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionKind {
    CanUseHigherFps,
    ShouldUseLowerFps,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::CanUseHigherFps => "can-use-higher-fps",
            SuggestionKind::ShouldUseLowerFps => "should-use-lower-fps",
        }
    }
}

/// Outward fire-and-forget notifications to the bridging layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ViewcamEvent {
    /// The capture session was (re)built and is delivering frames.
    Initialized,
    /// The view is mounted and ready to receive commands.
    ViewReady,
    /// A configuration or session error occurred.
    Error {
        code: String,
        message: String,
        cause: Option<String>,
    },
    /// The measured frame-processor throughput differs significantly from
    /// the requested rate.
    PerformanceSuggestion {
        kind: SuggestionKind,
        current_fps: f64,
        suggested_fps: f64,
    },
}

impl ViewcamEvent {
    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ViewcamEvent::Initialized => "initialized",
            ViewcamEvent::ViewReady => "view_ready",
            ViewcamEvent::Error { .. } => "error",
            ViewcamEvent::PerformanceSuggestion { .. } => "performance_suggestion",
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ViewcamEvent::Initialized => "Camera session initialized".to_string(),
            ViewcamEvent::ViewReady => "Camera view ready".to_string(),
            ViewcamEvent::Error { code, message, .. } => {
                format!("Error [{}]: {}", code, message)
            }
            ViewcamEvent::PerformanceSuggestion {
                kind,
                current_fps,
                suggested_fps,
            } => {
                format!(
                    "Performance suggestion ({}): current {:.1} fps, suggested {:.1} fps",
                    kind.as_str(),
                    current_fps,
                    suggested_fps
                )
            }
        }
    }
}

/// Async event channel between the core and its bridging layer, built on a
/// broadcast channel so multiple observers can subscribe independently.
pub struct EventBus {
    sender: broadcast::Sender<ViewcamEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ViewcamEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers the event reached. Emission never
    /// fails outward: an undeliverable event is logged and dropped.
    pub fn publish(&self, event: ViewcamEvent) -> usize {
        match &event {
            ViewcamEvent::Error { code, message, .. } => {
                error!("Camera error [{}]: {}", code, message);
            }
            ViewcamEvent::Initialized => {
                info!("Camera session initialized");
            }
            ViewcamEvent::ViewReady => {
                info!("Camera view ready");
            }
            ViewcamEvent::PerformanceSuggestion { .. } => {
                debug!("{}", event.description());
            }
        }

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(
                    "Dropping {} event: no active subscribers",
                    event.event_type()
                );
                0
            }
        }
    }

    /// Publish an error event built from a [`ViewcamError`].
    ///
    /// The error-reporting path itself must never raise: if the full event
    /// cannot be constructed or delivered, fall back to a minimal one, and
    /// as a last resort drop it with a log line.
    pub fn emit_error(&self, error: &ViewcamError) {
        let cause = match error {
            ViewcamError::Unknown {
                cause: Some(cause), ..
            } => Some(cause.to_string()),
            _ => None,
        };

        let event = ViewcamEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
            cause,
        };

        if self.publish(event) == 0 {
            warn!(
                "Error event [{}] had no subscribers: {}",
                error.code(),
                error
            );
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Enough headroom that a slow subscriber does not lose error events.
        Self::new(64)
    }
}
