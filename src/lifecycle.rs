use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle state of the embedding host (activity/scene).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Created,
    Resumed,
    Destroyed,
}

/// The resolved running state of the camera component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveState {
    /// Session bound, frames flowing
    Running,
    /// Device released, configuration retained for cheap resume
    Paused,
    /// All resources released; terminal
    Destroyed,
}

/// Receives lifecycle transitions. Injected at wiring time; the controller
/// never reaches into a global registry to find its collaborators.
pub trait LifecycleObserver: Send + Sync {
    fn on_transition(&self, from: EffectiveState, to: EffectiveState);

    /// Fired once, on the first attach.
    fn on_view_ready(&self);
}

#[derive(Debug)]
struct LifecycleState {
    host: HostState,
    is_active: bool,
    is_attached: bool,
    effective: EffectiveState,
    mounted: bool,
}

/// Merges the host lifecycle with the component's own activity flags into
/// one effective state.
///
/// The session runs iff the host is resumed AND the component is active AND
/// attached; any other combination is paused. Destruction is terminal and
/// releases resources exactly once.
pub struct LifecycleController {
    state: Mutex<LifecycleState>,
    observer: Mutex<Option<Arc<dyn LifecycleObserver>>>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState {
                host: HostState::Created,
                is_active: false,
                is_attached: false,
                effective: EffectiveState::Paused,
                mounted: false,
            }),
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        *self.observer.lock() = Some(observer);
    }

    pub fn effective_state(&self) -> EffectiveState {
        self.state.lock().effective
    }

    pub fn is_running(&self) -> bool {
        self.effective_state() == EffectiveState::Running
    }

    pub fn set_host_state(&self, host: HostState) {
        self.update(|state| state.host = host);
    }

    pub fn set_active(&self, is_active: bool) {
        self.update(|state| state.is_active = is_active);
    }

    pub fn set_attached(&self, is_attached: bool) {
        let view_ready = {
            let mut state = self.state.lock();
            state.is_attached = is_attached;
            if is_attached && !state.mounted {
                state.mounted = true;
                true
            } else {
                false
            }
        };

        if view_ready {
            if let Some(observer) = self.observer.lock().clone() {
                observer.on_view_ready();
            }
        }

        self.update(|_| {});
    }

    fn update(&self, mutate: impl FnOnce(&mut LifecycleState)) {
        let transition = {
            let mut state = self.state.lock();
            mutate(&mut state);

            let before = state.effective;
            state.effective = Self::compute(&state);

            if before != state.effective {
                info!(
                    "Lifecycle went from {:?} -> {:?} (host: {:?}, active: {}, attached: {})",
                    before, state.effective, state.host, state.is_active, state.is_attached
                );
                Some((before, state.effective))
            } else {
                debug!(
                    "Lifecycle unchanged at {:?} (host: {:?}, active: {}, attached: {})",
                    state.effective, state.host, state.is_active, state.is_attached
                );
                None
            }
        };

        // Notify outside the lock so observers may read the controller.
        if let Some((from, to)) = transition {
            if let Some(observer) = self.observer.lock().clone() {
                observer.on_transition(from, to);
            }
        }
    }

    fn compute(state: &LifecycleState) -> EffectiveState {
        // Destruction wins and is never left again.
        if state.effective == EffectiveState::Destroyed || state.host == HostState::Destroyed {
            return EffectiveState::Destroyed;
        }
        if state.host == HostState::Resumed && state.is_active && state.is_attached {
            EffectiveState::Running
        } else {
            EffectiveState::Paused
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}
