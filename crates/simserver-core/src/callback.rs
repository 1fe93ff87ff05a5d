//! Callback adapter: the only code that runs on the engine's thread
//!
//! Each entry point takes exactly one store lock, mutates, and releases it
//! before returning. Nothing here calls back into the engine.

use crate::store::{Phase, SharedState, VectorGroup};
use crate::types::{ExitNotice, SampleValue};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Receives engine callbacks and routes them into a session's stores.
///
/// The adapter holds a detachable reference to the stores. Once the owning
/// session detaches it (at halt time during teardown), every entry point is
/// a no-op. Detaching waits for callbacks already in flight to return.
#[derive(Debug)]
pub struct CallbackAdapter {
    target: RwLock<Option<Arc<SharedState>>>,
}

impl CallbackAdapter {
    pub(crate) fn new(state: Arc<SharedState>) -> Self {
        Self {
            target: RwLock::new(Some(state)),
        }
    }

    /// Whether callbacks still reach a live session
    pub fn is_attached(&self) -> bool {
        self.target.read().is_some()
    }

    /// Stop routing callbacks to the session
    pub(crate) fn detach(&self) {
        if self.target.write().take().is_some() {
            debug!("Callback adapter detached");
        }
    }

    #[inline]
    fn with_state<R>(&self, f: impl FnOnce(&SharedState) -> R) -> Option<R> {
        let guard = self.target.read();
        guard.as_deref().map(f)
    }

    /// Informational text from the engine
    pub fn log_line(&self, line: &str) {
        debug!(target: "engine", "{}", line);
        self.with_state(|s| s.log.lock().push_line(line));
    }

    /// Progress text from the engine
    pub fn status_line(&self, line: &str) {
        trace!(target: "engine", status = %line);
        self.with_state(|s| s.log.lock().push_line(line));
    }

    /// A new vector group was announced
    pub fn vectors_announced<S: Into<String>>(&self, name: &str, fieldnames: impl IntoIterator<Item = S>) {
        self.with_state(|s| {
            let group = VectorGroup::new(name, fieldnames);
            debug!(group = %name, vectors = group.vector_count(), "Vector group announced");
            s.groups.lock().announce(group);
        });
    }

    /// One sample batch for the most recently announced group
    pub fn samples(&self, values: &[SampleValue]) {
        self.with_state(|s| {
            trace!(values = values.len(), "Sample batch");
            s.groups.lock().append(values);
        });
    }

    /// The background thread started (`halted = false`) or stopped
    pub fn run_state_changed(&self, halted: bool) {
        self.with_state(|s| {
            debug!(halted, "Engine run state changed");
            s.set_running(!halted);
        });
    }

    /// The engine terminated unrecoverably
    pub fn exited(&self, notice: ExitNotice) {
        let attached = self.with_state(|s| {
            s.set_running(false);
            let mut lifecycle = s.lifecycle.lock();
            if lifecycle.phase != Phase::Closed {
                lifecycle.phase = Phase::Exited(notice);
            }
        });
        match attached {
            Some(()) => error!(
                status = notice.status,
                immediate = notice.immediate,
                exit_upon_quit = notice.exit_upon_quit,
                "Engine exited"
            ),
            None => info!(status = notice.status, "Engine exit after detach ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VectorData;

    fn adapter() -> (Arc<SharedState>, CallbackAdapter) {
        let state = Arc::new(SharedState::new());
        let adapter = CallbackAdapter::new(Arc::clone(&state));
        (state, adapter)
    }

    #[test]
    fn test_routes_to_stores() {
        let (state, adapter) = adapter();
        adapter.log_line("stdout Note: No compatibility mode selected!");
        adapter.status_line("--ready--");
        adapter.vectors_announced("tran1", ["time", "V(1)"]);
        adapter.samples(&[SampleValue::real(0.0).scale(), SampleValue::real(0.25)]);
        adapter.run_state_changed(false);

        assert!(state.is_running());
        assert_eq!(
            state.log.lock().as_str(),
            "stdout Note: No compatibility mode selected!\n--ready--\n"
        );
        let groups = state.groups.lock().drain();
        assert_eq!(groups[0].scale.as_deref(), Some("time"));
        assert_eq!(groups[0].get("V(1)"), Some(&VectorData::Real(vec![0.25])));

        adapter.run_state_changed(true);
        assert!(!state.is_running());
    }

    #[test]
    fn test_detached_is_noop() {
        let (state, adapter) = adapter();
        adapter.vectors_announced("tran1", ["time"]);
        adapter.detach();
        assert!(!adapter.is_attached());

        adapter.log_line("late");
        adapter.samples(&[SampleValue::real(1.0)]);
        adapter.run_state_changed(false);
        adapter.exited(ExitNotice {
            status: 1,
            immediate: false,
            exit_upon_quit: true,
        });

        assert!(state.log.lock().is_empty());
        assert_eq!(state.groups.lock().pending_samples(), 0);
        assert!(!state.is_running());
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn test_exit_marks_phase() {
        let (state, adapter) = adapter();
        state.set_running(true);
        let notice = ExitNotice {
            status: 1,
            immediate: true,
            exit_upon_quit: false,
        };
        adapter.exited(notice);
        assert_eq!(state.phase(), Phase::Exited(notice));
        assert!(!state.is_running());
    }
}
