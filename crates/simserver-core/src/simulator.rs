//! Circuit loading entry point holding at most one session

use crate::command::AnalysisRequest;
use crate::config::SessionConfig;
use crate::engine::EngineFactory;
use crate::error::{Result, SimError};
use crate::session::{RunHandle, Session};
use crate::types::CircuitFile;
use tracing::info;

/// Owns the current session and creates a fresh engine for every load
pub struct Simulator<F: EngineFactory> {
    factory: F,
    config: SessionConfig,
    session: Option<Session<F::Engine>>,
}

impl<F: EngineFactory> Simulator<F> {
    pub fn new(factory: F, config: SessionConfig) -> Self {
        Self {
            factory,
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the current session with one bound to `files[0]`.
    ///
    /// The previous session is torn down before the new engine is created.
    pub fn load_circuit(&mut self, files: &[CircuitFile]) -> Result<&mut Session<F::Engine>> {
        if let Some(previous) = self.session.take() {
            info!(circuit = %previous.circuit().display(), "Replacing loaded circuit");
            previous.close();
        }
        let engine = self.factory.create()?;
        let session = Session::load(engine, files, self.config.clone())?;
        Ok(self.session.insert(session))
    }

    /// The loaded session
    pub fn session(&mut self) -> Result<&mut Session<F::Engine>> {
        self.session.as_mut().ok_or(SimError::NoCircuit)
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    /// Dispatch on the loaded session
    pub fn dispatch<S: AsRef<str>>(
        &mut self,
        request: AnalysisRequest,
        vectors: &[S],
    ) -> Result<RunHandle> {
        self.session()?.dispatch(request, vectors)
    }

    /// Tear down the loaded session, if any
    pub fn unload(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}
