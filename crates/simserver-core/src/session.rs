//! Simulation session and poll-based result handles
//!
//! A [`Session`] owns one engine bound to one circuit. Commands start a
//! background analysis and return a [`RunHandle`]; the caller polls
//! [`RunHandle::read`] until it reports `more == false`.
//!
//! State machine:
//!
//! ```text
//! Idle --command--> Running --engine halts--> Draining --read(more=false)--> Idle
//!                      |
//!                      +--fatal exit--> Exited
//! any --drop/close--> Closed
//! ```

use crate::callback::CallbackAdapter;
use crate::capture::Capture;
use crate::command::{
    save_commands, AnalysisRequest, HALT_COMMAND, QUIT_COMMAND, RESET_SAVES_COMMAND,
};
use crate::config::SessionConfig;
use crate::engine::Engine;
use crate::error::{Result, SimError};
use crate::staging::stage_files;
use crate::store::{Phase, SharedState};
use crate::types::{CircuitFile, ReadResult, SessionState, SweepMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Result handle
// ============================================================================

/// The result stream of one accepted command
#[derive(Debug)]
pub struct RunHandle {
    state: Arc<SharedState>,
    run: u64,
}

impl RunHandle {
    /// Identifier of the run this handle reads
    pub fn run_id(&self) -> u64 {
        self.run
    }

    /// Poll for everything accumulated since the previous read.
    ///
    /// Never blocks on the engine. A handle whose run has been superseded by
    /// a newer command reports an empty, finished result.
    pub fn read(&self) -> Result<ReadResult> {
        {
            let lifecycle = self.state.lifecycle.lock();
            match lifecycle.phase {
                Phase::Exited(notice) => {
                    return Err(SimError::EngineExited {
                        status: notice.status,
                    })
                }
                Phase::Closed => return Err(SimError::SessionClosed),
                Phase::Idle | Phase::Running => {}
            }
            if lifecycle.run != self.run {
                return Ok(ReadResult {
                    more: false,
                    stdout: String::new(),
                    groups: Vec::new(),
                });
            }
        }

        // The flag is sampled before draining: once it reads false the engine
        // has delivered its last batch, so that batch is in this snapshot.
        let result = {
            let running = self.state.running.lock();
            let mut groups = self.state.groups.lock();
            let mut log = self.state.log.lock();
            ReadResult {
                more: *running,
                stdout: log.drain(),
                groups: groups.drain(),
            }
        };

        if !result.more {
            let mut lifecycle = self.state.lifecycle.lock();
            if lifecycle.run == self.run && lifecycle.phase == Phase::Running {
                lifecycle.phase = Phase::Idle;
                lifecycle.outstanding = false;
                debug!(run = self.run, "Run drained");
            }
        }

        Ok(result)
    }

    /// Poll until the run finishes, sleeping `interval` between polls, and
    /// merge every delta.
    ///
    /// This blocks the calling thread; it is meant for scripts and tests,
    /// not for request handlers.
    pub fn read_all(&self, interval: Duration) -> Result<Capture> {
        let mut capture = Capture::new();
        loop {
            let delta = self.read()?;
            let more = delta.more;
            capture.absorb(delta);
            if !more {
                return Ok(capture);
            }
            std::thread::sleep(interval);
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        let running = self.state.is_running();
        let mut lifecycle = self.state.lifecycle.lock();
        if lifecycle.run == self.run {
            lifecycle.outstanding = false;
            if !running && lifecycle.phase == Phase::Running {
                lifecycle.phase = Phase::Idle;
                debug!(run = self.run, "Undrained run abandoned");
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One engine bound to one loaded circuit
pub struct Session<E: Engine> {
    engine: Option<E>,
    state: Arc<SharedState>,
    adapter: Arc<CallbackAdapter>,
    config: SessionConfig,
    circuit: PathBuf,
}

impl<E: Engine> std::fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("circuit", &self.circuit)
            .field("state", &self.state())
            .finish()
    }
}

impl<E: Engine> Session<E> {
    /// Stage `files`, bind `engine` to a fresh callback adapter, and source
    /// the first file.
    #[instrument(skip_all, fields(files = files.len()))]
    pub fn load(mut engine: E, files: &[CircuitFile], config: SessionConfig) -> Result<Self> {
        let circuit = stage_files(&config.work_dir, files)?;

        let state = Arc::new(SharedState::new());
        let adapter = Arc::new(CallbackAdapter::new(Arc::clone(&state)));
        engine.init(Arc::clone(&adapter))?;

        let mut session = Self {
            engine: Some(engine),
            state,
            adapter,
            config,
            circuit,
        };
        let source = format!("source {}", session.circuit.display());
        session.engine_mut()?.command(&source)?;

        info!(circuit = %session.circuit.display(), "Circuit loaded");
        Ok(session)
    }

    /// Path of the sourced circuit file
    pub fn circuit(&self) -> &Path {
        &self.circuit
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        match self.state.phase() {
            Phase::Idle => SessionState::Idle,
            Phase::Exited(_) => SessionState::Exited,
            Phase::Closed => SessionState::Closed,
            Phase::Running if self.state.is_running() => SessionState::Running,
            Phase::Running => SessionState::Draining,
        }
    }

    /// Borrow the engine, releasing it first if it has exited
    fn engine_mut(&mut self) -> Result<&mut E> {
        match self.state.phase() {
            Phase::Exited(notice) => {
                if let Some(engine) = self.engine.take() {
                    self.adapter.detach();
                    drop(engine);
                    warn!(status = notice.status, "Released exited engine");
                }
                Err(SimError::EngineExited {
                    status: notice.status,
                })
            }
            Phase::Closed => Err(SimError::SessionClosed),
            Phase::Idle | Phase::Running => self.engine.as_mut().ok_or(SimError::SessionClosed),
        }
    }

    /// Start an analysis capturing `vectors` (all vectors if empty)
    #[instrument(skip(self, vectors), fields(analysis = request.name(), vectors = vectors.len()))]
    pub fn dispatch<S: AsRef<str>>(
        &mut self,
        request: AnalysisRequest,
        vectors: &[S],
    ) -> Result<RunHandle> {
        self.engine_mut()?;
        request.validate()?;
        let saves = save_commands(vectors, self.config.save_chunk_size)?;
        let background = request.background_command();

        if self.state.is_running() {
            return Err(SimError::Busy);
        }
        {
            let lifecycle = self.state.lifecycle.lock();
            if lifecycle.phase == Phase::Running && lifecycle.outstanding {
                return Err(SimError::Busy);
            }
        }

        let engine = self.engine_mut()?;
        engine.command(RESET_SAVES_COMMAND)?;
        for save in &saves {
            engine.command(save)?;
        }

        if self.state.groups.lock().pending_samples() > 0 {
            warn!("Discarding undrained samples of an abandoned run");
        }
        // Cleared before submission: a fast engine announces its vectors
        // before the command returns. The previous run has already been
        // drained or abandoned.
        self.state.clear_data();

        // Raised before submission so a fast engine's halt notice wins
        self.state.set_running(true);
        let (previous_run, run) = {
            let mut lifecycle = self.state.lifecycle.lock();
            let previous_run = lifecycle.run;
            lifecycle.run += 1;
            lifecycle.phase = Phase::Running;
            lifecycle.outstanding = true;
            (previous_run, lifecycle.run)
        };

        let submitted = match self.engine.as_mut() {
            Some(engine) => engine.command(&background),
            None => Err(SimError::SessionClosed),
        };
        if let Err(e) = submitted {
            self.state.set_running(false);
            let mut lifecycle = self.state.lifecycle.lock();
            if lifecycle.phase == Phase::Running {
                lifecycle.phase = Phase::Idle;
            }
            if lifecycle.run == run {
                lifecycle.run = previous_run;
            }
            lifecycle.outstanding = false;
            return Err(e);
        }

        debug!(run, command = %background, "Analysis started");
        Ok(RunHandle {
            state: Arc::clone(&self.state),
            run,
        })
    }

    pub fn run<S: AsRef<str>>(&mut self, vectors: &[S]) -> Result<RunHandle> {
        self.dispatch(AnalysisRequest::Run, vectors)
    }

    pub fn op<S: AsRef<str>>(&mut self, vectors: &[S]) -> Result<RunHandle> {
        self.dispatch(AnalysisRequest::OperatingPoint, vectors)
    }

    pub fn tran<S: AsRef<str>>(
        &mut self,
        vectors: &[S],
        step: f64,
        stop: f64,
        start: f64,
    ) -> Result<RunHandle> {
        self.dispatch(AnalysisRequest::Transient { step, stop, start }, vectors)
    }

    pub fn dc<S: AsRef<str>>(
        &mut self,
        vectors: &[S],
        source: &str,
        start: f64,
        stop: f64,
        increment: f64,
    ) -> Result<RunHandle> {
        self.dispatch(
            AnalysisRequest::DcSweep {
                source: source.to_string(),
                start,
                stop,
                increment,
            },
            vectors,
        )
    }

    pub fn ac<S: AsRef<str>>(
        &mut self,
        vectors: &[S],
        mode: SweepMode,
        points: u32,
        fstart: f64,
        fstop: f64,
    ) -> Result<RunHandle> {
        self.dispatch(
            AnalysisRequest::AcSweep {
                mode,
                points,
                fstart,
                fstop,
            },
            vectors,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn noise<S: AsRef<str>>(
        &mut self,
        vectors: &[S],
        output: &str,
        source: &str,
        mode: SweepMode,
        points: u32,
        fstart: f64,
        fstop: f64,
    ) -> Result<RunHandle> {
        self.dispatch(
            AnalysisRequest::Noise {
                output: output.to_string(),
                source: source.to_string(),
                mode,
                points,
                fstart,
                fstop,
            },
            vectors,
        )
    }

    /// Tear the session down now instead of at drop
    pub fn close(mut self) {
        self.teardown();
    }

    /// Halt, detach, terminate, release. Idempotent.
    fn teardown(&mut self) {
        let exited = matches!(self.state.phase(), Phase::Exited(_));

        if let Some(mut engine) = self.engine.take() {
            let needs_halt = !exited && (self.state.is_running() || engine.is_running());
            if needs_halt {
                info!("Halting background analysis before teardown");
                if let Err(e) = engine.command(HALT_COMMAND) {
                    warn!(error = %e, "Halt command failed");
                }
                let halted =
                    wait_for_halt(&engine, self.config.halt_timeout, self.config.halt_poll_interval);
                if !halted {
                    // Unloading now would pull code out from under the
                    // engine's worker thread, so the engine is leaked.
                    self.adapter.detach();
                    error!(
                        timeout = ?self.config.halt_timeout,
                        "Engine ignored halt; leaking it instead of releasing"
                    );
                    std::mem::forget(engine);
                    self.state.set_running(false);
                    self.state.lifecycle.lock().phase = Phase::Closed;
                    return;
                }
            }

            self.adapter.detach();

            if needs_halt {
                if let Err(e) = engine.command(QUIT_COMMAND) {
                    warn!(error = %e, "Quit command failed");
                }
            }
            drop(engine);
        } else {
            self.adapter.detach();
        }

        self.state.set_running(false);
        self.state.lifecycle.lock().phase = Phase::Closed;
        debug!(circuit = %self.circuit.display(), "Session closed");
    }
}

impl<E: Engine> Drop for Session<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Poll until the engine's worker stops. Returns false on timeout.
fn wait_for_halt<E: Engine>(engine: &E, timeout: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while engine.is_running() {
        if Instant::now() >= deadline {
            warn!(?timeout, "Engine still running after halt timeout");
            return false;
        }
        std::thread::sleep(interval);
    }
    true
}
