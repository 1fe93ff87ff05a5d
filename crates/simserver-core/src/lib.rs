//! # Simulation Session Bridge - Core Library
//!
//! Exposes a callback-driven SPICE engine (ngspice's shared library) through
//! a non-blocking, poll-based session.
//!
//! ## Features
//!
//! - Engine callbacks buffered into lock-protected stores
//! - Delta reads: every poll returns what arrived since the previous one
//! - Reset-before-save so vector selections never accumulate across runs
//! - Halt-before-release teardown so no callback outlives its session
//! - Structured logging via `tracing` for diagnostics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use simserver_core::{CircuitFile, Session, SessionConfig};
//! use std::time::Duration;
//!
//! let files = [CircuitFile::new("rc.sp", "* rc\nV1 1 0 sin(0 5 1k)\nR1 1 2 1k\nC1 2 0 1u\n.end\n")];
//! let mut session = Session::load(engine, &files, SessionConfig::from_env())?;
//!
//! let handle = session.tran(&["time", "v(2)"], 1e-6, 1e-3, 0.0)?;
//! loop {
//!     let delta = handle.read()?;
//!     if let Some(v2) = delta.get("v(2)") {
//!         println!("{} new samples", v2.len());
//!     }
//!     if !delta.more {
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(50));
//! }
//! ```
//!
//! The engine comes from `simserver-ffi` (`NgspiceEngine`) or from any type
//! implementing [`Engine`].
//!
//! ## Enabling Logging
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```

mod callback;
mod capture;
mod command;
mod config;
mod engine;
mod error;
mod session;
mod simulator;
mod staging;
mod store;
mod types;

pub use callback::CallbackAdapter;
pub use capture::Capture;
pub use command::{
    save_commands, AnalysisRequest, HALT_COMMAND, QUIT_COMMAND, RESET_SAVES_COMMAND,
};
pub use config::{
    SessionConfig, DEFAULT_HALT_POLL_INTERVAL, DEFAULT_HALT_TIMEOUT, ENV_HALT_POLL_MS,
    ENV_HALT_TIMEOUT_MS, ENV_SAVE_CHUNK, ENV_WORK_DIR,
};
pub use engine::{Engine, EngineFactory};
pub use error::{Result, SimError};
pub use session::{RunHandle, Session};
pub use simulator::Simulator;
pub use staging::stage_files;
pub use store::{OutputLog, VectorGroup, VectorGroupStore};
pub use types::{
    CircuitFile, ExitNotice, GroupData, ReadResult, SampleValue, SessionState, SweepMode,
    ValueKind, VectorData, VectorSnapshot,
};

// Re-export for downstream crates building sample values
pub use num_complex::Complex64;
