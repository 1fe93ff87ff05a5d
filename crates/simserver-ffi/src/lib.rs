//! libngspice engine for simserver-core
//!
//! Loads ngspice's shared library at runtime and adapts its C callback API to
//! the [`Engine`] trait. The library keeps process-global state, so at most
//! one [`NgspiceEngine`] may exist at a time.

mod sys;

use libloading::Library;
use simserver_core::{CallbackAdapter, Engine, Result, SimError};
use std::ffi::{c_char, c_void, CString};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the library path
pub const ENV_LIBRARY: &str = "NGSPICE_LIBRARY";

#[cfg(target_os = "windows")]
pub const DEFAULT_LIBRARY: &str = "ngspice.dll";
#[cfg(target_os = "macos")]
pub const DEFAULT_LIBRARY: &str = "libngspice.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_LIBRARY: &str = "libngspice.so";

// ============================================================================
// Configuration
// ============================================================================

/// Where to find the shared library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NgspiceConfig {
    pub library: PathBuf,
}

impl Default for NgspiceConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from(DEFAULT_LIBRARY),
        }
    }
}

impl NgspiceConfig {
    /// Defaults overlaid with `NGSPICE_LIBRARY` when set and non-empty
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(ENV_LIBRARY) {
            if !path.trim().is_empty() {
                config.library = PathBuf::from(path);
            }
        }
        config
    }

    pub fn with_library(mut self, library: impl Into<PathBuf>) -> Self {
        self.library = library.into();
        self
    }
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

// ============================================================================
// Engine
// ============================================================================

static ENGINE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claim on the process-wide engine slot, released on drop
#[derive(Debug)]
struct EngineSlot;

impl EngineSlot {
    fn claim() -> Result<Self> {
        ENGINE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| EngineSlot)
            .map_err(|_| SimError::EngineLoad("an ngspice engine is already active".to_string()))
    }
}

impl Drop for EngineSlot {
    fn drop(&mut self) {
        ENGINE_ACTIVE.store(false, Ordering::Release);
    }
}

/// ngspice loaded from its shared library.
///
/// Fields drop in declaration order: the library is unloaded before the
/// callback adapter it points at is released.
pub struct NgspiceEngine {
    init_fn: sys::NgSpiceInit,
    command_fn: sys::NgSpiceCommand,
    running_fn: sys::NgSpiceRunning,
    library: Library,
    callbacks: Option<Arc<CallbackAdapter>>,
    _slot: EngineSlot,
}

impl std::fmt::Debug for NgspiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NgspiceEngine")
            .field("library", &self.library)
            .field("initialized", &self.callbacks.is_some())
            .finish()
    }
}

impl NgspiceEngine {
    /// Load the library and resolve the entry points
    pub fn load(config: &NgspiceConfig) -> Result<Self> {
        let slot = EngineSlot::claim()?;
        let path = &config.library;

        // SAFETY: loading runs the library's initializers; libngspice has no
        // constructors that depend on caller state.
        let library = unsafe { Library::new(path) }
            .map_err(|e| SimError::EngineLoad(format!("{}: {}", path.display(), e)))?;

        // SAFETY: the signatures match sharedspice.h.
        let (init_fn, command_fn, running_fn) = unsafe {
            (
                symbol::<sys::NgSpiceInit>(&library, b"ngSpice_Init\0")?,
                symbol::<sys::NgSpiceCommand>(&library, b"ngSpice_Command\0")?,
                symbol::<sys::NgSpiceRunning>(&library, b"ngSpice_running\0")?,
            )
        };

        info!(library = %path.display(), "ngspice library loaded");
        Ok(Self {
            init_fn,
            command_fn,
            running_fn,
            library,
            callbacks: None,
            _slot: slot,
        })
    }

    /// A factory creating a fresh engine per loaded circuit
    pub fn factory(config: NgspiceConfig) -> impl FnMut() -> Result<NgspiceEngine> {
        move || NgspiceEngine::load(&config)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.callbacks.is_none() {
            return Err(SimError::EngineLoad("ngspice not initialized".to_string()));
        }
        Ok(())
    }
}

/// # Safety
/// `T` must be the exact function pointer type of the exported symbol.
unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    library.get::<T>(name).map(|s| *s).map_err(|e| {
        let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
        SimError::EngineLoad(format!("missing symbol {}: {}", printable, e))
    })
}

impl Engine for NgspiceEngine {
    fn init(&mut self, callbacks: Arc<CallbackAdapter>) -> Result<()> {
        if self.callbacks.is_some() {
            return Err(SimError::EngineLoad("ngspice already initialized".to_string()));
        }
        let user = Arc::as_ptr(&callbacks) as *mut c_void;
        // Held until the library is unloaded, so `user` outlives every callback
        self.callbacks = Some(callbacks);

        // SAFETY: the trampolines only dereference `user` as a CallbackAdapter,
        // which `self.callbacks` keeps alive past the library.
        let code = unsafe {
            (self.init_fn)(
                Some(sys::send_char),
                Some(sys::send_stat),
                Some(sys::controlled_exit),
                Some(sys::send_data),
                Some(sys::send_init_data),
                Some(sys::bg_thread_running),
                user,
            )
        };
        if code != 0 {
            return Err(SimError::EngineLoad(format!(
                "ngSpice_Init returned {}",
                code
            )));
        }
        debug!("ngspice initialized");
        Ok(())
    }

    fn command(&mut self, command: &str) -> Result<()> {
        self.ensure_initialized()?;
        let mut buffer = CString::new(command)
            .map_err(|_| SimError::InvalidRequest(format!("command contains NUL: {:?}", command)))?
            .into_bytes_with_nul();

        debug!(command, "ngspice command");
        // SAFETY: ngSpice_Command reads the NUL-terminated buffer and does not
        // retain it past the call.
        let code = unsafe { (self.command_fn)(buffer.as_mut_ptr() as *mut c_char) };
        if code != 0 {
            return Err(SimError::CommandFailed {
                command: command.to_string(),
                code,
            });
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        if self.callbacks.is_none() {
            return false;
        }
        // SAFETY: takes no arguments and only reads engine state.
        unsafe { (self.running_fn)() }
    }
}
