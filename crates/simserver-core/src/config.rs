//! Session configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`SessionConfig::work_dir`]
pub const ENV_WORK_DIR: &str = "SIMSERVER_WORK_DIR";
/// Environment variable overriding [`SessionConfig::save_chunk_size`]
pub const ENV_SAVE_CHUNK: &str = "SIMSERVER_SAVE_CHUNK";
/// Environment variable overriding [`SessionConfig::halt_timeout`] (milliseconds)
pub const ENV_HALT_TIMEOUT_MS: &str = "SIMSERVER_HALT_TIMEOUT_MS";
/// Environment variable overriding [`SessionConfig::halt_poll_interval`] (milliseconds)
pub const ENV_HALT_POLL_MS: &str = "SIMSERVER_HALT_POLL_MS";

/// Default upper bound on waiting for the engine to honour a halt
pub const DEFAULT_HALT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default interval between running-state checks while halting
pub const DEFAULT_HALT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Directory circuit files are staged into before `source`
    pub work_dir: PathBuf,
    /// Maximum vector names per `save` instruction (None = one instruction).
    ///
    /// ngspice is known to drop very long save lists without an error; the
    /// exact limit has never been measured, so this stays opt-in.
    pub save_chunk_size: Option<usize>,
    /// Upper bound on waiting for a halt during teardown
    pub halt_timeout: Duration,
    /// Interval between running-state checks during teardown
    pub halt_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            save_chunk_size: None,
            halt_timeout: DEFAULT_HALT_TIMEOUT,
            halt_poll_interval: DEFAULT_HALT_POLL_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `SIMSERVER_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var(ENV_WORK_DIR) {
            if !dir.trim().is_empty() {
                config.work_dir = PathBuf::from(dir.trim());
            }
        }
        if let Some(n) = parse_env::<usize>(ENV_SAVE_CHUNK) {
            config.save_chunk_size = (n > 0).then_some(n);
        }
        if let Some(ms) = parse_env::<u64>(ENV_HALT_TIMEOUT_MS) {
            config.halt_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(ENV_HALT_POLL_MS) {
            config.halt_poll_interval = Duration::from_millis(ms.max(1));
        }

        config
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_save_chunk_size(mut self, size: Option<usize>) -> Self {
        self.save_chunk_size = size.filter(|n| *n > 0);
        self
    }

    pub fn with_halt_timeout(mut self, timeout: Duration) -> Self {
        self.halt_timeout = timeout;
        self
    }

    pub fn with_halt_poll_interval(mut self, interval: Duration) -> Self {
        self.halt_poll_interval = interval;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            None
        }
    }
}
