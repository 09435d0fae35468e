//! Worker configuration.

use std::path::PathBuf;

use mghost_media::EngineConfig;

/// Default location of the key ledger.
pub const DEFAULT_LEDGER_PATH: &str = "data/records.json";

/// Fragment length used for ledger-backed embeds when none is given.
pub const DEFAULT_USER_FRAGMENT_SECS: f64 = 2.0;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Engine settings passed to the orchestrators
    pub engine: EngineConfig,
    /// JSON file backing the key ledger
    pub ledger_path: PathBuf,
    /// Fragment length for ledger-backed embeds
    pub user_fragment_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            user_fragment_secs: DEFAULT_USER_FRAGMENT_SECS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            ledger_path: std::env::var("MGHOST_LEDGER")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LEDGER_PATH)),
            user_fragment_secs: std::env::var("MGHOST_USER_FRAGMENT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &f64| *secs > 0.0)
                .unwrap_or(DEFAULT_USER_FRAGMENT_SECS),
        }
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }
}
