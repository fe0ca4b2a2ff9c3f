//! Run-time configuration for a profiling session.

use std::time::Duration;

/// Environment variable gating the profiler. `"0"` disables it.
pub const ENABLE_ENV_VAR: &str = "CYCLESCOPE";

/// Environment variable overriding the calibration spin, in milliseconds.
pub const CALIBRATION_ENV_VAR: &str = "CYCLESCOPE_CALIBRATION_MS";

pub const DEFAULT_NAME_MAX_LEN: usize = 18;
pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_CALIBRATION_WAIT: Duration = Duration::from_millis(50);

/// Whether profiling calls do any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Re-read [`ENABLE_ENV_VAR`] on every call.
    FromEnv,
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        match self {
            Switch::On => true,
            Switch::Off => false,
            Switch::FromEnv => std::env::var(ENABLE_ENV_VAR).map_or(true, |v| v != "0"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub switch: Switch,
    /// Names longer than this many bytes are truncated.
    pub name_max_len: usize,
    /// Maximum number of distinct anchors per session.
    pub capacity: usize,
    pub calibration_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            switch: Switch::On,
            name_max_len: DEFAULT_NAME_MAX_LEN,
            capacity: DEFAULT_CAPACITY,
            calibration_wait: DEFAULT_CALIBRATION_WAIT,
        }
    }
}

impl Config {
    /// Defaults, gated by [`ENABLE_ENV_VAR`], with the calibration spin
    /// taken from [`CALIBRATION_ENV_VAR`] when it parses.
    pub fn from_env() -> Self {
        let calibration_wait = match std::env::var(CALIBRATION_ENV_VAR) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring unparsable {CALIBRATION_ENV_VAR}");
                    DEFAULT_CALIBRATION_WAIT
                }
            },
            Err(_) => DEFAULT_CALIBRATION_WAIT,
        };
        Self {
            switch: Switch::FromEnv,
            calibration_wait,
            ..Self::default()
        }
    }

    pub fn with_switch(mut self, switch: Switch) -> Self {
        self.switch = switch;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_name_max_len(mut self, len: usize) -> Self {
        self.name_max_len = len;
        self
    }

    pub fn with_calibration_wait(mut self, wait: Duration) -> Self {
        self.calibration_wait = wait;
        self
    }
}
