//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults and the
//! environment variables that override them.

use std::time::Duration;

/// Default remote API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.faultline.io";

/// Echoes the caller's public IP address as plain text
pub const PUBLIC_IP_URL: &str = "https://checkip.amazonaws.com";

/// Default number of scheduler worker threads
pub const DEFAULT_WORKER_THREADS: usize = 3;

/// Default grace period for in-flight tasks at shutdown (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 3;

/// Name of the per-user config subdirectory
pub const CONFIG_SUBDIR: &str = ".faultline";

/// Agent version
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Language segment of the broker topic
pub const TOPIC_LANGUAGE: &str = "rust";

// ============================================
// Persisted file names
// ============================================

pub const IDENTITY_FILE: &str = "device.json";
pub const USAGE_FILE: &str = "usage.json";
pub const LIMITS_FILE: &str = "limits.json";

// ============================================
// Scheduling cadences
// ============================================

/// How often the monthly reset check runs
pub const RESET_CHECK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the policy refresh counter ticks
pub const REFRESH_TICK_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Number of refresh ticks between two policy fetches
pub const REFRESH_TICKS_PER_FETCH: u32 = 24;

/// HTTP timeout for remote API calls
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================
// Environment variables
// ============================================

pub const ENV_APP_ID: &str = "FAULTLINE_APP_ID";
pub const ENV_API_KEY: &str = "FAULTLINE_API_KEY";
pub const ENV_BASE_URL: &str = "FAULTLINE_BASE_URL";
pub const ENV_CONFIG_DIR: &str = "FAULTLINE_CONFIG_DIR";
pub const ENV_AUTO_SHUTDOWN: &str = "FAULTLINE_AUTO_SHUTDOWN";
pub const ENV_PANIC_HOOK: &str = "FAULTLINE_PANIC_HOOK";
pub const ENV_THREADS: &str = "FAULTLINE_THREADS";
pub const ENV_SERIAL_PORT: &str = "FAULTLINE_SERIAL_PORT";
pub const ENV_TRANSPORT: &str = "FAULTLINE_TRANSPORT";
pub const ENV_SHUTDOWN_GRACE: &str = "FAULTLINE_SHUTDOWN_GRACE_SECS";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Read a non-empty string from the environment
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read a boolean flag from the environment ("false"/"0" disable it)
pub fn env_flag(name: &str) -> Option<bool> {
    env_string(name).map(|s| s.to_lowercase() != "false" && s != "0")
}

/// Read a number from the environment
pub fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse().ok())
}
