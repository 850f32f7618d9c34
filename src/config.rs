//! Agent configuration
//!
//! `Config` is what the host hands to `init`. Every option left unset falls
//! back to its environment variable and then to the default in
//! `constants.rs`. `Config::resolve` validates the result into immutable
//! `Settings` plus the collaborators the agent will be built from.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::remote::RemoteApi;
use crate::constants::{self, env_flag, env_number, env_string};
use crate::error::{AgentError, AgentResult};
use crate::metrics::MetricsSource;
use crate::sink::Transport;
use crate::storage::PlatformPaths;

/// Which built-in transport delivers events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Reliable message queue (MQTT, QoS 2)
    Mqtt,
    /// Direct HTTPS POST to the remote API
    Https,
    /// Local serial port
    Serial,
}

impl TransportKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "mqtt" => Some(Self::Mqtt),
            "https" | "http" => Some(Self::Https),
            "serial" => Some(Self::Serial),
            _ => None,
        }
    }
}

/// Host-supplied agent options
#[derive(Default)]
pub struct Config {
    app_id: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    config_dir: Option<PathBuf>,
    auto_shutdown: Option<bool>,
    panic_hook: Option<bool>,
    worker_threads: Option<usize>,
    serial_port: Option<String>,
    transport_kind: Option<TransportKind>,
    shutdown_grace: Option<Duration>,

    remote_api: Option<Arc<dyn RemoteApi>>,
    transport: Option<Box<dyn Transport>>,
    metrics: Option<Arc<dyn MetricsSource>>,
    paths: Option<Arc<dyn PlatformPaths>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Shut the agent down automatically when the process exits
    pub fn auto_shutdown(mut self, enabled: bool) -> Self {
        self.auto_shutdown = Some(enabled);
        self
    }

    /// Report panics as events
    pub fn panic_hook(mut self, enabled: bool) -> Self {
        self.panic_hook = Some(enabled);
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Deliver events over this serial port instead of the network
    pub fn serial_port(mut self, port: impl Into<String>) -> Self {
        self.serial_port = Some(port.into());
        self
    }

    pub fn transport_kind(mut self, kind: TransportKind) -> Self {
        self.transport_kind = Some(kind);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Use an alternate remote API implementation
    pub fn remote_api(mut self, api: Arc<dyn RemoteApi>) -> Self {
        self.remote_api = Some(api);
        self
    }

    /// Use an alternate transport; overrides `transport_kind` and `serial_port`
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn platform_paths(mut self, paths: Arc<dyn PlatformPaths>) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Validate options and split them into settings and collaborators
    pub(crate) fn resolve(self) -> AgentResult<(Settings, Collaborators)> {
        let app_id = self
            .app_id
            .filter(|s| !s.trim().is_empty())
            .or_else(|| env_string(constants::ENV_APP_ID))
            .ok_or_else(|| AgentError::Configuration("app ID is missing or empty".to_string()))?;

        let api_key = self
            .api_key
            .filter(|s| !s.trim().is_empty())
            .or_else(|| env_string(constants::ENV_API_KEY))
            .ok_or_else(|| AgentError::Configuration("API key is missing or empty".to_string()))?;

        let base_url = self
            .base_url
            .or_else(|| env_string(constants::ENV_BASE_URL))
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| constants::DEFAULT_BASE_URL.to_string());

        let serial_port = self
            .serial_port
            .filter(|s| !s.trim().is_empty())
            .or_else(|| env_string(constants::ENV_SERIAL_PORT));

        let transport_kind = if serial_port.is_some() {
            TransportKind::Serial
        } else {
            match self.transport_kind {
                Some(kind) => kind,
                None => match env_string(constants::ENV_TRANSPORT) {
                    Some(value) => TransportKind::parse(&value).ok_or_else(|| {
                        AgentError::Configuration(format!("unknown transport '{}'", value))
                    })?,
                    None => TransportKind::Mqtt,
                },
            }
        };
        if transport_kind == TransportKind::Serial && serial_port.is_none() && self.transport.is_none() {
            return Err(AgentError::Configuration(
                "serial transport selected without a serial port".to_string(),
            ));
        }

        let worker_threads = self
            .worker_threads
            .or_else(|| env_number(constants::ENV_THREADS))
            .filter(|threads| *threads >= 1)
            .unwrap_or(constants::DEFAULT_WORKER_THREADS);

        let shutdown_grace = self
            .shutdown_grace
            .or_else(|| env_number(constants::ENV_SHUTDOWN_GRACE).map(Duration::from_secs))
            .unwrap_or(Duration::from_secs(constants::DEFAULT_SHUTDOWN_GRACE_SECS));

        let settings = Settings {
            app_id,
            api_key,
            base_url,
            config_dir: self
                .config_dir
                .or_else(|| env_string(constants::ENV_CONFIG_DIR).map(PathBuf::from)),
            auto_shutdown: self
                .auto_shutdown
                .or_else(|| env_flag(constants::ENV_AUTO_SHUTDOWN))
                .unwrap_or(true),
            panic_hook: self
                .panic_hook
                .or_else(|| env_flag(constants::ENV_PANIC_HOOK))
                .unwrap_or(true),
            worker_threads,
            serial_port,
            transport_kind,
            shutdown_grace,
        };

        let collaborators = Collaborators {
            remote_api: self.remote_api,
            transport: self.transport,
            metrics: self.metrics,
            paths: self.paths,
        };

        Ok((settings, collaborators))
    }
}

/// Validated, immutable agent settings
#[derive(Clone)]
pub struct Settings {
    pub app_id: String,
    pub api_key: String,
    pub base_url: String,
    pub config_dir: Option<PathBuf>,
    pub auto_shutdown: bool,
    pub panic_hook: bool,
    pub worker_threads: usize,
    pub serial_port: Option<String>,
    pub transport_kind: TransportKind,
    pub shutdown_grace: Duration,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("app_id", &self.app_id)
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("config_dir", &self.config_dir)
            .field("auto_shutdown", &self.auto_shutdown)
            .field("panic_hook", &self.panic_hook)
            .field("worker_threads", &self.worker_threads)
            .field("serial_port", &self.serial_port)
            .field("transport_kind", &self.transport_kind)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

/// Optional replacements for the built-in collaborators
#[derive(Default)]
pub(crate) struct Collaborators {
    pub remote_api: Option<Arc<dyn RemoteApi>>,
    pub transport: Option<Box<dyn Transport>>,
    pub metrics: Option<Arc<dyn MetricsSource>>,
    pub paths: Option<Arc<dyn PlatformPaths>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_app_id_is_rejected() {
        std::env::remove_var(constants::ENV_APP_ID);
        let result = Config::new().app_id("  ").api_key("K").resolve();
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_defaults_and_normalization() {
        let (settings, _) = Config::new()
            .app_id("A")
            .api_key("K")
            .base_url("https://example.test/")
            .worker_threads(0)
            .transport_kind(TransportKind::Https)
            .resolve()
            .unwrap();

        assert_eq!(settings.base_url, "https://example.test");
        assert_eq!(settings.worker_threads, constants::DEFAULT_WORKER_THREADS);
        assert_eq!(settings.transport_kind, TransportKind::Https);
        assert!(settings.auto_shutdown);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(3));
    }

    #[test]
    fn test_serial_port_selects_serial_transport() {
        let (settings, _) = Config::new()
            .app_id("A")
            .api_key("K")
            .transport_kind(TransportKind::Https)
            .serial_port("/dev/ttyUSB0")
            .resolve()
            .unwrap();

        assert_eq!(settings.transport_kind, TransportKind::Serial);
        assert_eq!(settings.serial_port.as_deref(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let (settings, _) = Config::new().app_id("A").api_key("secret-key").resolve().unwrap();
        assert!(!format!("{:?}", settings).contains("secret-key"));
    }
}
