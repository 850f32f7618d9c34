//! Test doubles for the remote API and transports

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AgentError, AgentResult};
use crate::remote::{BrokerSettings, DeviceCredentials, RegisterDeviceRequest, RemoteApi};
use crate::sink::{Transport, TransportContext};
use crate::usage::UsageLimitConfig;

/// Serializes tests that use the process-wide agent
pub static AGENT_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

// ============================================================================
// FAKE REMOTE API
// ============================================================================

pub const FAKE_PUBLIC_IP: &str = "203.0.113.7";

pub struct FakeApi {
    limit: Mutex<u64>,
    fail_limits: AtomicBool,
    fail_registration: AtomicBool,
    fail_public_ip: AtomicBool,
    registrations: AtomicU32,
    limit_fetches: AtomicU32,
    posted: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeApi {
    /// API that serves a policy with `limit` bytes
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Mutex::new(limit),
            fail_limits: AtomicBool::new(false),
            fail_registration: AtomicBool::new(false),
            fail_public_ip: AtomicBool::new(false),
            registrations: AtomicU32::new(0),
            limit_fetches: AtomicU32::new(0),
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_limits(&self, fail: bool) {
        self.fail_limits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }

    pub fn fail_public_ip(&self, fail: bool) {
        self.fail_public_ip.store(fail, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn limit_fetches(&self) -> u32 {
        self.limit_fetches.load(Ordering::SeqCst)
    }

    pub fn posted(&self) -> Vec<(String, Vec<u8>)> {
        self.posted.lock().clone()
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn register_device(&self, _request: &RegisterDeviceRequest) -> AgentResult<DeviceCredentials> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(AgentError::RegistrationFailed("server returned 500".to_string()));
        }

        Ok(DeviceCredentials {
            organization: "org-1".to_string(),
            client_id: "client-1".to_string(),
            id: "install-1".to_string(),
            client_password: "secret-1".to_string(),
        })
    }

    async fn fetch_usage_limits(&self) -> AgentResult<UsageLimitConfig> {
        self.limit_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_limits.load(Ordering::SeqCst) {
            return Err(AgentError::RemoteApi("server unreachable".to_string()));
        }

        Ok(UsageLimitConfig {
            cellular_data_limit: *self.limit.lock(),
            ..UsageLimitConfig::default()
        })
    }

    async fn fetch_broker(&self) -> AgentResult<BrokerSettings> {
        Ok(BrokerSettings {
            host: "localhost".to_string(),
            port: 1883,
        })
    }

    async fn post_event(&self, installation_id: &str, payload: &[u8]) -> AgentResult<()> {
        self.posted.lock().push((installation_id.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn lookup_public_ip(&self) -> AgentResult<String> {
        if self.fail_public_ip.load(Ordering::SeqCst) {
            return Err(AgentError::RemoteApi("checkip unreachable".to_string()));
        }
        Ok(FAKE_PUBLIC_IP.to_string())
    }
}

// ============================================================================
// FAKE TRANSPORT
// ============================================================================

/// What a `FakeTransport` has seen; shared with the test
#[derive(Default)]
pub struct TransportLog {
    payloads: Mutex<Vec<Vec<u8>>>,
    starts: AtomicU32,
    shutdowns: AtomicU32,
}

impl TransportLog {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u32 {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

pub struct FakeTransport {
    log: Arc<TransportLog>,
    fail_start: bool,
    fail_deliver: bool,
    delay: Duration,
}

impl FakeTransport {
    pub fn new() -> (Self, Arc<TransportLog>) {
        let log = Arc::new(TransportLog::default());
        (
            Self {
                log: Arc::clone(&log),
                fail_start: false,
                fail_deliver: false,
                delay: Duration::ZERO,
            },
            log,
        )
    }

    /// Transport whose `start` always fails
    pub fn unavailable() -> (Self, Arc<TransportLog>) {
        let (mut transport, log) = Self::new();
        transport.fail_start = true;
        (transport, log)
    }

    /// Transport that takes `delay` for every delivery
    pub fn slow(delay: Duration) -> (Self, Arc<TransportLog>) {
        let (mut transport, log) = Self::new();
        transport.delay = delay;
        (transport, log)
    }

    /// Transport whose deliveries always fail
    pub fn failing() -> (Self, Arc<TransportLog>) {
        let (mut transport, log) = Self::new();
        transport.fail_deliver = true;
        (transport, log)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&mut self, _ctx: &TransportContext) -> AgentResult<()> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(AgentError::SinkUnavailable("fake transport refused".to_string()));
        }
        Ok(())
    }

    async fn deliver(&self, payload: &[u8]) -> AgentResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_deliver {
            return Err(AgentError::Transport("fake transport dropped the payload".to_string()));
        }
        self.log.payloads.lock().push(payload.to_vec());
        Ok(())
    }

    async fn shutdown(&self) {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
