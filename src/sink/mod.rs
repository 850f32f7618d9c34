//! Event Sink
//!
//! This module handles:
//! - Packing captured events into payloads
//! - Admission control through the data usage monitor
//! - Delivery over the configured transport (MQTT, HTTPS or serial)
//!
//! Delivery is best effort: failures are logged and the event dropped.

pub mod https;
pub mod mqtt;
pub mod payload;
pub mod serial;

pub use https::HttpsTransport;
pub use mqtt::MqttTransport;
pub use serial::SerialTransport;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::agent::Agent;
use crate::config::{Settings, TransportKind};
use crate::error::{AgentError, AgentResult};
use crate::event::Event;
use crate::identity::Identity;
use crate::metrics::MetricsSource;
use crate::remote::RemoteApi;
use crate::scheduler::Scheduler;
use crate::usage::DataUsageMonitor;

// ============================================================================
// TRANSPORT
// ============================================================================

/// What a transport may use while starting
pub struct TransportContext {
    pub identity: Identity,
    pub api: Arc<dyn RemoteApi>,
    pub scheduler: Arc<Scheduler>,
}

/// Moves payload bytes to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquire connections or devices; failure aborts agent init
    async fn start(&mut self, ctx: &TransportContext) -> AgentResult<()>;

    async fn deliver(&self, payload: &[u8]) -> AgentResult<()>;

    /// Release resources; called once
    async fn shutdown(&self);
}

/// Built-in transport for `settings`
pub fn select_transport(settings: &Settings) -> AgentResult<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match settings.transport_kind {
        TransportKind::Serial => {
            let port = settings.serial_port.clone().ok_or_else(|| {
                AgentError::Configuration("serial transport selected without a serial port".to_string())
            })?;
            Box::new(SerialTransport::new(port))
        }
        TransportKind::Https => Box::new(HttpsTransport::new()),
        TransportKind::Mqtt => Box::new(MqttTransport::new()),
    };

    log::info!("Selected {} transport", transport.name());
    Ok(transport)
}

// ============================================================================
// SINK
// ============================================================================

struct Started {
    identity: Identity,
    public_ip: String,
    monitor: Arc<DataUsageMonitor>,
}

pub struct Sink {
    transport: RwLock<Box<dyn Transport>>,
    name: &'static str,
    metrics: Arc<dyn MetricsSource>,
    started: OnceCell<Started>,
    closed: AtomicBool,
}

impl Sink {
    pub fn new(transport: Box<dyn Transport>, metrics: Arc<dyn MetricsSource>) -> Self {
        Self {
            name: transport.name(),
            transport: RwLock::new(transport),
            metrics,
            started: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Start the transport with the agent's identity
    pub async fn start(&self, agent: &Agent) -> AgentResult<()> {
        let ctx = TransportContext {
            identity: agent.identity().require()?,
            api: agent.remote_api(),
            scheduler: agent.scheduler(),
        };

        self.transport.write().await.start(&ctx).await.map_err(|e| match e {
            AgentError::SinkUnavailable(_) => e,
            other => AgentError::SinkUnavailable(other.to_string()),
        })?;

        let _ = self.started.set(Started {
            identity: ctx.identity,
            public_ip: agent.public_ip().to_string(),
            monitor: agent.monitor(),
        });

        log::info!("Sink started ({})", self.name);
        Ok(())
    }

    /// Pack and deliver `event`; its stack should already be resolved
    pub async fn send(&self, event: &Event) -> AgentResult<()> {
        let started = self.started()?;
        let payload = payload::encode(
            event,
            &started.identity.installation_id,
            &started.public_ip,
            self.metrics.as_ref(),
        )?;
        self.send_payload(&payload).await
    }

    /// Deliver an already packed payload, if the usage policy admits it
    pub async fn send_payload(&self, payload: &[u8]) -> AgentResult<()> {
        if self.is_closed() {
            log::debug!("Sink is closed; dropping event");
            return Ok(());
        }

        let monitor = &self.started()?.monitor;
        let size = payload.len() as i64;

        // Reserved before delivery so concurrent sends share one budget
        if !monitor.try_reserve(size) {
            log::info!("Data usage limit reached; dropping event of {} bytes", size);
            return Ok(());
        }

        match self.transport.read().await.deliver(payload).await {
            Ok(()) => log::debug!("Event delivered over {} ({} bytes)", self.name, size),
            Err(e) => {
                monitor.release(size);
                log::warn!("Event delivery over {} failed: {}", self.name, e);
            }
        }
        Ok(())
    }

    /// Close the transport; later calls do nothing
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.read().await.shutdown().await;
        log::info!("Sink stopped ({})", self.name);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn started(&self) -> AgentResult<&Started> {
        self.started
            .get()
            .ok_or_else(|| AgentError::SinkUnavailable("sink has not been started".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testing::FakeTransport;

    fn settings(kind: TransportKind, serial: Option<&str>) -> Settings {
        let mut config = Config::new().app_id("A").api_key("K").transport_kind(kind);
        if let Some(port) = serial {
            config = config.serial_port(port);
        }
        config.resolve().unwrap().0
    }

    #[test]
    fn test_transport_selection() {
        assert_eq!(select_transport(&settings(TransportKind::Mqtt, None)).unwrap().name(), "mqtt");
        assert_eq!(select_transport(&settings(TransportKind::Https, None)).unwrap().name(), "https");
        assert_eq!(
            select_transport(&settings(TransportKind::Https, Some("/dev/ttyS0"))).unwrap().name(),
            "serial"
        );
    }

    #[tokio::test]
    async fn test_send_before_start_is_unavailable() {
        let (transport, _log) = FakeTransport::new();
        let sink = Sink::new(Box::new(transport), Arc::new(crate::metrics::NullMetrics));

        let result = sink.send_payload(b"payload").await;
        assert!(matches!(result, Err(AgentError::SinkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (transport, log) = FakeTransport::new();
        let sink = Sink::new(Box::new(transport), Arc::new(crate::metrics::NullMetrics));

        sink.shutdown().await;
        sink.shutdown().await;
        assert_eq!(log.shutdowns(), 1);
        assert!(sink.is_closed());
    }
}
