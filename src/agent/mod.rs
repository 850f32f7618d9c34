//! Agent
//!
//! The process-wide orchestrator. It owns the device identity, the data
//! usage monitor, the sink and the scheduler, and is reachable only
//! through the entry functions in `lifecycle`.

pub mod hooks;
pub mod lifecycle;

#[cfg(test)]
mod tests;

pub use lifecycle::{init, is_running, send, send_error, shutdown, InitHandle};

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{Collaborators, Settings};
use crate::error::{AgentError, AgentResult};
use crate::event::Event;
use crate::identity::DeviceIdentity;
use crate::metrics::{MetricsSource, SysinfoMetrics};
use crate::remote::{HttpApi, RemoteApi};
use crate::scheduler::Scheduler;
use crate::sink::{select_transport, Sink};
use crate::storage::PersistentStore;
use crate::usage::DataUsageMonitor;

// ============================================================================
// SINGLE INSTANCE GUARD
// ============================================================================

static LIVE_INSTANCE: AtomicBool = AtomicBool::new(false);

/// Held by the one live `Agent`; released when it is dropped
struct InstanceGuard;

impl InstanceGuard {
    fn acquire() -> AgentResult<Self> {
        LIVE_INSTANCE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| InstanceGuard)
            .map_err(|_| AgentError::AlreadyInitialized)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        LIVE_INSTANCE.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// AGENT
// ============================================================================

pub struct Agent {
    settings: Arc<Settings>,
    store: PersistentStore,
    scheduler: Arc<Scheduler>,
    api: Arc<dyn RemoteApi>,
    identity: Arc<DeviceIdentity>,
    monitor: Arc<DataUsageMonitor>,
    sink: Arc<Sink>,
    public_ip: OnceCell<String>,
    _instance: InstanceGuard,
}

impl Agent {
    /// Build the components; fails if another agent is alive
    pub(crate) fn new(
        settings: Arc<Settings>,
        collaborators: Collaborators,
        scheduler: Arc<Scheduler>,
        store: PersistentStore,
    ) -> AgentResult<Self> {
        let instance = InstanceGuard::acquire()?;

        let api: Arc<dyn RemoteApi> = match collaborators.remote_api {
            Some(api) => api,
            None => Arc::new(HttpApi::new(&settings.base_url, &settings.api_key)?),
        };
        let transport = match collaborators.transport {
            Some(transport) => transport,
            None => select_transport(&settings)?,
        };
        let metrics: Arc<dyn MetricsSource> = collaborators
            .metrics
            .unwrap_or_else(|| Arc::new(SysinfoMetrics::new()));

        Ok(Self {
            identity: Arc::new(DeviceIdentity::new()),
            monitor: Arc::new(DataUsageMonitor::new(store.clone())),
            sink: Arc::new(Sink::new(transport, metrics)),
            settings,
            store,
            scheduler,
            api,
            public_ip: OnceCell::new(),
            _instance: instance,
        })
    }

    /// Start identity, usage monitor and sink, in that order
    pub(crate) async fn start(&self) -> AgentResult<()> {
        self.lookup_public_ip().await;
        self.identity.start(self).await?;
        self.monitor.start(self).await?;
        self.sink.start(self).await?;
        Ok(())
    }

    /// Best effort; an unknown address is kept as an empty string
    async fn lookup_public_ip(&self) {
        let ip = match self.api.lookup_public_ip().await {
            Ok(ip) => {
                log::debug!("Public IP address: {}", ip);
                ip
            }
            Err(e) => {
                log::warn!("Could not determine public IP address: {}", e);
                String::new()
            }
        };
        let _ = self.public_ip.set(ip);
    }

    /// Public IP found at startup, empty if unknown
    pub fn public_ip(&self) -> &str {
        self.public_ip.get().map(String::as_str).unwrap_or("")
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn remote_api(&self) -> Arc<dyn RemoteApi> {
        Arc::clone(&self.api)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn monitor(&self) -> Arc<DataUsageMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn sink(&self) -> Arc<Sink> {
        Arc::clone(&self.sink)
    }

    /// Queue delivery of `event`; its stack is symbolized on a worker
    pub(crate) fn dispatch(&self, mut event: Event) -> AgentResult<()> {
        let sink = Arc::clone(&self.sink);
        self.scheduler.schedule_once("send-event", Duration::ZERO, async move {
            if !event.is_resolved() {
                event = tokio::task::spawn_blocking(move || {
                    event.resolve();
                    event
                })
                .await
                .map_err(|e| AgentError::Serialization(format!("stack resolution stopped: {}", e)))?;
            }
            sink.send(&event).await
        })?;
        Ok(())
    }

    /// Close the sink and drain the scheduler; join the handle to wait
    pub(crate) fn stop(&self) -> Option<JoinHandle<()>> {
        let sink = Arc::clone(&self.sink);
        self.scheduler
            .shutdown(self.settings.shutdown_grace, async move { sink.shutdown().await })
    }
}
