//! MQTT Transport
//!
//! Publishes payloads to the broker returned by broker discovery, at QoS 2
//! so events survive transient disconnects. The connection's event loop
//! runs as a scheduler service task and reconnects with jittered back-off.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rumqttc::{AsyncClient, ConnectReturnCode, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::{Transport, TransportContext};
use crate::constants::TOPIC_LANGUAGE;
use crate::error::{AgentError, AgentResult};
use crate::identity::Identity;
use crate::scheduler::TaskHandle;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Topic for events of `identity`
pub fn event_topic(identity: &Identity) -> String {
    format!(
        "{}/events/{}/{}",
        TOPIC_LANGUAGE, identity.organization, identity.client_id
    )
}

/// Exponential back-off with up to one second of jitter
fn backoff_delay(failures: u32) -> Duration {
    let base = Duration::from_secs(1u64 << failures.min(6)).min(MAX_BACKOFF);
    let jitter = rand::thread_rng().gen_range(0..1000);
    base + Duration::from_millis(jitter)
}

pub struct MqttTransport {
    client: Option<AsyncClient>,
    topic: String,
    running: Arc<AtomicBool>,
    service: Mutex<Option<(TaskHandle, oneshot::Receiver<()>)>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            topic: String::new(),
            running: Arc::new(AtomicBool::new(false)),
            service: Mutex::new(None),
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll until the broker acknowledges the session
async fn await_connack(eventloop: &mut EventLoop) -> AgentResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(rumqttc::Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(AgentError::SinkUnavailable(format!(
                    "broker refused connection: {:?}",
                    ack.code
                )));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(AgentError::SinkUnavailable(format!("broker connection failed: {}", e)));
            }
        }
    }
}

/// Drive the connection until the transport stops
async fn run_event_loop(mut eventloop: EventLoop, running: Arc<AtomicBool>, done: oneshot::Sender<()>) {
    let mut failures = 0u32;

    while running.load(Ordering::SeqCst) {
        match eventloop.poll().await {
            Ok(rumqttc::Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                if failures > 0 {
                    log::info!("Reconnected to MQTT broker");
                }
                failures = 0;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                failures = failures.saturating_add(1);
                let delay = backoff_delay(failures);
                log::warn!("MQTT connection error: {} (retrying in {:?})", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }

    let _ = done.send(());
    log::debug!("MQTT event loop stopped");
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn start(&mut self, ctx: &TransportContext) -> AgentResult<()> {
        let broker = ctx
            .api
            .fetch_broker()
            .await
            .map_err(|e| AgentError::SinkUnavailable(format!("broker discovery failed: {}", e)))?;

        log::info!(
            "Connecting to MQTT broker {}:{} (tls={})",
            broker.host,
            broker.port,
            broker.use_tls()
        );

        let mut options = MqttOptions::new(
            ctx.identity.installation_id.clone(),
            broker.host.clone(),
            broker.port,
        );
        options.set_credentials(ctx.identity.client_id.clone(), ctx.identity.client_secret.clone());
        options.set_keep_alive(KEEP_ALIVE);
        if broker.use_tls() {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(CONNECT_TIMEOUT, await_connack(&mut eventloop))
            .await
            .map_err(|_| AgentError::SinkUnavailable("timed out waiting for broker".to_string()))??;

        self.running.store(true, Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();
        let handle = ctx.scheduler.spawn_service(
            "mqtt-event-loop",
            run_event_loop(eventloop, Arc::clone(&self.running), done_tx),
        )?;

        *self.service.lock() = Some((handle, done_rx));
        self.topic = event_topic(&ctx.identity);
        self.client = Some(client);

        log::info!("MQTT connected; publishing to {}", self.topic);
        Ok(())
    }

    async fn deliver(&self, payload: &[u8]) -> AgentResult<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AgentError::SinkUnavailable("MQTT transport is not started".to_string()))?;

        client
            .publish(self.topic.as_str(), QoS::ExactlyOnce, false, payload.to_vec())
            .await
            .map_err(|e| AgentError::Transport(format!("publish failed: {}", e)))
    }

    async fn shutdown(&self) {
        let Some(client) = self.client.as_ref() else {
            return;
        };

        if let Err(e) = client.disconnect().await {
            log::debug!("MQTT disconnect request failed: {}", e);
        }

        let service = self.service.lock().take();
        if let Some((handle, done)) = service {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, done).await.is_err() {
                log::debug!("MQTT event loop did not stop in time; cancelling");
            }
            self.running.store(false, Ordering::SeqCst);
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_is_namespaced_by_identity() {
        let identity = Identity {
            organization: "acme".to_string(),
            client_id: "client-7".to_string(),
            installation_id: "install".to_string(),
            client_secret: "secret".to_string(),
        };
        assert_eq!(event_topic(&identity), "rust/events/acme/client-7");
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        assert!(backoff_delay(1) >= Duration::from_secs(2));
        assert!(backoff_delay(1) < Duration::from_secs(3));
        assert!(backoff_delay(20) <= MAX_BACKOFF + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deliver_before_start_fails() {
        let transport = MqttTransport::new();
        let result = transport.deliver(b"payload").await;
        assert!(matches!(result, Err(AgentError::SinkUnavailable(_))));
        transport.shutdown().await;
    }
}
