//! Serial Transport
//!
//! Writes framed payloads to a local serial port:
//! `[len: u32 BE][payload][crc32: u32 BE]`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use super::{Transport, TransportContext};
use crate::error::{AgentError, AgentResult};

const BAUD_RATE: u32 = 9600;
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Frame a payload for the wire
pub fn frame(payload: &[u8]) -> AgentResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| AgentError::Serialization(format!("payload of {} bytes is too large", payload.len())))?;

    let mut framed = Vec::with_capacity(payload.len() + 8);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    framed.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    Ok(framed)
}

pub struct SerialTransport {
    port_name: String,
    port: SharedPort,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            port: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn start(&mut self, _ctx: &TransportContext) -> AgentResult<()> {
        let port = serialport::new(self.port_name.as_str(), BAUD_RATE)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| AgentError::SinkUnavailable(format!("cannot open {}: {}", self.port_name, e)))?;

        *self.port.lock() = Some(port);
        log::info!("Serial port {} opened at {} baud", self.port_name, BAUD_RATE);
        Ok(())
    }

    async fn deliver(&self, payload: &[u8]) -> AgentResult<()> {
        let framed = frame(payload)?;
        let port = Arc::clone(&self.port);

        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock();
            let port = guard
                .as_mut()
                .ok_or_else(|| AgentError::SinkUnavailable("serial port is closed".to_string()))?;
            port.write_all(&framed)
                .and_then(|_| port.flush())
                .map_err(|e| AgentError::Transport(format!("serial write failed: {}", e)))
        })
        .await
        .map_err(|e| AgentError::Transport(format!("serial writer stopped: {}", e)))?
    }

    async fn shutdown(&self) {
        if self.port.lock().take().is_some() {
            log::info!("Serial port {} closed", self.port_name);
        }
    }
}
