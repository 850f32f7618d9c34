//! Event payload encoding
//!
//! Events travel as a MessagePack map with named keys.

use serde::Serialize;

use crate::constants::AGENT_VERSION;
use crate::error::AgentResult;
use crate::event::{Event, StackFrame};
use crate::metrics::MetricsSource;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventPayload<'a> {
    stack_trace: &'a [StackFrame],
    timestamp: i64,
    exc_type: &'a str,
    id: String,
    device: &'a str,
    public_ip: &'a str,
    agent_version: &'a str,
    memory_usage: f64,
    cpu_usage: f64,
}

/// Pack `event` for delivery from installation `device` at `public_ip`
pub fn encode(event: &Event, device: &str, public_ip: &str, metrics: &dyn MetricsSource) -> AgentResult<Vec<u8>> {
    let payload = EventPayload {
        stack_trace: event.frames(),
        timestamp: event.timestamp_ms(),
        exc_type: event.exc_type(),
        id: uuid::Uuid::new_v4().to_string(),
        device,
        public_ip,
        agent_version: AGENT_VERSION,
        memory_usage: metrics.memory_usage(),
        cpu_usage: metrics.cpu_usage(),
    };

    Ok(rmp_serde::to_vec_named(&payload)?)
}
