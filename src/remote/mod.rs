//! Remote API
//!
//! This module handles:
//! - Device registration
//! - Usage limit policy fetches
//! - Broker discovery for the MQTT transport
//! - Direct event upload for the HTTPS transport
//! - Public IP lookup

pub mod client;

pub use client::HttpApi;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AgentResult;
use crate::usage::UsageLimitConfig;

/// Body of `POST /devices`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterDeviceRequest {
    pub mac_address_hash: String,
    pub application: String,
}

/// Response of `POST /devices`
#[derive(Clone, Deserialize)]
pub struct DeviceCredentials {
    pub organization: String,
    pub client_id: String,
    pub id: String,
    pub client_password: String,
}

impl std::fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("organization", &self.organization)
            .field("client_id", &self.client_id)
            .field("id", &self.id)
            .field("client_password", &"***")
            .finish()
    }
}

/// Response of `GET /devices/config`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerSettings {
    #[serde(rename = "brokers")]
    pub host: String,
    #[serde(deserialize_with = "port_from_string_or_number")]
    pub port: u16,
}

impl BrokerSettings {
    /// Plain TCP only on the standard unencrypted port
    pub fn use_tls(&self) -> bool {
        self.port != 1883
    }
}

fn port_from_string_or_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid port {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", s))),
        other => Err(serde::de::Error::custom(format!("invalid port {}", other))),
    }
}

/// Operations the agent needs from the remote API
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn register_device(&self, request: &RegisterDeviceRequest) -> AgentResult<DeviceCredentials>;

    async fn fetch_usage_limits(&self) -> AgentResult<UsageLimitConfig>;

    async fn fetch_broker(&self) -> AgentResult<BrokerSettings>;

    async fn post_event(&self, installation_id: &str, payload: &[u8]) -> AgentResult<()>;

    /// This host's public IP address as seen from the internet
    async fn lookup_public_ip(&self) -> AgentResult<String>;
}
