//! Remote API Client
//!
//! HTTP client for the collector's REST API. Every request carries
//! `Authorization: JWT <api key>`.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};

use super::{BrokerSettings, DeviceCredentials, RegisterDeviceRequest, RemoteApi};
use crate::constants::{HTTP_TIMEOUT, PUBLIC_IP_URL};
use crate::error::{AgentError, AgentResult};
use crate::usage::UsageLimitConfig;

/// reqwest-backed `RemoteApi`
pub struct HttpApi {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: &str, api_key: &str) -> AgentResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(format!("faultline/{}", crate::constants::AGENT_VERSION))
            .build()
            .map_err(|e| AgentError::RemoteApi(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("JWT {}", self.api_key))
    }

    /// Turn a non-2xx response into an error carrying the body text
    async fn check(response: Response) -> AgentResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::RemoteApi(format!("server returned {}: {}", status, body.trim())))
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn register_device(&self, request: &RegisterDeviceRequest) -> AgentResult<DeviceCredentials> {
        log::info!("Registering device with {}", self.base_url);

        let response = self
            .authorized(self.http_client.post(self.url("/devices")))
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::RegistrationFailed(e.to_string()))?;

        let response = Self::check(response)
            .await
            .map_err(|e| AgentError::RegistrationFailed(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| AgentError::RegistrationFailed(format!("unparsable response: {}", e)))
    }

    async fn fetch_usage_limits(&self) -> AgentResult<UsageLimitConfig> {
        let response = self
            .authorized(self.http_client.get(self.url("/config/limits")))
            .send()
            .await?;

        let body: serde_json::Value = Self::check(response).await?.json().await?;
        UsageLimitConfig::from_json(&body)
    }

    async fn fetch_broker(&self) -> AgentResult<BrokerSettings> {
        let response = self
            .authorized(self.http_client.get(self.url("/devices/config")))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_event(&self, installation_id: &str, payload: &[u8]) -> AgentResult<()> {
        let url = self.url(&format!("/devices/{}/events", installation_id));

        let response = self
            .authorized(self.http_client.post(url))
            .header("Content-Type", "application/x-msgpack")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        Self::check(response)
            .await
            .map(|_| ())
            .map_err(|e| AgentError::Transport(e.to_string()))
    }

    async fn lookup_public_ip(&self) -> AgentResult<String> {
        let response = self.http_client.get(PUBLIC_IP_URL).send().await?;
        let body = Self::check(response).await?.text().await?;

        let ip = body.trim();
        if ip.is_empty() {
            return Err(AgentError::RemoteApi("empty public IP response".to_string()));
        }
        Ok(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let api = HttpApi::new("https://api.example.test/", "key").unwrap();
        assert_eq!(api.url("/devices"), "https://api.example.test/devices");
        assert_eq!(api.url("config/limits"), "https://api.example.test/config/limits");
    }
}
