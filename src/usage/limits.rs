//! Usage limit policy
//!
//! Fetched from the remote API, replaced wholesale on every refresh and
//! cached on disk so a restart without network still has a policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AgentError, AgentResult};

/// Data usage policy for this device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLimitConfig {
    /// Bytes allowed per plan cycle; 0 means unlimited
    pub cellular_data_limit: u64,
    /// Day of month (1-31) on which the usage counter resets
    pub cellular_plan_reset_day: u32,
    /// Bytes of local storage the agent may use; 0 means unlimited
    pub storage_limit: u64,
    /// Seconds between metric emissions
    pub emission_period_secs: u64,
    /// Named feature switches
    pub features: BTreeMap<String, bool>,
}

impl Default for UsageLimitConfig {
    fn default() -> Self {
        Self {
            cellular_data_limit: 0,
            cellular_plan_reset_day: 1,
            storage_limit: 0,
            emission_period_secs: 0,
            features: BTreeMap::new(),
        }
    }
}

// Wire shape of `GET /config/limits`

#[derive(Debug, Deserialize)]
struct LimitsResponse {
    config: WireConfig,
}

#[derive(Debug, Deserialize)]
struct WireConfig {
    #[serde(default)]
    features: BTreeMap<String, Option<bool>>,
    #[serde(default)]
    emission_period: Option<u64>,
    #[serde(default)]
    storage: Option<WireStorage>,
    #[serde(default)]
    data: Option<WireData>,
}

#[derive(Debug, Deserialize)]
struct WireStorage {
    #[serde(default)]
    storage_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireData {
    #[serde(default)]
    cellular_data_limit: Option<u64>,
    #[serde(default)]
    normalized_cell_plan_date: Option<u32>,
}

impl UsageLimitConfig {
    /// Parse the remote API document; null limits mean unlimited
    pub fn from_json(value: &serde_json::Value) -> AgentResult<Self> {
        let response: LimitsResponse = serde_json::from_value(value.clone())
            .map_err(|e| AgentError::RemoteApi(format!("invalid limits document: {}", e)))?;
        let config = response.config;

        let data = config.data.unwrap_or(WireData {
            cellular_data_limit: None,
            normalized_cell_plan_date: None,
        });

        Ok(Self {
            cellular_data_limit: data.cellular_data_limit.unwrap_or(0),
            cellular_plan_reset_day: normalize_reset_day(data.normalized_cell_plan_date),
            storage_limit: config.storage.and_then(|s| s.storage_limit).unwrap_or(0),
            emission_period_secs: config.emission_period.unwrap_or(0),
            features: config
                .features
                .into_iter()
                .map(|(name, enabled)| (name, enabled.unwrap_or(false)))
                .collect(),
        })
    }

    pub fn is_unlimited(&self) -> bool {
        self.cellular_data_limit == 0
    }

    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// Clamp a plan date into 1..=31 (absent or 0 becomes 1)
fn normalize_reset_day(day: Option<u32>) -> u32 {
    day.unwrap_or(1).clamp(1, 31)
}
