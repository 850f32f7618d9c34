//! Device Identity
//!
//! This module handles:
//! - Device fingerprint generation
//! - Encrypted identity storage
//! - Registration with the remote API on first run
//!
//! The identity is resolved once during init and is read-only afterwards.

pub mod fingerprint;
pub mod storage;

pub use storage::{Identity, IdentityStorage};

use once_cell::sync::OnceCell;

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};
use crate::remote::{RegisterDeviceRequest, RemoteApi};

/// Process-lifetime holder of the device identity
#[derive(Debug, Default)]
pub struct DeviceIdentity {
    identity: OnceCell<Identity>,
}

impl DeviceIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted identity, if one can be read
    pub fn load(storage: &IdentityStorage) -> Option<Identity> {
        let identity = storage.load()?;
        log::info!(
            "Identity loaded: organization={}, installation={}",
            identity.organization,
            identity.installation_id
        );
        Some(identity)
    }

    /// Register this device and persist the issued credential
    pub async fn register(
        api: &dyn RemoteApi,
        storage: &IdentityStorage,
        app_id: &str,
    ) -> AgentResult<Identity> {
        let request = RegisterDeviceRequest {
            mac_address_hash: fingerprint::device_fingerprint(),
            application: app_id.to_string(),
        };

        let credentials = api.register_device(&request).await.map_err(|e| match e {
            AgentError::RegistrationFailed(_) => e,
            other => AgentError::RegistrationFailed(other.to_string()),
        })?;
        let identity = Identity::from_credentials(credentials)?;

        storage
            .save(&identity)
            .map_err(|e| AgentError::RegistrationFailed(format!("could not persist identity: {}", e)))?;

        log::info!(
            "Device registered: organization={}, installation={}",
            identity.organization,
            identity.installation_id
        );
        Ok(identity)
    }

    /// Load or register; runs once per agent
    pub async fn start(&self, agent: &Agent) -> AgentResult<()> {
        if self.identity.get().is_some() {
            return Ok(());
        }

        let storage = IdentityStorage::new(agent.store().clone(), &agent.settings().app_id);
        let identity = match Self::load(&storage) {
            Some(identity) => identity,
            None => {
                if storage.exists() {
                    log::warn!("Discarding unreadable identity file and registering again");
                    if let Err(e) = storage.delete() {
                        log::warn!("Could not remove unreadable identity file: {}", e);
                    }
                }
                Self::register(agent.remote_api().as_ref(), &storage, &agent.settings().app_id).await?
            }
        };

        // A concurrent start would have produced an equivalent identity
        let _ = self.identity.set(identity);
        Ok(())
    }

    pub fn get(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// The identity, or `SinkUnavailable` if `start` has not completed
    pub fn require(&self) -> AgentResult<Identity> {
        self.get()
            .cloned()
            .ok_or_else(|| AgentError::SinkUnavailable("device identity is not available".to_string()))
    }
}
