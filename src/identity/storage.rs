//! Identity Storage with AES-GCM Encryption
//!
//! Stores the device credential in the config directory:
//! - AES-256-GCM encryption, key derived from the app id
//! - Fresh random nonce on every save
//! - Unreadable or tampered files are treated as absent

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::IDENTITY_FILE;
use crate::error::{AgentError, AgentResult};
use crate::remote::DeviceCredentials;
use crate::storage::PersistentStore;

/// Key derivation prefix; combined with the app id so files are app-bound
const KEY_PREFIX: &str = "faultline-device-identity-v1:";

const FORMAT_VERSION: u32 = 1;

/// Device credential issued by the remote API
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub organization: String,
    pub client_id: String,
    pub installation_id: String,
    pub client_secret: String,
}

impl Identity {
    /// Build from a registration response; every field must be non-empty
    pub fn from_credentials(credentials: DeviceCredentials) -> AgentResult<Self> {
        let identity = Self {
            organization: credentials.organization,
            client_id: credentials.client_id,
            installation_id: credentials.id,
            client_secret: credentials.client_password,
        };

        if !identity.is_complete() {
            return Err(AgentError::RegistrationFailed(
                "response is missing one or more credential fields".to_string(),
            ));
        }
        Ok(identity)
    }

    pub fn is_complete(&self) -> bool {
        [
            &self.organization,
            &self.client_id,
            &self.installation_id,
            &self.client_secret,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("organization", &self.organization)
            .field("client_id", &self.client_id)
            .field("installation_id", &self.installation_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// On-disk format
#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    format_version: u32,
    nonce: String,
    data: String,
}

/// Identity storage manager
pub struct IdentityStorage {
    store: PersistentStore,
    key: [u8; 32],
}

impl IdentityStorage {
    pub fn new(store: PersistentStore, app_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_PREFIX.as_bytes());
        hasher.update(app_id.as_bytes());

        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());

        Self { store, key }
    }

    pub fn exists(&self) -> bool {
        self.store.exists(IDENTITY_FILE)
    }

    /// Load and decrypt; `None` if absent, unreadable or incomplete
    pub fn load(&self) -> Option<Identity> {
        let file: IdentityFile = self.store.load(IDENTITY_FILE)?;

        match self.decrypt(&file) {
            Ok(identity) if identity.is_complete() => Some(identity),
            Ok(_) => {
                log::warn!("Stored identity is incomplete; ignoring it");
                None
            }
            Err(e) => {
                log::warn!("Stored identity could not be read ({}); ignoring it", e);
                None
            }
        }
    }

    /// Encrypt and write
    pub fn save(&self, identity: &Identity) -> AgentResult<()> {
        let plaintext = serde_json::to_vec(identity)?;

        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| AgentError::Serialization("identity encryption failed".to_string()))?;

        let file = IdentityFile {
            format_version: FORMAT_VERSION,
            nonce: BASE64.encode(nonce),
            data: BASE64.encode(ciphertext),
        };
        self.store.save(IDENTITY_FILE, &file)?;

        log::info!("Identity saved: installation={}", identity.installation_id);
        Ok(())
    }

    pub fn delete(&self) -> AgentResult<()> {
        self.store.remove(IDENTITY_FILE)
    }

    fn cipher(&self) -> AgentResult<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| AgentError::Serialization(format!("invalid identity key: {}", e)))
    }

    fn decrypt(&self, file: &IdentityFile) -> AgentResult<Identity> {
        if file.format_version != FORMAT_VERSION {
            return Err(AgentError::Serialization(format!(
                "unsupported format version {}",
                file.format_version
            )));
        }

        let nonce = BASE64
            .decode(&file.nonce)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;
        if nonce.len() != 12 {
            return Err(AgentError::Serialization("bad nonce length".to_string()));
        }
        let data = BASE64
            .decode(&file.data)
            .map_err(|e| AgentError::Serialization(e.to_string()))?;

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(&nonce), data.as_ref())
            .map_err(|_| AgentError::Serialization("decryption failed".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}
