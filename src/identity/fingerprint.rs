//! Device Fingerprint
//!
//! Stable, anonymous fingerprint for this machine, sent at registration so
//! the collector can recognise re-installs on the same device. Only the
//! SHA-256 digest ever leaves the process.

use sha2::{Digest, Sha256};

/// Raw machine identifiers
#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub hostname: String,
    pub machine_id: String,
}

impl MachineInfo {
    /// Hash the identifiers into a hex fingerprint
    pub fn fingerprint(&self) -> String {
        let combined = format!("{}|{}", self.hostname, self.machine_id);

        let mut hasher = Sha256::new();
        hasher.update(combined.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Collect identifiers from the running system
pub fn collect_machine_info() -> MachineInfo {
    MachineInfo {
        hostname: get_hostname(),
        machine_id: get_machine_id(),
    }
}

/// Fingerprint of this machine
pub fn device_fingerprint() -> String {
    let fingerprint = collect_machine_info().fingerprint();
    log::debug!("Device fingerprint: {}", short(&fingerprint));
    fingerprint
}

/// First and last 8 characters, for log lines
pub fn short(value: &str) -> String {
    if value.len() <= 16 || !value.is_ascii() {
        return "***".to_string();
    }
    format!("{}...{}", &value[..8], &value[value.len() - 8..])
}

fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "UNKNOWN_HOST".to_string())
}

/// OS machine id; falls back to a constant where the platform has none
fn get_machine_id() -> String {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "UNKNOWN_MACHINE".to_string())
}
