//! Host metrics attached to every event

use parking_lot::Mutex;
use sysinfo::System;

/// Source of memory and CPU usage (both in percent)
pub trait MetricsSource: Send + Sync {
    fn memory_usage(&self) -> f64;

    fn cpu_usage(&self) -> f64;
}

/// `sysinfo`-backed metrics
pub struct SysinfoMetrics {
    system: Mutex<System>,
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta, so take the first sample now
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoMetrics {
    fn memory_usage(&self) -> f64 {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        sys.used_memory() as f64 / total as f64 * 100.0
    }

    fn cpu_usage(&self) -> f64 {
        let mut sys = self.system.lock();
        sys.refresh_cpu();

        let cpus = sys.cpus();
        cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len().max(1) as f64
    }
}

/// Reports zeros; for hosts where sampling is unwanted
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSource for NullMetrics {
    fn memory_usage(&self) -> f64 {
        0.0
    }

    fn cpu_usage(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_percentages_in_range() {
        let metrics = SysinfoMetrics::new();
        let memory = metrics.memory_usage();
        let cpu = metrics.cpu_usage();

        assert!((0.0..=100.0).contains(&memory));
        assert!(cpu >= 0.0);
    }
}
