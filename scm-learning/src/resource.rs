//! Optional memory telemetry for the training step.

use sysinfo::System;

/// Free and total bytes of the device the model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryInfo {
    /// Used memory in GiB.
    pub fn used_gib(&self) -> f64 {
        self.total_bytes.saturating_sub(self.free_bytes) as f64 / (1024.0_f64.powi(3))
    }
}

/// Source of memory readings. `None` means no reading is available right now.
pub trait ResourceSampler: Send + Sync {
    fn memory_info(&mut self) -> Option<MemoryInfo>;
}

/// Host memory through `sysinfo`; available memory counts as free.
pub struct HostMemorySampler {
    system: System,
}

impl Default for HostMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ResourceSampler for HostMemorySampler {
    fn memory_info(&mut self) -> Option<MemoryInfo> {
        self.system.refresh_memory();
        let total_bytes = self.system.total_memory();
        if total_bytes == 0 {
            tracing::debug!("memory info unavailable on this host");
            return None;
        }
        Some(MemoryInfo {
            free_bytes: self.system.available_memory(),
            total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_gib() {
        let info = MemoryInfo {
            free_bytes: 1024 * 1024 * 1024,
            total_bytes: 3 * 1024 * 1024 * 1024,
        };
        assert_eq!(info.used_gib(), 2.0);
    }

    #[test]
    fn test_free_above_total_saturates() {
        let info = MemoryInfo {
            free_bytes: 10,
            total_bytes: 5,
        };
        assert_eq!(info.used_gib(), 0.0);
    }

    #[test]
    fn test_host_sampler_reads_consistent_values() {
        let mut sampler = HostMemorySampler::new();
        // Hosts without memory support yield no reading instead of an error.
        if let Some(info) = sampler.memory_info() {
            assert!(info.total_bytes > 0);
            assert!(info.free_bytes <= info.total_bytes);
            assert!(info.used_gib() >= 0.0);
        }
    }

    #[test]
    fn test_sampler_refreshes_on_each_call() {
        let mut sampler = HostMemorySampler::new();
        let first = sampler.memory_info().map(|i| i.total_bytes);
        let second = sampler.memory_info().map(|i| i.total_bytes);
        assert_eq!(first, second);
    }
}
