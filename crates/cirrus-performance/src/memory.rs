//! Memory sources

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Source of the process memory figure used in telemetry
pub trait MemorySource: Send + Sync {
    /// Resident memory in bytes
    fn memory_bytes(&self) -> u64;
}

/// Reads the current process's resident memory through `sysinfo`
pub struct SysinfoMemory {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SysinfoMemory {
    fn memory_bytes(&self) -> u64 {
        let mut system = self.system.lock();

        if let Some(pid) = self.pid {
            if system.refresh_process(pid) {
                if let Some(process) = system.process(pid) {
                    return process.memory();
                }
            }
        }

        // Fall back to system-wide usage
        system.refresh_memory();
        system.used_memory()
    }
}

/// Reports a settable constant; for tests and simulations
#[derive(Debug, Default)]
pub struct FixedMemory {
    bytes: AtomicU64,
}

impl FixedMemory {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
        }
    }

    pub fn from_mb(megabytes: u64) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::Relaxed);
    }
}

impl MemorySource for FixedMemory {
    fn memory_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_reports_memory() {
        let memory = SysinfoMemory::new();
        assert!(memory.memory_bytes() > 0);
    }

    #[test]
    fn test_fixed_memory_is_settable() {
        let memory = FixedMemory::from_mb(3);
        assert_eq!(memory.memory_bytes(), 3 * 1024 * 1024);

        memory.set(42);
        assert_eq!(memory.memory_bytes(), 42);
    }
}
