use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use sysinfo::{MemoryRefreshKind, Pid, RefreshKind, System};

/// Source of process and host memory figures.
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    fn current_bytes(&self) -> u64;
    fn peak_bytes(&self) -> u64;
    /// `None` when the host does not expose a figure; callers treat that as unbounded.
    fn available_bytes(&self) -> Option<u64>;
}

/// Host and process memory read through `sysinfo`.
///
/// `sysinfo` has no high-water mark, so the peak is the largest resident size
/// this probe has observed.
#[derive(Debug)]
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    peak: AtomicU64,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        let refresh = RefreshKind::new().with_memory(MemoryRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh)),
            pid: sysinfo::get_current_pid().ok(),
            peak: AtomicU64::new(0),
        }
    }

    fn system(&self) -> std::sync::MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn current_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };

        let mut system = self.system();
        if !system.refresh_process(pid) {
            return 0;
        }
        let resident = system.process(pid).map(|p| p.memory()).unwrap_or(0);
        self.peak.fetch_max(resident, Ordering::Relaxed);
        resident
    }

    fn peak_bytes(&self) -> u64 {
        let current = self.current_bytes();
        self.peak.load(Ordering::Relaxed).max(current)
    }

    fn available_bytes(&self) -> Option<u64> {
        let mut system = self.system();
        system.refresh_memory();
        match system.available_memory() {
            0 => None,
            available => Some(available),
        }
    }
}

/// Fixed figures for deterministic runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMemoryProbe {
    pub current: u64,
    pub peak: u64,
    pub available: Option<u64>,
}

impl StaticMemoryProbe {
    pub fn with_available(available: u64) -> Self {
        Self {
            current: 0,
            peak: 0,
            available: Some(available),
        }
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn current_bytes(&self) -> u64 {
        self.current
    }

    fn peak_bytes(&self) -> u64 {
        self.peak
    }

    fn available_bytes(&self) -> Option<u64> {
        self.available
    }
}

pub fn megabytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_probe_reports_this_process() {
        let probe = SystemMemoryProbe::new();

        let current = probe.current_bytes();
        assert!(current > 0);
        assert!(probe.peak_bytes() >= current);
        assert!(probe.available_bytes().is_some_and(|available| available > 0));
    }

    #[test]
    fn test_peak_never_decreases() {
        let probe = SystemMemoryProbe::new();
        let first = probe.peak_bytes();
        let _ballast = vec![1u8; 8 * 1024 * 1024];
        assert!(probe.peak_bytes() >= first);
    }

    #[test]
    fn test_megabytes() {
        assert_eq!(megabytes(512), 512 * 1024 * 1024);
        assert_eq!(megabytes(u64::MAX), u64::MAX);
    }
}
