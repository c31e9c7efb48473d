#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::{Duration, Instant};
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[cfg(feature = "cli")]
const MB: u64 = 1024 * 1024;

/// One sample taken between pipeline stages.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default)]
pub struct ResourceSample {
    pub own_memory_mb: u64,
    /// docker, skopeo, trivy or singularity children still alive at sample time.
    pub tool_memory_mb: u64,
    pub tool_processes: usize,
    pub cpu_usage: f32,
    pub host_available_mb: u64,
    pub elapsed: Duration,
}

/// Samples this process, its tool children and host memory.
///
/// Image builds spend most of their memory outside of this process, so the
/// children and the host's free memory are logged next to our own footprint.
#[cfg(feature = "cli")]
pub struct SystemMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    started: Instant,
    peak_mb: Mutex<u64>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let mut system = System::new();
        if enabled {
            system.refresh_memory();
            system.refresh_processes(ProcessesToUpdate::All, true);
        }

        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
            started: Instant::now(),
            peak_mb: Mutex::new(0),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample(&self) -> Option<ResourceSample> {
        if !self.enabled {
            return None;
        }
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let own = system.process(pid)?;
        let children: Vec<_> = system
            .processes()
            .values()
            .filter(|p| p.parent() == Some(pid))
            .collect();

        let sample = ResourceSample {
            own_memory_mb: own.memory() / MB,
            tool_memory_mb: children.iter().map(|p| p.memory()).sum::<u64>() / MB,
            tool_processes: children.len(),
            cpu_usage: own.cpu_usage(),
            host_available_mb: system.available_memory() / MB,
            elapsed: self.started.elapsed(),
        };

        let mut peak = self.peak_mb.lock().ok()?;
        *peak = (*peak).max(sample.own_memory_mb + sample.tool_memory_mb);
        Some(sample)
    }

    pub fn peak_mb(&self) -> u64 {
        self.peak_mb.lock().map(|p| *p).unwrap_or(0)
    }

    pub fn log_stats(&self, stage: &str) {
        let Some(s) = self.sample() else {
            return;
        };
        tracing::info!(
            "📊 {}: cpu {:.1}%, imagenie {}MB, tools {}MB in {} process(es), host free {}MB, {:?} elapsed",
            stage,
            s.cpu_usage,
            s.own_memory_mb,
            s.tool_memory_mb,
            s.tool_processes,
            s.host_available_mb,
            s.elapsed
        );
    }

    pub fn log_final_stats(&self) {
        if self.enabled {
            tracing::info!(
                "📊 Run took {:?}, peak memory incl. tools {}MB",
                self.started.elapsed(),
                self.peak_mb()
            );
        }
    }
}

#[cfg(feature = "cli")]
impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// No-op stand-in when built without `sysinfo`.
#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct SystemMonitor;

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn is_enabled(&self) -> bool {
        false
    }

    pub fn log_stats(&self, _stage: &str) {}

    pub fn log_final_stats(&self) {}
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_monitor_samples_nothing() {
        let monitor = SystemMonitor::new(false);
        assert!(!monitor.is_enabled());
        assert!(monitor.sample().is_none());
        assert_eq!(monitor.peak_mb(), 0);
    }

    #[test]
    fn test_peak_covers_latest_sample() {
        let monitor = SystemMonitor::new(true);
        if let Some(sample) = monitor.sample() {
            assert!(monitor.peak_mb() >= sample.own_memory_mb);
        }
    }
}
