// src/resource.rs
// Process memory sampling and leak detection. A leak is reported, never
// acted on automatically; the supervisor decides what to do with it.

use crate::config::ResourceConfig;
use std::collections::VecDeque;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReport {
    pub current_bytes: u64,
    pub baseline_bytes: f64,
    pub recent_bytes: f64,
    pub suspected_leak: bool,
}

pub struct ResourceMonitor {
    cfg: ResourceConfig,
    system: System,
    pid: Pid,
    samples: VecDeque<u64>,
}

impl ResourceMonitor {
    pub fn new(cfg: ResourceConfig) -> Self {
        Self {
            cfg,
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            samples: VecDeque::new(),
        }
    }

    /// Read the process's resident memory and fold it into the windows.
    pub fn sample(&mut self) -> Option<MemoryReport> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]));
        let memory = self.system.process(self.pid)?.memory();
        Some(self.ingest(memory))
    }

    /// Window bookkeeping, separated from the OS read for testability.
    fn ingest(&mut self, memory: u64) -> MemoryReport {
        let capacity = self.cfg.baseline_window + self.cfg.recent_window;
        if self.samples.len() == capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(memory);

        let report = self.report(memory);
        if report.suspected_leak {
            warn!(
                current = memory,
                baseline = report.baseline_bytes,
                "memory growth beyond leak ratio"
            );
        }
        report
    }

    fn report(&self, current: u64) -> MemoryReport {
        let n = self.samples.len();
        let recent_len = self.cfg.recent_window.min(n);
        let baseline_len = n - recent_len;

        let baseline: f64 = if baseline_len == 0 {
            current as f64
        } else {
            self.samples
                .iter()
                .take(baseline_len)
                .map(|m| *m as f64)
                .sum::<f64>()
                / baseline_len as f64
        };
        let recent: f64 = self
            .samples
            .iter()
            .skip(baseline_len)
            .map(|m| *m as f64)
            .sum::<f64>()
            / recent_len.max(1) as f64;

        // A leak verdict needs a full recent window and a real baseline.
        let suspected_leak = baseline_len >= self.cfg.recent_window
            && recent_len == self.cfg.recent_window
            && recent > baseline * self.cfg.leak_ratio;

        MemoryReport {
            current_bytes: current,
            baseline_bytes: baseline,
            recent_bytes: recent,
            suspected_leak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> ResourceMonitor {
        ResourceMonitor::new(ResourceConfig {
            baseline_window: 20,
            recent_window: 5,
            leak_ratio: 1.2,
        })
    }

    #[test]
    fn test_flat_usage_is_clean() {
        let mut m = monitor();
        let mut last = None;
        for _ in 0..25 {
            last = Some(m.ingest(100_000_000));
        }
        let report = last.unwrap();
        assert!(!report.suspected_leak);
        assert_eq!(report.current_bytes, 100_000_000);
    }

    #[test]
    fn test_sustained_growth_flags_leak() {
        let mut m = monitor();
        for _ in 0..20 {
            m.ingest(100_000_000);
        }
        let mut report = None;
        for _ in 0..5 {
            report = Some(m.ingest(160_000_000));
        }
        assert!(report.unwrap().suspected_leak);
    }

    #[test]
    fn test_single_spike_does_not_flag() {
        let mut m = monitor();
        for _ in 0..20 {
            m.ingest(100_000_000);
        }
        m.ingest(160_000_000);
        let report = m.ingest(100_000_000);
        assert!(!report.suspected_leak);
    }

    #[test]
    fn test_no_verdict_before_windows_fill() {
        let mut m = monitor();
        let report = m.ingest(500_000_000);
        assert!(!report.suspected_leak);
    }

    #[test]
    fn test_live_sample_reads_own_process() {
        let mut m = monitor();
        let report = m.sample().expect("own process visible");
        assert!(report.current_bytes > 0);
    }
}
