use crate::Collector;
use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use telemon_common::types::Metric;

/// Per-core utilization, reported as `CPUutilization1..=N`.
///
/// Usage is measured between two refreshes, so the first refresh happens at
/// construction and [`Collector::settle_time`] reports how much of the
/// minimum window is left.
pub struct CpuCollector {
    system: System,
    last_refresh: Instant,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system,
            last_refresh: Instant::now(),
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn settle_time(&self) -> Duration {
        MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(self.last_refresh.elapsed())
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_cpu_usage();
        self.last_refresh = Instant::now();

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            bail!("no CPU statistics reported by the host");
        }

        Ok(cpus
            .iter()
            .enumerate()
            .map(|(i, cpu)| Metric::gauge(format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64))
            .collect())
    }
}
