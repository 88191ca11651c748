use crate::alloc;
use crate::store::POLL_COUNT;
use crate::Collector;
use anyhow::Result;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use telemon_common::types::Metric;

/// Gauges produced by every [`RuntimeCollector`] round, in emission order.
pub const RUNTIME_GAUGES: [&str; 17] = [
    "HeapAlloc",
    "PeakHeapAlloc",
    "TotalAlloc",
    "Mallocs",
    "Frees",
    "Reallocs",
    "HeapObjects",
    "ProcessRSS",
    "ProcessVirtual",
    "ProcessCPU",
    "ProcessDiskRead",
    "ProcessDiskWritten",
    "ProcessUptime",
    "RuntimeWorkers",
    "RuntimeAliveTasks",
    "RuntimeQueueDepth",
    "RandomValue",
];

/// Statistics about the agent process itself: heap counters from
/// [`alloc::CountingAllocator`], process usage from the OS and tokio
/// scheduler state. Each round also bumps the `PollCount` counter.
///
/// Values that cannot be read (allocator not installed, no tokio runtime,
/// process lookup failed) are reported as zero so the set of names never
/// changes.
pub struct RuntimeCollector {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeCollector {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot resolve own pid, process gauges will be zero");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    fn process_gauges(&mut self) -> [f64; 6] {
        let Some(pid) = self.pid else {
            return [0.0; 6];
        };
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        match self.system.process(pid) {
            Some(process) => {
                let disk = process.disk_usage();
                [
                    process.memory() as f64,
                    process.virtual_memory() as f64,
                    process.cpu_usage() as f64,
                    disk.total_read_bytes as f64,
                    disk.total_written_bytes as f64,
                    process.run_time() as f64,
                ]
            }
            None => [0.0; 6],
        }
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn scheduler_gauges() -> [f64; 3] {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let metrics = handle.metrics();
            [
                metrics.num_workers() as f64,
                metrics.num_alive_tasks() as f64,
                metrics.global_queue_depth() as f64,
            ]
        }
        Err(_) => [0.0; 3],
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let heap = alloc::stats();
        let process = self.process_gauges();
        let scheduler = scheduler_gauges();

        let values = [
            heap.heap_alloc as f64,
            heap.peak_heap_alloc as f64,
            heap.total_alloc as f64,
            heap.mallocs as f64,
            heap.frees as f64,
            heap.reallocs as f64,
            heap.heap_objects() as f64,
            process[0],
            process[1],
            process[2],
            process[3],
            process[4],
            process[5],
            scheduler[0],
            scheduler[1],
            scheduler[2],
            rand::random::<f64>(),
        ];

        let mut metrics: Vec<Metric> = RUNTIME_GAUGES
            .iter()
            .zip(values)
            .map(|(name, value)| Metric::gauge(*name, value))
            .collect();
        metrics.push(Metric::counter(POLL_COUNT, 1));

        Ok(metrics)
    }
}
