use crate::core::ComputeUnit;
use crate::mem::MemoryController;
use crate::sync::Arc;
use crate::workload::{Workload, WorkloadKind};
use console::style;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Metrics recorded for one completed workload.
///
/// Compute unit counters are cumulative at recording time, so a later
/// workload's record includes the cycles and instructions of the ones before
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadMetrics {
    pub workload_name: String,
    pub kind: WorkloadKind,
    pub execution_time_ms: f64,
    pub instructions_executed: u64,
    pub memory_operations: u64,
    pub cycles_executed: u64,
    pub average_cu_utilization: f64,
    pub total_threads: u64,
    pub total_blocks: u64,
    /// Instructions per millisecond of wall time.
    pub throughput: f64,
}

/// Device-wide totals, recorded when a simulation closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub total_cycles: u64,
    pub total_instructions: u64,
    pub total_memory_ops: u64,
    pub total_execution_time_ms: f64,
    pub average_utilization: f64,
    pub total_workloads_executed: usize,
}

/// Collects per-workload and device-wide metrics over one simulation.
#[derive(Debug, Clone, Default)]
pub struct PerformanceAnalyzer {
    workload_metrics: Vec<WorkloadMetrics>,
    device_metrics: DeviceMetrics,
    sim_start: Option<Instant>,
    sim_end: Option<Instant>,
}

impl PerformanceAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_simulation(&mut self) {
        self.sim_start = Some(Instant::now());
    }

    pub fn end_simulation(&mut self) {
        self.sim_end = Some(Instant::now());
        self.device_metrics.total_execution_time_ms = self.total_simulation_time_ms();
    }

    /// Wall time between simulation start and end in milliseconds.
    #[must_use]
    pub fn total_simulation_time_ms(&self) -> f64 {
        match (self.sim_start, self.sim_end) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64() * 1e3,
            _ => 0.0,
        }
    }

    /// Record a workload against the current compute unit counters.
    pub fn record_workload(
        &mut self,
        workload: &Workload,
        compute_units: &[Arc<ComputeUnit>],
        mem_controller: &MemoryController,
    ) {
        let mut instructions = 0;
        let mut cycles = 0;
        let mut utilization = 0.0;
        for cu in compute_units {
            instructions += cu.instructions_executed();
            cycles += cu.cycles_executed();
            utilization += cu.utilization();
        }
        let num_units = compute_units.len().max(1) as f64;

        let execution_time_ms = workload.execution_time_ms();
        let throughput = if execution_time_ms > 0.0 {
            instructions as f64 / execution_time_ms
        } else {
            0.0
        };

        self.workload_metrics.push(WorkloadMetrics {
            workload_name: workload.name().to_string(),
            kind: workload.kind(),
            execution_time_ms,
            instructions_executed: instructions,
            memory_operations: mem_controller.total_memory_ops(),
            cycles_executed: cycles,
            average_cu_utilization: utilization / num_units,
            total_threads: workload.config().total_threads(),
            total_blocks: workload.config().total_blocks(),
            throughput,
        });
    }

    /// Record device-wide totals from the compute unit counters.
    pub fn record_device_metrics(
        &mut self,
        compute_units: &[Arc<ComputeUnit>],
        mem_controller: &MemoryController,
    ) {
        let mut cycles = 0;
        let mut instructions = 0;
        let mut utilization = 0.0;
        for cu in compute_units {
            cycles += cu.cycles_executed();
            instructions += cu.instructions_executed();
            utilization += cu.utilization();
        }

        self.device_metrics.total_cycles = cycles;
        self.device_metrics.total_instructions = instructions;
        self.device_metrics.average_utilization = utilization / compute_units.len().max(1) as f64;
        self.device_metrics.total_memory_ops = mem_controller.total_memory_ops();
        self.device_metrics.total_workloads_executed = self.workload_metrics.len();
    }

    #[must_use]
    pub fn workload_metrics(&self) -> &[WorkloadMetrics] {
        &self.workload_metrics
    }

    #[must_use]
    pub fn device_metrics(&self) -> &DeviceMetrics {
        &self.device_metrics
    }

    /// Mean throughput over all recorded workloads.
    #[must_use]
    pub fn average_throughput(&self) -> f64 {
        if self.workload_metrics.is_empty() {
            return 0.0;
        }
        let total: f64 = self.workload_metrics.iter().map(|m| m.throughput).sum();
        total / self.workload_metrics.len() as f64
    }

    /// Mean execution time over all recorded workloads.
    #[must_use]
    pub fn average_workload_time_ms(&self) -> f64 {
        if self.workload_metrics.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .workload_metrics
            .iter()
            .map(|m| m.execution_time_ms)
            .sum();
        total / self.workload_metrics.len() as f64
    }

    #[must_use]
    pub fn fastest_workload(&self) -> Option<&WorkloadMetrics> {
        self.workload_metrics
            .iter()
            .min_by(|a, b| a.execution_time_ms.total_cmp(&b.execution_time_ms))
    }

    #[must_use]
    pub fn slowest_workload(&self) -> Option<&WorkloadMetrics> {
        self.workload_metrics
            .iter()
            .max_by(|a, b| a.execution_time_ms.total_cmp(&b.execution_time_ms))
    }

    pub fn print_summary(&self) {
        println!();
        println!("{}", style("========================================").bold());
        println!("{}", style("      PERFORMANCE SUMMARY").bold());
        println!("{}", style("========================================").bold());
        println!();
        println!(
            "Total Simulation Time: {:.2} ms",
            self.device_metrics.total_execution_time_ms
        );
        println!(
            "Workloads Executed: {}",
            self.device_metrics.total_workloads_executed
        );
        println!("Total Instructions: {}", self.device_metrics.total_instructions);
        println!(
            "Total Memory Operations: {}",
            self.device_metrics.total_memory_ops
        );
        println!(
            "Average Device Utilization: {:.2}%",
            self.device_metrics.average_utilization
        );
        println!(
            "Average Throughput: {:.2} instr/ms",
            self.average_throughput()
        );
        println!();
    }

    pub fn print_detailed_report(&self) {
        self.print_summary();

        println!("{}", style("WORKLOAD DETAILS:").bold());
        println!("----------------------------------------");
        for metrics in &self.workload_metrics {
            println!();
            println!("Workload: {}", metrics.workload_name);
            println!("  Execution Time: {:.2} ms", metrics.execution_time_ms);
            println!("  Instructions: {}", metrics.instructions_executed);
            println!("  Memory Ops: {}", metrics.memory_operations);
            println!("  Threads: {}", metrics.total_threads);
            println!("  Blocks: {}", metrics.total_blocks);
            println!(
                "  Avg CU Utilization: {:.2}%",
                metrics.average_cu_utilization
            );
            println!("  Throughput: {:.2} instr/ms", metrics.throughput);
        }
        println!();
    }

    /// Write one row per recorded workload.
    ///
    /// Failure to open or write the target is logged, not propagated.
    pub fn export_to_csv(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match self.write_csv(path) {
            Ok(()) => log::info!("metrics exported to {}", path.display()),
            Err(err) => log::error!("failed to export {}: {err}", path.display()),
        }
    }

    fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(
            file,
            "Workload,Type,Execution_Time_ms,Instructions,Memory_Ops,Threads,Blocks,Utilization_%,Throughput_instr_ms"
        )?;
        for metrics in &self.workload_metrics {
            let row = [
                metrics.workload_name.clone(),
                (metrics.kind as u8).to_string(),
                metrics.execution_time_ms.to_string(),
                metrics.instructions_executed.to_string(),
                metrics.memory_operations.to_string(),
                metrics.total_threads.to_string(),
                metrics.total_blocks.to_string(),
                metrics.average_cu_utilization.to_string(),
                metrics.throughput.to_string(),
            ];
            writeln!(file, "{}", row.iter().join(","))?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.workload_metrics.clear();
        self.device_metrics = DeviceMetrics::default();
        self.sim_start = None;
        self.sim_end = None;
    }
}

/// Side-by-side comparison of analyzer snapshots, keyed by scheduler name.
#[derive(Debug, Default)]
pub struct SchedulerComparison {
    analyzers: BTreeMap<String, PerformanceAnalyzer>,
}

impl SchedulerComparison {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_analyzer(&mut self, scheduler_name: impl Into<String>, analyzer: PerformanceAnalyzer) {
        self.analyzers.insert(scheduler_name.into(), analyzer);
    }

    /// The scheduler with the smallest positive total execution time, or
    /// `None` when nothing has been recorded.
    #[must_use]
    pub fn best_scheduler(&self) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for (name, analyzer) in &self.analyzers {
            let time = analyzer.device_metrics().total_execution_time_ms;
            if time <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, best_time)| time < best_time) {
                best = Some((name, time));
            }
        }
        best.map(|(name, _)| name)
    }

    pub fn print_comparison(&self) {
        println!();
        println!("{}", style("========================================").bold());
        println!("{}", style("   SCHEDULER COMPARISON").bold());
        println!("{}", style("========================================").bold());
        println!();
        println!(
            "{:<20}{:<15}{:<15}{:<15}",
            "Scheduler", "Total Time(ms)", "Avg Util(%)", "Throughput"
        );
        println!("----------------------------------------");
        for (name, analyzer) in &self.analyzers {
            let metrics = analyzer.device_metrics();
            println!(
                "{:<20}{:<15.2}{:<15.2}{:<15.2}",
                name,
                metrics.total_execution_time_ms,
                metrics.average_utilization,
                analyzer.average_throughput()
            );
        }
        println!();
        println!(
            "Best Scheduler: {}",
            self.best_scheduler().unwrap_or("None")
        );
        println!();
    }

    /// Write one row per compared scheduler.
    ///
    /// Failure to open or write the target is logged, not propagated.
    pub fn export_comparison_csv(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match self.write_csv(path) {
            Ok(()) => log::info!("comparison exported to {}", path.display()),
            Err(err) => log::error!("failed to export {}: {err}", path.display()),
        }
    }

    fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(
            file,
            "Scheduler,Total_Time_ms,Avg_Utilization_%,Avg_Throughput,Total_Instructions,Total_Memory_Ops"
        )?;
        for (name, analyzer) in &self.analyzers {
            let metrics = analyzer.device_metrics();
            let row = [
                name.clone(),
                metrics.total_execution_time_ms.to_string(),
                metrics.average_utilization.to_string(),
                analyzer.average_throughput().to_string(),
                metrics.total_instructions.to_string(),
                metrics.total_memory_ops.to_string(),
            ];
            writeln!(file, "{}", row.iter().join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GPUConfig;
    use crate::device::Device;
    use crate::workload::Workload;
    use std::time::Duration;

    fn timed_analyzer(busy: Duration) -> PerformanceAnalyzer {
        let mut analyzer = PerformanceAnalyzer::new();
        analyzer.start_simulation();
        std::thread::sleep(busy);
        analyzer.end_simulation();
        analyzer.record_device_metrics(&[], &MemoryController::default());
        analyzer
    }

    #[test]
    fn empty_analyzer_averages_are_zero() {
        let analyzer = PerformanceAnalyzer::new();
        assert_eq!(analyzer.average_throughput(), 0.0);
        assert_eq!(analyzer.average_workload_time_ms(), 0.0);
        assert!(analyzer.fastest_workload().is_none());
        assert!(analyzer.slowest_workload().is_none());
        assert_eq!(analyzer.total_simulation_time_ms(), 0.0);
    }

    #[test]
    fn simulation_time_is_recorded() {
        let analyzer = timed_analyzer(Duration::from_millis(5));
        assert!(analyzer.total_simulation_time_ms() >= 5.0);
        assert_eq!(
            analyzer.device_metrics().total_execution_time_ms,
            analyzer.total_simulation_time_ms()
        );
    }

    #[test]
    fn best_scheduler_picks_smallest_positive_time() {
        let mut comparison = SchedulerComparison::new();
        assert_eq!(comparison.best_scheduler(), None);

        comparison.add_analyzer("Slow", timed_analyzer(Duration::from_millis(30)));
        comparison.add_analyzer("Fast", timed_analyzer(Duration::from_millis(2)));
        comparison.add_analyzer("Idle", PerformanceAnalyzer::new());

        assert_eq!(comparison.best_scheduler(), Some("Fast"));
    }

    #[test]
    fn reset_clears_records() {
        let mut analyzer = timed_analyzer(Duration::from_millis(1));
        assert!(analyzer.device_metrics().total_execution_time_ms > 0.0);
        analyzer.reset();
        assert_eq!(analyzer.device_metrics(), &DeviceMetrics::default());
        assert!(analyzer.workload_metrics().is_empty());
    }

    #[test]
    fn csv_round_trip() {
        let device = Device::new(GPUConfig {
            num_compute_units: 2,
            ..GPUConfig::default()
        });
        device.submit_workload(Workload::vector_add(1 << 12));
        device.execute_workloads();
        device.wait_for_completion();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workloads.csv");

        let analyzer = device.performance_analyzer().lock();
        analyzer.export_to_csv(&path);

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Workload,Type,Execution_Time_ms,Instructions,Memory_Ops,Threads,Blocks,Utilization_%,Throughput_instr_ms"
        );

        let recorded = &analyzer.workload_metrics()[0];
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(row[0], recorded.workload_name);
        assert_eq!(row[1], "2"); // VectorAdd ordinal
        assert_eq!(
            row[2].parse::<f64>().unwrap(),
            recorded.execution_time_ms
        );
        assert_eq!(
            row[3].parse::<u64>().unwrap(),
            recorded.instructions_executed
        );
        assert_eq!(row[4].parse::<u64>().unwrap(), recorded.memory_operations);
        assert_eq!(row[5].parse::<u64>().unwrap(), recorded.total_threads);
        assert_eq!(row[6].parse::<u64>().unwrap(), recorded.total_blocks);
        assert_eq!(
            row[8].parse::<f64>().unwrap(),
            recorded.throughput
        );
    }

    #[test]
    fn comparison_csv_has_one_row_per_scheduler() {
        let mut comparison = SchedulerComparison::new();
        comparison.add_analyzer("FIFO", timed_analyzer(Duration::from_millis(1)));
        comparison.add_analyzer("Priority", timed_analyzer(Duration::from_millis(1)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comparison.csv");
        comparison.export_comparison_csv(&path);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines[0],
            "Scheduler,Total_Time_ms,Avg_Utilization_%,Avg_Throughput,Total_Instructions,Total_Memory_Ops"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("FIFO,"));
        assert!(lines[2].starts_with("Priority,"));
    }

    #[test]
    fn export_failure_is_swallowed() {
        let analyzer = PerformanceAnalyzer::new();
        // directory path cannot be opened as a file; must not panic
        analyzer.export_to_csv(std::env::temp_dir());
    }
}
