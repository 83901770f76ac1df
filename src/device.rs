use crate::config::GPUConfig;
use crate::core::ComputeUnit;
use crate::mem::MemoryController;
use crate::metrics::PerformanceAnalyzer;
use crate::scheduler::WorkloadScheduler;
use crate::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use crate::workload::Workload;
use console::style;
use std::thread::JoinHandle;
use std::time::Duration;

/// Dispatcher poll interval while the pending bucket is empty, and while
/// waiting for resident blocks to drain.
const DISPATCH_POLL: Duration = Duration::from_millis(10);

/// Retry interval when no compute unit admits a block.
const ADMISSION_RETRY: Duration = Duration::from_millis(1);

/// Poll interval of `wait_for_completion`.
const COMPLETION_POLL: Duration = Duration::from_millis(100);

/// The simulated device.
///
/// Owns the compute unit array, the memory controller, the workload
/// scheduler, and the performance analyzer. `execute_workloads` spawns one
/// driver thread per compute unit plus a dispatcher thread; all of them are
/// bounded by the `running` flag and joined in `stop`.
#[derive(Debug)]
pub struct Device {
    config: GPUConfig,
    compute_units: Vec<Arc<ComputeUnit>>,
    mem_controller: Arc<MemoryController>,
    /// Scheduler installation slot. The outer mutex is held only to swap or
    /// clone the handle, never while calling into the scheduler itself.
    scheduler: Arc<Mutex<Arc<WorkloadScheduler>>>,
    analyzer: Arc<Mutex<PerformanceAnalyzer>>,
    running: Arc<AtomicBool>,
    simulation_active: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Device {
    #[must_use]
    pub fn new(config: GPUConfig) -> Self {
        let mem_controller = Arc::new(MemoryController::new(config.global_memory_size));
        let compute_units = (0..config.num_compute_units)
            .map(|id| {
                Arc::new(ComputeUnit::new(
                    id as u32,
                    Arc::clone(&mem_controller),
                    &config,
                ))
            })
            .collect();
        log::info!(
            "initialized {} compute units ({})",
            config.num_compute_units,
            config.device_name
        );

        Self {
            config,
            compute_units,
            mem_controller,
            scheduler: Arc::new(Mutex::new(Arc::new(WorkloadScheduler::default()))),
            analyzer: Arc::new(Mutex::new(PerformanceAnalyzer::default())),
            running: Arc::new(AtomicBool::new(false)),
            simulation_active: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GPUConfig {
        &self.config
    }

    #[must_use]
    pub fn num_compute_units(&self) -> usize {
        self.compute_units.len()
    }

    #[must_use]
    pub fn compute_units(&self) -> &[Arc<ComputeUnit>] {
        &self.compute_units
    }

    #[must_use]
    pub fn memory_controller(&self) -> &Arc<MemoryController> {
        &self.mem_controller
    }

    #[must_use]
    pub fn performance_analyzer(&self) -> &Arc<Mutex<PerformanceAnalyzer>> {
        &self.analyzer
    }

    /// Install a scheduler, replacing the current one.
    ///
    /// Call before submitting workloads; workloads queued on the previous
    /// scheduler are not migrated.
    pub fn set_scheduler(&self, scheduler: WorkloadScheduler) {
        *self.scheduler.lock() = Arc::new(scheduler);
    }

    /// Handle to the currently installed scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Arc<WorkloadScheduler> {
        Arc::clone(&self.scheduler.lock())
    }

    /// Materialize a workload into thread blocks and queue it.
    ///
    /// A workload whose grid holds no blocks is dropped without entering any
    /// scheduler bucket. Returns the shared handle; the device keeps its own
    /// reference until completion.
    pub fn submit_workload(&self, workload: Workload) -> Arc<Workload> {
        let workload = Arc::new(workload);
        if workload.config().total_blocks() == 0 {
            log::warn!("dropping workload {workload}: launch grid holds no blocks");
            return workload;
        }

        workload.generate_thread_blocks();
        self.scheduler().add_workload(Arc::clone(&workload));
        log::info!(
            "submitted workload {} ({} blocks, {} threads)",
            workload,
            workload.config().total_blocks(),
            workload.config().total_threads()
        );
        workload
    }

    /// Start executing queued workloads in the background.
    pub fn execute_workloads(&self) {
        if self.is_running() {
            log::warn!("device is already running");
            return;
        }
        self.start();
    }

    /// Spawn the compute unit drivers and the dispatcher.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.simulation_active.store(true, Ordering::Release);
        self.analyzer.lock().start_simulation();

        let mut threads = self.threads.lock();
        for cu in &self.compute_units {
            cu.arm();
            let cu = Arc::clone(cu);
            threads.push(std::thread::spawn(move || cu.run_loop()));
        }

        let dispatcher = Dispatcher {
            compute_units: self.compute_units.clone(),
            scheduler: Arc::clone(&self.scheduler),
            analyzer: Arc::clone(&self.analyzer),
            mem_controller: Arc::clone(&self.mem_controller),
            running: Arc::clone(&self.running),
        };
        threads.push(std::thread::spawn(move || dispatcher.run()));

        log::info!("device started with {} compute units", self.num_compute_units());
    }

    /// Block until the pending and running buckets are both empty, then stop.
    pub fn wait_for_completion(&self) {
        loop {
            let scheduler = self.scheduler();
            if scheduler.pending_count() == 0 && scheduler.running_count() == 0 {
                break;
            }
            std::thread::sleep(COMPLETION_POLL);
        }
        self.stop();
    }

    /// Cooperative shutdown: clear the running flag, stop every compute
    /// unit, join all background threads, and close out device metrics.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        for cu in &self.compute_units {
            cu.stop();
        }
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if let Err(err) = handle.join() {
                log::error!("worker thread panicked: {err:?}");
            }
        }

        if self.simulation_active.swap(false, Ordering::AcqRel) {
            let mut analyzer = self.analyzer.lock();
            analyzer.end_simulation();
            analyzer.record_device_metrics(&self.compute_units, &self.mem_controller);
        }
        log::info!("device stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total_active_blocks(&self) -> usize {
        self.compute_units
            .iter()
            .map(|cu| cu.active_block_count())
            .sum()
    }

    #[must_use]
    pub fn total_active_warps(&self) -> usize {
        self.compute_units
            .iter()
            .map(|cu| cu.active_warp_count())
            .sum()
    }

    /// Mean utilization over all compute units, as a percentage.
    #[must_use]
    pub fn average_utilization(&self) -> f64 {
        if self.compute_units.is_empty() {
            return 0.0;
        }
        let total: f64 = self.compute_units.iter().map(|cu| cu.utilization()).sum();
        total / self.compute_units.len() as f64
    }

    /// Stop and clear all collected metrics.
    pub fn reset(&self) {
        self.stop();
        for cu in &self.compute_units {
            cu.reset_metrics();
        }
        self.analyzer.lock().reset();
        log::info!("device reset");
    }

    pub fn print_device_info(&self) {
        println!();
        println!("{}", style("========================================").bold());
        println!("{}", style("  DEVICE INFORMATION").bold());
        println!("{}", style("========================================").bold());
        println!("Device Name: {}", self.config.device_name);
        println!("Compute Units: {}", self.config.num_compute_units);
        println!("Warps per CU: {}", self.config.warps_per_cu);
        println!("Threads per Warp: {}", self.config.threads_per_warp);
        println!("Max Blocks per CU: {}", self.config.max_blocks_per_cu);
        println!(
            "Global Memory: {} GB",
            self.config.global_memory_size / (1024 * 1024 * 1024)
        );
        println!(
            "Shared Memory per Block: {} KB",
            self.config.shared_memory_per_block / 1024
        );
        println!("{}", style("========================================").bold());
        println!();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background task that pulls workloads off the scheduler and feeds their
/// blocks to the compute units.
struct Dispatcher {
    compute_units: Vec<Arc<ComputeUnit>>,
    scheduler: Arc<Mutex<Arc<WorkloadScheduler>>>,
    analyzer: Arc<Mutex<PerformanceAnalyzer>>,
    mem_controller: Arc<MemoryController>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn run(self) {
        while self.running() {
            let scheduler = Arc::clone(&self.scheduler.lock());
            if !scheduler.has_pending() {
                std::thread::sleep(DISPATCH_POLL);
                continue;
            }

            let Some(workload) = scheduler.get_next_workload() else {
                continue;
            };

            log::info!("starting workload {workload}");
            workload.start();
            self.dispatch_blocks(&workload);
            self.wait_for_drain();

            workload.complete();
            scheduler.mark_completed(&workload);
            log::info!(
                "completed workload {} in {:.2} ms",
                workload,
                workload.execution_time_ms()
            );

            self.analyzer
                .lock()
                .record_workload(&workload, &self.compute_units, &self.mem_controller);
        }
    }

    /// Drain the workload's blocks onto the first compute unit that admits
    /// them, retrying after a short sleep when everything is full.
    fn dispatch_blocks(&self, workload: &Workload) {
        while workload.has_more_blocks() {
            let Some(mut block) = workload.next_block() else {
                break;
            };

            'assign: loop {
                if !self.running() {
                    // shutdown while blocks remain; drop the one in hand
                    return;
                }

                for cu in &self.compute_units {
                    if !cu.can_accept_block(&block) {
                        continue;
                    }
                    match cu.assign_block(block) {
                        Ok(()) => break 'assign,
                        // lost the admission race, try the next unit
                        Err(rejected) => block = rejected,
                    }
                }

                log::debug!(
                    "{}",
                    style(format!(
                        "no compute unit admits block {} of {}, retrying",
                        block.block_id(),
                        workload.name()
                    ))
                    .yellow()
                );
                std::thread::sleep(ADMISSION_RETRY);
                for cu in &self.compute_units {
                    cu.remove_completed_blocks();
                }
            }
        }
    }

    /// Busy-poll until every compute unit has drained its resident blocks.
    fn wait_for_drain(&self) {
        loop {
            for cu in &self.compute_units {
                cu.remove_completed_blocks();
            }
            if self.compute_units.iter().all(|cu| cu.is_idle()) {
                break;
            }
            if !self.running() {
                break;
            }
            std::thread::sleep(DISPATCH_POLL);
        }
    }
}
