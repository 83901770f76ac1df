use crate::config::{CoreId, GPUConfig};
use crate::fifo::Fifo;
use crate::mem::MemoryController;
use crate::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use crate::warp::{self, AtomicState, ExecutionState, ThreadBlock};
use console::style;
use std::time::Duration;

/// Instructions executed against a warp per simulated cycle.
const INSTRUCTIONS_PER_CYCLE: usize = 8;

/// A warp retires once its cumulative instruction count reaches this.
const WARP_RETIRE_THRESHOLD: u64 = 1000;

/// Sleep interval of the drive loop when no warp is ready.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Ready queue local to one compute unit.
///
/// Holds handles to warps that can be picked next cycle; a warp currently
/// being executed is not in the queue. The queue has its own mutex,
/// independent of the compute unit lock.
#[derive(Debug)]
pub struct WarpScheduler {
    queue: Mutex<Fifo<warp::Ref>>,
}

impl WarpScheduler {
    #[must_use]
    pub fn new(max_warps: usize) -> Self {
        Self {
            queue: Mutex::new(Fifo::new(Some(max_warps))),
        }
    }

    /// Queue a warp for execution.
    ///
    /// Returns false when the queue is full or the warp is not ready.
    pub fn add_warp(&self, warp: warp::Ref) -> bool {
        let mut queue = self.queue.lock();
        if queue.full() {
            return false;
        }
        if warp.state() != ExecutionState::Ready {
            return false;
        }
        queue.enqueue(warp);
        true
    }

    #[must_use]
    pub fn next_warp(&self) -> Option<warp::Ref> {
        self.queue.lock().dequeue()
    }

    #[must_use]
    pub fn has_ready_warps(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }
}

/// One execution engine of the device.
///
/// Hosts a bounded set of resident thread blocks and cycles through their
/// ready warps. Counters are atomics; the resident block list is the only
/// state behind the unit lock.
#[derive(Debug)]
pub struct ComputeUnit {
    core_id: CoreId,
    max_warps_per_cu: usize,
    max_threads_per_cu: usize,
    max_blocks_per_cu: usize,

    active_blocks: Mutex<Vec<ThreadBlock>>,
    warp_scheduler: WarpScheduler,

    state: AtomicState,
    running: AtomicBool,

    cycles_executed: AtomicU64,
    instructions_executed: AtomicU64,
    warps_executed: AtomicU64,
    idle_cycles: AtomicU64,
    stall_cycles: AtomicU64,

    mem_controller: Arc<MemoryController>,
}

impl ComputeUnit {
    #[must_use]
    pub fn new(core_id: CoreId, mem_controller: Arc<MemoryController>, config: &GPUConfig) -> Self {
        Self {
            core_id,
            max_warps_per_cu: config.warps_per_cu,
            max_threads_per_cu: config.max_threads_per_cu(),
            max_blocks_per_cu: config.max_blocks_per_cu,
            active_blocks: Mutex::new(Vec::new()),
            warp_scheduler: WarpScheduler::new(config.warps_per_cu),
            state: AtomicState::new(ExecutionState::Idle),
            running: AtomicBool::new(false),
            cycles_executed: AtomicU64::new(0),
            instructions_executed: AtomicU64::new(0),
            warps_executed: AtomicU64::new(0),
            idle_cycles: AtomicU64::new(0),
            stall_cycles: AtomicU64::new(0),
            mem_controller,
        }
    }

    #[must_use]
    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    /// Advisory admission test.
    ///
    /// The answer can go stale as soon as the lock drops; `assign_block`
    /// repeats the test atomically.
    #[must_use]
    pub fn can_accept_block(&self, block: &ThreadBlock) -> bool {
        let blocks = self.active_blocks.lock();
        self.admission_ok(&blocks, block)
    }

    fn admission_ok(&self, resident: &[ThreadBlock], incoming: &ThreadBlock) -> bool {
        if resident.len() >= self.max_blocks_per_cu {
            return false;
        }
        let resident_warps: usize = resident.iter().map(ThreadBlock::num_warps).sum();
        resident_warps + incoming.num_warps() <= self.max_warps_per_cu
    }

    /// Take ownership of a block and queue its warps.
    ///
    /// The admission test is repeated under the unit lock; a rejected block
    /// is handed back to the caller untouched.
    pub fn assign_block(&self, block: ThreadBlock) -> Result<(), ThreadBlock> {
        let warps: Vec<warp::Ref> = block.warps().iter().map(Arc::clone).collect();
        {
            let mut blocks = self.active_blocks.lock();
            if !self.admission_ok(&blocks, &block) {
                return Err(block);
            }
            log::debug!(
                "{}",
                style(format!(
                    "cu {}: accepted block {} ({} warps, {} resident blocks)",
                    self.core_id,
                    block.block_id(),
                    block.num_warps(),
                    blocks.len() + 1,
                ))
                .cyan()
            );
            blocks.push(block);
            self.state.store(ExecutionState::Running);
        }

        // queue outside the unit lock; the queue has its own mutex
        for warp in warps {
            if !self.warp_scheduler.add_warp(warp) {
                log::debug!("cu {}: warp rejected by ready queue", self.core_id);
            }
        }
        Ok(())
    }

    /// Drop completed blocks and fall back to idle when none remain.
    pub fn remove_completed_blocks(&self) {
        let mut blocks = self.active_blocks.lock();
        blocks.retain(|block| !block.is_completed());
        if blocks.is_empty() {
            self.state.store(ExecutionState::Idle);
        }
    }

    /// Execute a batch of instructions against one warp.
    ///
    /// Every fifth step issues a memory operation; the first step of each
    /// batch additionally stalls the warp for `global latency / 10` cycles.
    fn execute_warp(&self, warp: &warp::Ref, num_instructions: usize) {
        warp.set_state(ExecutionState::Running);

        for step in 0..num_instructions {
            warp.record_instruction();
            warp.increment_pc();
            self.instructions_executed.fetch_add(1, Ordering::Relaxed);

            if step % 5 == 0 {
                self.mem_controller.record_memory_op();

                if step % 10 == 0 {
                    warp.set_state(ExecutionState::MemoryStalled);
                    warp.record_stall();
                    self.stall_cycles.fetch_add(1, Ordering::Relaxed);

                    let stall_cycles = self.mem_controller.global_memory().latency() / 10;
                    self.cycles_executed
                        .fetch_add(stall_cycles, Ordering::Relaxed);

                    warp.set_state(ExecutionState::Running);
                }
            }
        }

        warp.set_state(ExecutionState::Ready);
        self.warps_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance the unit by one cycle.
    pub fn simulate_cycle(&self) {
        self.cycles_executed.fetch_add(1, Ordering::Relaxed);

        let Some(warp) = self.warp_scheduler.next_warp() else {
            self.idle_cycles.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.execute_warp(&warp, INSTRUCTIONS_PER_CYCLE);

        if warp.instructions_executed() >= WARP_RETIRE_THRESHOLD {
            warp.set_state(ExecutionState::Completed);
            log::debug!(
                "cu {}: warp {} of block {} retired",
                self.core_id,
                warp.warp_id(),
                warp.block_id()
            );

            // sweep resident blocks whose warps have all retired
            let blocks = self.active_blocks.lock();
            for block in blocks.iter() {
                if block.all_warps_completed() {
                    block.mark_completed();
                }
            }
        } else {
            self.warp_scheduler.add_warp(warp);
        }
    }

    /// Drive loop. Spins while the unit is running, yielding briefly when
    /// there is nothing ready.
    pub fn run(&self) {
        self.arm();
        self.run_loop();
    }

    /// Mark the unit as running before its driver thread spawns, so a stop
    /// issued in the spawn window is not overwritten.
    pub(crate) fn arm(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn run_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            if self.active_block_count() > 0 && self.warp_scheduler.has_ready_warps() {
                self.simulate_cycle();
            } else {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
    }

    /// Cooperative cancel: the drive loop exits on its next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_block_count() == 0 && self.state() == ExecutionState::Idle
    }

    #[must_use]
    pub fn warp_scheduler(&self) -> &WarpScheduler {
        &self.warp_scheduler
    }

    #[must_use]
    pub fn active_block_count(&self) -> usize {
        self.active_blocks.lock().len()
    }

    #[must_use]
    pub fn active_warp_count(&self) -> usize {
        self.active_blocks
            .lock()
            .iter()
            .map(ThreadBlock::num_warps)
            .sum()
    }

    #[must_use]
    pub fn active_thread_count(&self) -> usize {
        self.active_blocks
            .lock()
            .iter()
            .map(ThreadBlock::num_threads)
            .sum()
    }

    #[must_use]
    pub fn max_blocks(&self) -> usize {
        self.max_blocks_per_cu
    }

    #[must_use]
    pub fn max_warps(&self) -> usize {
        self.max_warps_per_cu
    }

    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.max_threads_per_cu
    }

    #[must_use]
    pub fn cycles_executed(&self) -> u64 {
        self.cycles_executed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn warps_executed(&self) -> u64 {
        self.warps_executed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stall_cycles(&self) -> u64 {
        self.stall_cycles.load(Ordering::Relaxed)
    }

    /// Share of cycles spent with a warp executing, as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let total = self.cycles_executed();
        if total == 0 {
            return 0.0;
        }
        let active = total - self.idle_cycles();
        active as f64 / total as f64 * 100.0
    }

    pub fn reset_metrics(&self) {
        self.cycles_executed.store(0, Ordering::Relaxed);
        self.instructions_executed.store(0, Ordering::Relaxed);
        self.warps_executed.store(0, Ordering::Relaxed);
        self.idle_cycles.store(0, Ordering::Relaxed);
        self.stall_cycles.store(0, Ordering::Relaxed);
    }
}
