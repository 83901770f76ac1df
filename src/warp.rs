use crate::config::{BlockId, Dim, ThreadId, WarpId, MAX_THREADS_PER_BLOCK};
use crate::mem::{RegisterFile, SharedMemory};
use crate::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    Arc,
};
use bitvec::{array::BitArray, BitArr};

/// Warp size.
///
/// Number of threads that advance in lockstep.
pub const WARP_SIZE: usize = 32;

/// Thread active mask.
///
/// Bitmask where a 1 at position i means that thread i participates in the
/// current instruction.
pub type ActiveMask = BitArr!(for WARP_SIZE, in u32);

/// Shared warp handle.
///
/// Every mutable field of [`Warp`] is an atomic, so the ready queue and the
/// owning block can share one allocation without a lock.
pub type Ref = Arc<Warp>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[repr(u8)]
pub enum ExecutionState {
    Idle = 0,
    Ready = 1,
    Running = 2,
    MemoryStalled = 3,
    Completed = 4,
}

impl ExecutionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::MemoryStalled,
            _ => Self::Completed,
        }
    }
}

/// Lock-free execution state cell.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    #[must_use]
    pub fn new(state: ExecutionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[must_use]
    pub fn load(&self) -> ExecutionState {
        ExecutionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ExecutionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A single lane of execution.
#[derive(Debug)]
pub struct Thread {
    thread_id: ThreadId,
    warp_id: WarpId,
    block_id: BlockId,
    state: AtomicState,
    registers: RegisterFile,
}

impl Thread {
    #[must_use]
    pub fn new(thread_id: ThreadId, warp_id: WarpId, block_id: BlockId) -> Self {
        Self {
            thread_id,
            warp_id,
            block_id,
            state: AtomicState::new(ExecutionState::Ready),
            registers: RegisterFile::new(thread_id),
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    #[must_use]
    pub fn warp_id(&self) -> WarpId {
        self.warp_id
    }

    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state);
    }

    #[must_use]
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }
}

/// A group of up to [`WARP_SIZE`] threads executing in lockstep.
///
/// The program counter and the instruction and stall counters only ever grow.
#[derive(Debug)]
pub struct Warp {
    warp_id: WarpId,
    block_id: BlockId,
    threads: Vec<Thread>,
    active_mask: ActiveMask,
    state: AtomicState,
    program_counter: AtomicU64,
    instructions_executed: AtomicU64,
    cycles_stalled: AtomicU64,
}

impl Warp {
    #[must_use]
    pub fn new(warp_id: WarpId, block_id: BlockId, num_threads: usize) -> Self {
        debug_assert!(num_threads >= 1 && num_threads <= WARP_SIZE);
        let threads = (0..num_threads)
            .map(|lane| {
                let thread_id = block_id * MAX_THREADS_PER_BLOCK as u32
                    + warp_id * WARP_SIZE as u32
                    + lane as u32;
                Thread::new(thread_id, warp_id, block_id)
            })
            .collect();

        let mut active_mask: ActiveMask = BitArray::ZERO;
        for lane in 0..num_threads {
            active_mask.set(lane, true);
        }

        Self {
            warp_id,
            block_id,
            threads,
            active_mask,
            state: AtomicState::new(ExecutionState::Ready),
            program_counter: AtomicU64::new(0),
            instructions_executed: AtomicU64::new(0),
            cycles_stalled: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn warp_id(&self) -> WarpId {
        self.warp_id
    }

    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    #[must_use]
    pub fn active_mask(&self) -> &ActiveMask {
        &self.active_mask
    }

    /// Number of threads participating in the current instruction.
    #[must_use]
    pub fn num_active_threads(&self) -> usize {
        self.active_mask.count_ones()
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state);
    }

    #[must_use]
    pub fn program_counter(&self) -> u64 {
        self.program_counter.load(Ordering::Relaxed)
    }

    pub fn increment_pc(&self) {
        self.program_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_instruction(&self) {
        self.instructions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall(&self) {
        self.cycles_stalled.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cycles_stalled(&self) -> u64 {
        self.cycles_stalled.load(Ordering::Relaxed)
    }
}

/// A collection of warps sharing one shared memory region and a grid slot.
///
/// Blocks move by value: out of their workload, into exactly one compute
/// unit. The completed flag is write-once.
#[derive(Debug)]
pub struct ThreadBlock {
    block_id: BlockId,
    warps: Vec<Ref>,
    shared_memory: SharedMemory,
    grid_position: Dim,
    completed: AtomicBool,
}

impl ThreadBlock {
    #[must_use]
    pub fn new(block_id: BlockId, num_threads: usize) -> Self {
        debug_assert!(num_threads <= MAX_THREADS_PER_BLOCK);
        let num_warps = num_threads.div_ceil(WARP_SIZE);
        let warps = (0..num_warps)
            .map(|warp_id| {
                // the last warp may be partial
                let threads_in_warp = WARP_SIZE.min(num_threads - warp_id * WARP_SIZE);
                Arc::new(Warp::new(warp_id as WarpId, block_id, threads_in_warp))
            })
            .collect();

        Self {
            block_id,
            warps,
            shared_memory: SharedMemory::new(block_id),
            grid_position: Dim::ZERO,
            completed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    #[must_use]
    pub fn num_warps(&self) -> usize {
        self.warps.len()
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.warps.iter().map(|warp| warp.num_threads()).sum()
    }

    #[must_use]
    pub fn warps(&self) -> &[Ref] {
        &self.warps
    }

    #[must_use]
    pub fn warp(&self, index: usize) -> Option<&Ref> {
        self.warps.get(index)
    }

    #[must_use]
    pub fn shared_memory(&self) -> &SharedMemory {
        &self.shared_memory
    }

    #[must_use]
    pub fn grid_position(&self) -> Dim {
        self.grid_position
    }

    pub fn set_grid_position(&mut self, x: u32, y: u32, z: u32) {
        self.grid_position = Dim::new(x, y, z);
    }

    /// A block is complete once every warp has retired.
    #[must_use]
    pub fn all_warps_completed(&self) -> bool {
        self.warps
            .iter()
            .all(|warp| warp.state() == ExecutionState::Completed)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_warp_mask() {
        let warp = Warp::new(0, 0, WARP_SIZE);
        assert_eq!(warp.num_threads(), WARP_SIZE);
        assert_eq!(warp.num_active_threads(), WARP_SIZE);
        assert_eq!(warp.state(), ExecutionState::Ready);
    }

    #[test]
    fn partial_warp_mask() {
        let warp = Warp::new(1, 3, 8);
        assert_eq!(warp.num_threads(), 8);
        assert_eq!(warp.num_active_threads(), 8);
        assert!(warp.num_active_threads() <= warp.num_threads());
    }

    #[test]
    fn warp_counters_grow() {
        let warp = Warp::new(0, 0, WARP_SIZE);
        for _ in 0..5 {
            warp.record_instruction();
            warp.increment_pc();
        }
        warp.record_stall();
        assert_eq!(warp.instructions_executed(), 5);
        assert_eq!(warp.program_counter(), 5);
        assert_eq!(warp.cycles_stalled(), 1);
    }

    #[test]
    fn thread_ids_follow_block_layout() {
        let block = ThreadBlock::new(2, 40);
        assert_eq!(block.num_warps(), 2);
        assert_eq!(block.num_threads(), 40);

        let first = &block.warps()[0].threads()[0];
        assert_eq!(first.thread_id(), 2 * MAX_THREADS_PER_BLOCK as u32);

        let second_warp = &block.warps()[1];
        assert_eq!(second_warp.num_threads(), 8);
        assert_eq!(second_warp.num_active_threads(), 8);
        assert_eq!(
            second_warp.threads()[0].thread_id(),
            2 * MAX_THREADS_PER_BLOCK as u32 + WARP_SIZE as u32
        );
    }

    #[test]
    fn block_completion_tracks_warps() {
        let block = ThreadBlock::new(0, 64);
        assert!(!block.all_warps_completed());
        assert!(!block.is_completed());

        for warp in block.warps() {
            warp.set_state(ExecutionState::Completed);
        }
        assert!(block.all_warps_completed());

        block.mark_completed();
        assert!(block.is_completed());
        // write-once, marking again keeps it set
        block.mark_completed();
        assert!(block.is_completed());
    }

    #[test]
    fn threads_own_registers() {
        let thread = Thread::new(10, 0, 0);
        thread.registers().write(5, 123).unwrap();
        assert_eq!(thread.registers().read(5), Ok(123));
        assert_eq!(thread.registers().owner(), 10);
    }
}
