use crate::config::Dim;
use crate::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use crate::warp::ThreadBlock;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[repr(u8)]
pub enum WorkloadKind {
    MatrixMultiply = 0,
    Convolution = 1,
    VectorAdd = 2,
    Reduction = 3,
    Custom = 4,
}

/// Launch geometry of a kernel: blocks in the grid and threads per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub grid: Dim,
    pub block: Dim,
}

impl KernelConfig {
    #[must_use]
    pub fn new(grid: impl Into<Dim>, block: impl Into<Dim>) -> Self {
        Self {
            grid: grid.into(),
            block: block.into(),
        }
    }

    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.grid.size()
    }

    #[must_use]
    pub fn threads_per_block(&self) -> u64 {
        self.block.size()
    }

    #[must_use]
    pub fn total_threads(&self) -> u64 {
        self.total_blocks() * self.threads_per_block()
    }
}

/// A kernel submitted to the device.
///
/// Carries the launch configuration, a scheduling priority, and cost
/// estimates used by shortest-job-first ordering and reporting. Blocks are
/// materialized at submission and drained by the dispatcher; completion
/// timing is recorded on the workload itself.
#[derive(Debug)]
pub struct Workload {
    name: String,
    kind: WorkloadKind,
    config: KernelConfig,
    priority: i32,
    estimated_instructions: u64,
    estimated_memory_ops: u64,
    blocks: Mutex<Vec<ThreadBlock>>,
    start_time: Mutex<Option<Instant>>,
    completed_time: Mutex<Option<Instant>>,
    completed: AtomicBool,
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Workload {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: WorkloadKind, config: KernelConfig) -> Self {
        Self {
            name: name.into(),
            kind,
            config,
            priority: 0,
            estimated_instructions: 0,
            estimated_memory_ops: 0,
            blocks: Mutex::new(Vec::new()),
            start_time: Mutex::new(None),
            completed_time: Mutex::new(None),
            completed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> WorkloadKind {
        self.kind
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Higher priority means more urgent.
    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    #[must_use]
    pub fn estimated_instructions(&self) -> u64 {
        self.estimated_instructions
    }

    pub fn set_estimated_instructions(&mut self, count: u64) {
        self.estimated_instructions = count;
    }

    #[must_use]
    pub fn estimated_memory_ops(&self) -> u64 {
        self.estimated_memory_ops
    }

    pub fn set_estimated_memory_ops(&mut self, count: u64) {
        self.estimated_memory_ops = count;
    }

    /// Materialize the launch grid into thread blocks.
    ///
    /// Idempotent: any previously generated blocks are discarded. Block `i`
    /// sits at grid position `(i % gx, (i / gx) % gy, i / (gx * gy))`.
    pub fn generate_thread_blocks(&self) {
        let threads_per_block = self.config.threads_per_block() as usize;
        let grid_x = u64::from(self.config.grid.x).max(1);
        let grid_y = u64::from(self.config.grid.y).max(1);
        let grid_xy = grid_x * grid_y;

        let mut blocks = self.blocks.lock();
        blocks.clear();
        for i in 0..self.config.total_blocks() {
            let mut block = ThreadBlock::new(i as u32, threads_per_block);
            block.set_grid_position(
                (i % grid_x) as u32,
                ((i / grid_x) % grid_y) as u32,
                (i / grid_xy) as u32,
            );
            blocks.push(block);
        }
    }

    /// Remove and return the last remaining block.
    ///
    /// The dispatcher drains until empty; order among sibling blocks is not
    /// observable outside the drain.
    #[must_use]
    pub fn next_block(&self) -> Option<ThreadBlock> {
        self.blocks.lock().pop()
    }

    #[must_use]
    pub fn has_more_blocks(&self) -> bool {
        !self.blocks.lock().is_empty()
    }

    #[must_use]
    pub fn remaining_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn start(&self) {
        *self.start_time.lock() = Some(Instant::now());
    }

    pub fn complete(&self) {
        *self.completed_time.lock() = Some(Instant::now());
        self.completed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Wall time between `start` and `complete` in milliseconds.
    ///
    /// Zero while the workload has not completed.
    #[must_use]
    pub fn execution_time_ms(&self) -> f64 {
        if !self.is_completed() {
            return 0.0;
        }
        match (*self.start_time.lock(), *self.completed_time.lock()) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64() * 1e3,
            _ => 0.0,
        }
    }

    /// Tiled matrix multiply `C = A x B` with `A: MxK`, `B: KxN`.
    #[must_use]
    pub fn matrix_multiply(m: usize, n: usize, k: usize) -> Self {
        let grid_x = m.div_ceil(16) as u32;
        let grid_y = n.div_ceil(16) as u32;
        let config = KernelConfig::new((grid_x, grid_y, 1), (16, 16, 1));

        let mut workload = Self::new(
            format!("MatrixMultiply_{m}x{n}x{k}"),
            WorkloadKind::MatrixMultiply,
            config,
        );
        // each output element costs K multiply-adds plus its operand traffic
        workload.set_estimated_instructions(2 * (m * n * k) as u64);
        workload.set_estimated_memory_ops((m * n * (k + 2)) as u64);
        workload
    }

    /// 3x3 convolution over a `batch x channels x height x width` activation,
    /// one thread per output element.
    #[must_use]
    pub fn convolution(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        let total_outputs = batch * channels * height * width;
        let threads_per_block = 256;
        let num_blocks = total_outputs.div_ceil(threads_per_block) as u32;
        let config = KernelConfig::new((num_blocks, 1, 1), (threads_per_block as u32, 1, 1));

        let mut workload = Self::new(
            format!("Convolution_{batch}x{channels}x{height}x{width}"),
            WorkloadKind::Convolution,
            config,
        );
        workload.set_estimated_instructions((total_outputs * 9 * 2) as u64);
        workload.set_estimated_memory_ops((total_outputs * 10) as u64);
        workload
    }

    /// Elementwise vector addition over `size` elements.
    #[must_use]
    pub fn vector_add(size: usize) -> Self {
        let threads_per_block = 256;
        let num_blocks = size.div_ceil(threads_per_block) as u32;
        let config = KernelConfig::new((num_blocks, 1, 1), (threads_per_block as u32, 1, 1));

        let mut workload = Self::new(
            format!("VectorAdd_{size}"),
            WorkloadKind::VectorAdd,
            config,
        );
        // load, add, store per element; two reads and one write
        workload.set_estimated_instructions(2 * size as u64);
        workload.set_estimated_memory_ops(3 * size as u64);
        workload
    }

    /// Tree reduction over `size` elements in `log2(size)` steps.
    #[must_use]
    pub fn reduction(size: usize) -> Self {
        let threads_per_block = 256;
        let num_blocks = size.div_ceil(threads_per_block) as u32;
        let config = KernelConfig::new((num_blocks, 1, 1), (threads_per_block as u32, 1, 1));

        let mut workload = Self::new(
            format!("Reduction_{size}"),
            WorkloadKind::Reduction,
            config,
        );
        let steps = if size == 0 { 0 } else { size.ilog2() as u64 };
        workload.set_estimated_instructions(size as u64 * steps);
        workload.set_estimated_memory_ops(2 * size as u64);
        workload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_multiply_shape_and_estimates() {
        let workload = Workload::matrix_multiply(512, 512, 512);
        assert_eq!(workload.kind(), WorkloadKind::MatrixMultiply);
        assert_eq!(workload.config().grid, Dim::new(32, 32, 1));
        assert_eq!(workload.config().block, Dim::new(16, 16, 1));
        assert_eq!(workload.estimated_instructions(), 2 * 512 * 512 * 512);
        assert_eq!(workload.estimated_memory_ops(), 512 * 512 * (512 + 2));
    }

    #[test]
    fn convolution_shape_and_estimates() {
        let workload = Workload::convolution(4, 64, 224, 224);
        let total = 4 * 64 * 224 * 224u64;
        assert_eq!(workload.config().grid.x as u64, total.div_ceil(256));
        assert_eq!(workload.config().block, Dim::new(256, 1, 1));
        assert_eq!(workload.estimated_instructions(), 18 * total);
        assert_eq!(workload.estimated_memory_ops(), 10 * total);
    }

    #[test]
    fn vector_add_estimates() {
        let workload = Workload::vector_add(1024 * 1024);
        assert_eq!(workload.config().grid.x, 4096);
        assert_eq!(workload.estimated_instructions(), 2 * 1024 * 1024);
        assert_eq!(workload.estimated_memory_ops(), 3 * 1024 * 1024);
    }

    #[test]
    fn reduction_estimates() {
        let workload = Workload::reduction(1 << 20);
        assert_eq!(workload.estimated_instructions(), (1 << 20) * 20);
        assert_eq!(workload.estimated_memory_ops(), 2 << 20);
    }

    #[test]
    fn generate_blocks_is_idempotent() {
        let workload = Workload::new(
            "grid",
            WorkloadKind::Custom,
            KernelConfig::new((4, 2, 2), (64, 1, 1)),
        );
        workload.generate_thread_blocks();
        assert_eq!(workload.remaining_blocks(), 16);
        workload.generate_thread_blocks();
        assert_eq!(workload.remaining_blocks(), 16);
    }

    #[test]
    fn grid_positions_unflatten_block_index() {
        let workload = Workload::new(
            "grid",
            WorkloadKind::Custom,
            KernelConfig::new((3, 2, 2), (32, 1, 1)),
        );
        workload.generate_thread_blocks();

        // drain is LIFO, so the highest index comes out first
        let block = workload.next_block().unwrap();
        assert_eq!(block.block_id(), 11);
        assert_eq!(block.grid_position(), Dim::new(2, 1, 1));

        let block = workload.next_block().unwrap();
        assert_eq!(block.block_id(), 10);
        assert_eq!(block.grid_position(), Dim::new(1, 1, 1));

        // block 7 unflattens to (1, 0, 1)
        for _ in 0..2 {
            let _ = workload.next_block().unwrap();
        }
        let block = workload.next_block().unwrap();
        assert_eq!(block.block_id(), 7);
        assert_eq!(block.grid_position(), Dim::new(1, 0, 1));
    }

    #[test]
    fn blocks_drain_to_empty() {
        let workload = Workload::vector_add(1024);
        workload.generate_thread_blocks();
        assert!(workload.has_more_blocks());
        let mut drained = 0;
        while workload.next_block().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 4);
        assert!(!workload.has_more_blocks());
        assert!(workload.next_block().is_none());
    }

    #[test]
    fn partial_last_warp() {
        let workload = Workload::new(
            "partial",
            WorkloadKind::Custom,
            KernelConfig::new(1u32, (40, 1, 1)),
        );
        workload.generate_thread_blocks();
        let block = workload.next_block().unwrap();
        assert_eq!(block.num_warps(), 2);
        assert_eq!(block.warps()[0].num_active_threads(), 32);
        assert_eq!(block.warps()[1].num_active_threads(), 8);
    }

    #[test]
    fn execution_time_zero_until_completed() {
        let workload = Workload::vector_add(256);
        assert_eq!(workload.execution_time_ms(), 0.0);
        workload.start();
        assert_eq!(workload.execution_time_ms(), 0.0);
        workload.complete();
        assert!(workload.is_completed());
        assert!(workload.execution_time_ms() >= 0.0);
    }

    #[test]
    fn kind_ordinals_are_stable() {
        assert_eq!(WorkloadKind::MatrixMultiply as u8, 0);
        assert_eq!(WorkloadKind::Convolution as u8, 1);
        assert_eq!(WorkloadKind::VectorAdd as u8, 2);
        assert_eq!(WorkloadKind::Reduction as u8, 3);
        assert_eq!(WorkloadKind::Custom as u8, 4);
    }
}
