use crate::config::{
    BlockId, MemoryAddress, ThreadId, GLOBAL_MEMORY_SIZE, REGISTERS_PER_THREAD,
    SHARED_MEMORY_PER_BLOCK,
};
use crate::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// Cycle latency of a global memory access.
pub const GLOBAL_MEMORY_LATENCY: u64 = 400;

/// Cycle latency of a shared memory access.
pub const SHARED_MEMORY_LATENCY: u64 = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address out of range: {address:#x} + {bytes} exceeds {size} bytes")]
    AddressOutOfRange {
        address: MemoryAddress,
        bytes: u64,
        size: u64,
    },

    #[error("register index out of range: {index} (register file holds {num_registers})")]
    RegisterIndexOutOfRange { index: usize, num_registers: usize },
}

/// Device global memory.
///
/// Accesses are accounting-only: a read or write bumps the counters after a
/// bounds check, no bytes move. Size and latency are fixed at construction.
#[derive(Debug)]
pub struct GlobalMemory {
    size: u64,
    latency_cycles: u64,
    access_count: AtomicU64,
    read_count: AtomicU64,
    write_count: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Default for GlobalMemory {
    fn default() -> Self {
        Self::new(GLOBAL_MEMORY_SIZE)
    }
}

impl GlobalMemory {
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            size,
            latency_cycles: GLOBAL_MEMORY_LATENCY,
            access_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn check_bounds(&self, address: MemoryAddress, bytes: u64) -> Result<(), MemoryError> {
        if address.checked_add(bytes).map_or(true, |end| end > self.size) {
            return Err(MemoryError::AddressOutOfRange {
                address,
                bytes,
                size: self.size,
            });
        }
        Ok(())
    }

    pub fn read(&self, address: MemoryAddress, bytes: u64) -> Result<(), MemoryError> {
        self.check_bounds(address, bytes)?;
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    pub fn write(&self, address: MemoryAddress, bytes: u64) -> Result<(), MemoryError> {
        self.check_bounds(address, bytes)?;
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn latency(&self) -> u64 {
        self.latency_cycles
    }

    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.access_count.store(0, Ordering::Relaxed);
        self.read_count.store(0, Ordering::Relaxed);
        self.write_count.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

/// Shared memory region owned by one thread block.
#[derive(Debug)]
pub struct SharedMemory {
    size: u64,
    latency_cycles: u64,
    owner_block: BlockId,
    access_count: AtomicU64,
}

impl SharedMemory {
    #[must_use]
    pub fn new(owner_block: BlockId) -> Self {
        Self::with_size(owner_block, SHARED_MEMORY_PER_BLOCK)
    }

    #[must_use]
    pub fn with_size(owner_block: BlockId, size: u64) -> Self {
        Self {
            size,
            latency_cycles: SHARED_MEMORY_LATENCY,
            owner_block,
            access_count: AtomicU64::new(0),
        }
    }

    pub fn read(&self, address: MemoryAddress, bytes: u64) -> Result<(), MemoryError> {
        self.access(address, bytes)
    }

    pub fn write(&self, address: MemoryAddress, bytes: u64) -> Result<(), MemoryError> {
        self.access(address, bytes)
    }

    fn access(&self, address: MemoryAddress, bytes: u64) -> Result<(), MemoryError> {
        if address.checked_add(bytes).map_or(true, |end| end > self.size) {
            return Err(MemoryError::AddressOutOfRange {
                address,
                bytes,
                size: self.size,
            });
        }
        self.access_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn latency(&self) -> u64 {
        self.latency_cycles
    }

    #[must_use]
    pub fn owner(&self) -> BlockId {
        self.owner_block
    }

    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.access_count.store(0, Ordering::Relaxed);
    }
}

/// Register file owned by one thread.
#[derive(Debug)]
pub struct RegisterFile {
    registers: Mutex<Vec<u32>>,
    owner_thread: ThreadId,
}

impl RegisterFile {
    #[must_use]
    pub fn new(owner_thread: ThreadId) -> Self {
        Self {
            registers: Mutex::new(vec![0; REGISTERS_PER_THREAD]),
            owner_thread,
        }
    }

    pub fn read(&self, index: usize) -> Result<u32, MemoryError> {
        let registers = self.registers.lock();
        registers
            .get(index)
            .copied()
            .ok_or(MemoryError::RegisterIndexOutOfRange {
                index,
                num_registers: registers.len(),
            })
    }

    pub fn write(&self, index: usize, value: u32) -> Result<(), MemoryError> {
        let mut registers = self.registers.lock();
        let num_registers = registers.len();
        match registers.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(MemoryError::RegisterIndexOutOfRange {
                index,
                num_registers,
            }),
        }
    }

    #[must_use]
    pub fn num_registers(&self) -> usize {
        self.registers.lock().len()
    }

    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.owner_thread
    }

    pub fn clear(&self) {
        self.registers.lock().fill(0);
    }
}

/// Exclusive publisher of the global memory handle.
///
/// Tallies device-wide memory traffic. Cache hit and miss counters are part
/// of the public surface for front-ends even though the stock execution model
/// never classifies accesses.
#[derive(Debug)]
pub struct MemoryController {
    global_memory: Arc<GlobalMemory>,
    total_memory_ops: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new(GLOBAL_MEMORY_SIZE)
    }
}

impl MemoryController {
    #[must_use]
    pub fn new(global_memory_size: u64) -> Self {
        Self {
            global_memory: Arc::new(GlobalMemory::new(global_memory_size)),
            total_memory_ops: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn global_memory(&self) -> &Arc<GlobalMemory> {
        &self.global_memory
    }

    pub fn record_memory_op(&self) {
        self.total_memory_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_memory_ops(&self) -> u64 {
        self.total_memory_ops.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_memory_bounds() {
        let mem = GlobalMemory::new(1024);
        assert_eq!(mem.read(0, 1024), Ok(()));
        assert_eq!(mem.write(1000, 24), Ok(()));
        assert!(matches!(
            mem.read(1000, 25),
            Err(MemoryError::AddressOutOfRange { .. })
        ));
        assert!(matches!(
            mem.write(u64::MAX, 2),
            Err(MemoryError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn global_memory_counters() {
        let mem = GlobalMemory::new(4096);
        mem.read(0, 128).unwrap();
        mem.read(128, 128).unwrap();
        mem.write(0, 64).unwrap();
        assert_eq!(mem.access_count(), 3);
        assert_eq!(mem.read_count(), 2);
        assert_eq!(mem.write_count(), 1);
        assert_eq!(mem.bytes_read(), 256);
        assert_eq!(mem.bytes_written(), 64);

        // failed accesses leave counters alone
        assert!(mem.read(4096, 1).is_err());
        assert_eq!(mem.access_count(), 3);

        mem.reset();
        assert_eq!(mem.access_count(), 0);
        assert_eq!(mem.bytes_read(), 0);
    }

    #[test]
    fn shared_memory_accounting() {
        let smem = SharedMemory::new(7);
        assert_eq!(smem.owner(), 7);
        assert_eq!(smem.size(), SHARED_MEMORY_PER_BLOCK);
        assert_eq!(smem.latency(), SHARED_MEMORY_LATENCY);
        smem.read(0, 16).unwrap();
        smem.write(16, 16).unwrap();
        assert_eq!(smem.access_count(), 2);
        assert!(smem.read(SHARED_MEMORY_PER_BLOCK, 1).is_err());
        smem.clear();
        assert_eq!(smem.access_count(), 0);
    }

    #[test]
    fn register_file_bounds() {
        let regs = RegisterFile::new(3);
        assert_eq!(regs.num_registers(), REGISTERS_PER_THREAD);
        regs.write(0, 42).unwrap();
        assert_eq!(regs.read(0), Ok(42));
        assert_eq!(
            regs.read(REGISTERS_PER_THREAD),
            Err(MemoryError::RegisterIndexOutOfRange {
                index: REGISTERS_PER_THREAD,
                num_registers: REGISTERS_PER_THREAD,
            })
        );
        assert!(regs.write(REGISTERS_PER_THREAD, 1).is_err());
        regs.clear();
        assert_eq!(regs.read(0), Ok(0));
    }

    #[test]
    fn cache_hit_rate() {
        let controller = MemoryController::default();
        assert_eq!(controller.cache_hit_rate(), 0.0);
        controller.record_cache_hit();
        controller.record_cache_hit();
        controller.record_cache_hit();
        controller.record_cache_miss();
        assert!((controller.cache_hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_op_counter_monotonic() {
        let controller = MemoryController::default();
        let mut previous = 0;
        for _ in 0..10 {
            controller.record_memory_op();
            let current = controller.total_memory_ops();
            assert!(current > previous);
            previous = current;
        }
    }
}
