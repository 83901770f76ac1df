use serde::{Deserialize, Serialize};

pub type ThreadId = u32;
pub type WarpId = u32;
pub type BlockId = u32;
pub type CoreId = u32;
pub type MemoryAddress = u64;

pub const KB: u64 = 1024;
pub const GB: u64 = 1024 * 1024 * 1024;

/// Upper bound on threads per block accepted by a launch configuration.
pub const MAX_THREADS_PER_BLOCK: usize = 1024;

/// Upper bound on blocks in a launch grid.
pub const MAX_BLOCKS_PER_GRID: usize = 65535;

/// Default size of device global memory.
pub const GLOBAL_MEMORY_SIZE: u64 = 8 * GB;

/// Default size of the shared memory region owned by each thread block.
pub const SHARED_MEMORY_PER_BLOCK: u64 = 48 * KB;

/// Number of 32-bit registers in each per-thread register file.
pub const REGISTERS_PER_THREAD: usize = 255;

/// 3-dimensional launch geometry (grid or block extent).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    #[must_use]
    #[inline]
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements spanned by this extent.
    #[must_use]
    #[inline]
    pub fn size(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl From<u32> for Dim {
    #[inline]
    fn from(dim: u32) -> Self {
        Self { x: dim, y: 1, z: 1 }
    }
}

impl From<(u32, u32, u32)> for Dim {
    #[inline]
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self { x, y, z }
    }
}

/// Device profile.
///
/// Capacities are fixed at device creation; compute units derive their
/// per-unit limits from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GPUConfig {
    /// Number of compute units on the device.
    pub num_compute_units: usize,
    /// Warp capacity of one compute unit.
    pub warps_per_cu: usize,
    /// Lockstep width of a warp.
    pub threads_per_warp: usize,
    /// Resident block capacity of one compute unit.
    pub max_blocks_per_cu: usize,
    /// Size of global memory in bytes.
    pub global_memory_size: u64,
    /// Size of the shared memory region of each thread block in bytes.
    pub shared_memory_per_block: u64,
    pub device_name: String,
}

impl Default for GPUConfig {
    fn default() -> Self {
        // RTX 3080-like profile
        Self {
            num_compute_units: 68,
            warps_per_cu: 64,
            threads_per_warp: 32,
            max_blocks_per_cu: 16,
            global_memory_size: 10 * GB,
            shared_memory_per_block: 48 * KB,
            device_name: "GPU Simulator - RTX 3080 Profile".to_string(),
        }
    }
}

impl GPUConfig {
    /// Thread capacity of one compute unit.
    #[must_use]
    pub fn max_threads_per_cu(&self) -> usize {
        self.warps_per_cu * self.threads_per_warp
    }
}
