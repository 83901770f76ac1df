//! Discrete-event simulator of an abstract massively-parallel accelerator.
//!
//! Kernels are submitted as [`Workload`]s, ordered by a pluggable
//! [`WorkloadScheduler`], and broken into thread blocks that a dispatcher
//! feeds to the device's compute units. Each unit interleaves its ready
//! warps cycle by cycle, models memory stalls, and retires warps and blocks;
//! the [`PerformanceAnalyzer`] aggregates what happened.

pub mod config;
pub mod core;
pub mod device;
pub mod fifo;
pub mod mem;
pub mod metrics;
pub mod scheduler;
pub mod sync;
pub mod warp;
pub mod workload;

pub use config::{Dim, GPUConfig};
pub use self::core::ComputeUnit;
pub use device::Device;
pub use mem::{MemoryController, MemoryError};
pub use metrics::{DeviceMetrics, PerformanceAnalyzer, SchedulerComparison, WorkloadMetrics};
pub use scheduler::{SchedulingPolicy, WorkloadScheduler};
pub use warp::{ExecutionState, ThreadBlock, Warp, WARP_SIZE};
pub use workload::{KernelConfig, Workload, WorkloadKind};
