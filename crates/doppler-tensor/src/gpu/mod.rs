//! The GPU kernel library: wgpu compute shaders paired with host-side
//! recorders. Every kernel here has a CPU reference in `crate::cpu` used
//! only in tests, and is dispatched through a [`recorder::CommandRecorder`]
//! built from an explicit (never `auto`) bind-group layout.

pub mod buffers;
pub mod device;
pub mod kernels;
pub mod pipeline;
pub mod recorder;
pub mod uniform;

pub use buffers::GpuBuffer;
pub use device::{DeviceConfig, GpuDevice};
pub use pipeline::PipelineCache;
pub use recorder::CommandRecorder;
pub use uniform::KernelUniform;
