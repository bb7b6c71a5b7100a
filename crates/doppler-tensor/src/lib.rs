//! `doppler-tensor` - the GPU kernel library, CPU reference backend, and
//! segmented host heap for the inference engine.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage, used by the reference backend
//!   and by tests
//! - A `ComputeBackend` trait with a `CpuBackend` reference implementation
//!   (numeric ground truth, exercised in tests only)
//! - `gpu`: the real wgpu compute-shader kernel library, with device-free
//!   shape/uniform validation split out so it's testable without a GPU
//! - `heap`: the segmented host allocator backing the weight-loading path
//! - Shape utilities, dtype definitions, and quantized-format dequant

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod gpu;
pub mod heap;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use heap::{SegmentedHeap, VirtualAddress};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
