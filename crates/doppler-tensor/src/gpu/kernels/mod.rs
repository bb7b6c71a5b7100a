//! One module per compute kernel. Each pairs a `.wgsl` shader (under
//! `crate::gpu::shaders`, pulled in via `include_str!`) with a
//! [`crate::gpu::uniform::KernelUniform`] impl, an explicit binding list,
//! and a device-free `plan()` that validates shapes and computes the
//! dispatch size — the part of each kernel that can be unit tested
//! without a live adapter.

pub mod attention;
pub mod dequant;
pub mod gather;
pub mod matmul;
pub mod moe;
pub mod residual;
pub mod rmsnorm;
pub mod rope;
pub mod scale;
pub mod silu;
pub mod softmax;
