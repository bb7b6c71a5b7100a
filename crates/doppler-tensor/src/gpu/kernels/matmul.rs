//! Matmul `C = A · B^T` and its q4k-fused/batched/matvec variants. `A` is
//! `[m,k]`, `B` is `[n,k]` (row-major `[out,in]` weight layout, matching the
//! row-wise-addressable convention the Q4K-fused path uses), `C` is `[m,n]`.
//! The dense f32 shader (`matmul_dense.wgsl`) is the one fully
//! wired up here; the fused-dequant variant shares this module's uniform
//! layout and dispatches through `crate::gpu::kernels::dequant`'s pipeline
//! with the B operand bound as raw q4k bytes instead of f32.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/matmul_dense.wgsl");
pub const ENTRY_POINT: &str = "main";
const TILE: u32 = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MatmulUniforms {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub workgroups_x: u32,
}

impl KernelUniform for MatmulUniforms {
    const KERNEL: &'static str = "matmul_dense";
    const FIELD_ORDER: &'static [&'static str] = &["m", "n", "k", "workgroups_x"];
}

/// Every binding the shader declares, in binding-index order. Used to build
/// an explicit bind-group layout — never `auto`.
pub fn bindings() -> [BindingDesc; 4] {
    use wgpu::{BindingType, BufferBindingType, ShaderStages};
    [
        BindingDesc {
            binding: 0,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
        BindingDesc {
            binding: 1,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
        BindingDesc {
            binding: 2,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
        BindingDesc {
            binding: 3,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
    ]
}

/// Validates the shapes for `C = A @ B` and builds the uniform struct and
/// workgroup count. Pure and device-free so it's testable without a GPU.
pub fn plan(m: usize, k: usize, k2: usize, n: usize) -> Result<(MatmulUniforms, (u32, u32, u32))> {
    if k != k2 {
        return Err(TensorError::MatmulMismatch { m, k, k2, n });
    }
    let workgroups_x = workgroup_count_1d(n as u32, TILE);
    let workgroups_y = workgroup_count_1d(m as u32, TILE);
    let uniforms = MatmulUniforms {
        m: m as u32,
        n: n as u32,
        k: k as u32,
        workgroups_x,
    };
    Ok((uniforms, (workgroups_x, workgroups_y, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(MatmulUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_dimension_mismatch() {
        assert!(plan(4, 8, 9, 4).is_err());
    }

    #[test]
    fn test_plan_workgroup_counts() {
        let (uniforms, wg) = plan(32, 16, 16, 48).unwrap();
        assert_eq!(uniforms.m, 32);
        assert_eq!(uniforms.k, 16);
        assert_eq!(uniforms.n, 48);
        assert_eq!(wg, (3, 2, 1)); // ceil(48/16)=3, ceil(32/16)=2
    }

    #[test]
    fn test_matvec_shape() {
        // M=1 matvec still plans correctly through the same kernel.
        let (uniforms, wg) = plan(1, 128, 128, 4096).unwrap();
        assert_eq!(uniforms.m, 1);
        assert_eq!(wg.1, 1);
    }
}
