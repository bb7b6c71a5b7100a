//! RMSNorm, shared by the block-level pre/post norms and the per-head
//! Q/K-norm .

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/rms_norm.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RmsNormUniforms {
    pub n_rows: u32,
    pub hidden_size: u32,
    pub eps: f32,
}

impl KernelUniform for RmsNormUniforms {
    const KERNEL: &'static str = "rms_norm";
    const FIELD_ORDER: &'static [&'static str] = &["n_rows", "hidden_size", "eps"];
}

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

pub fn plan(
    x_len: usize,
    weight_len: usize,
    hidden_size: usize,
    eps: f32,
) -> Result<(RmsNormUniforms, (u32, u32, u32))> {
    if hidden_size == 0 || x_len % hidden_size != 0 {
        return Err(TensorError::Other(format!(
            "rms_norm: x_len={x_len} is not a multiple of hidden_size={hidden_size}"
        )));
    }
    if weight_len != hidden_size {
        return Err(TensorError::ShapeMismatch {
            expected: vec![hidden_size],
            got: vec![weight_len],
        });
    }
    let n_rows = (x_len / hidden_size) as u32;
    let uniforms = RmsNormUniforms {
        n_rows,
        hidden_size: hidden_size as u32,
        eps,
    };
    Ok((uniforms, (workgroup_count_1d(n_rows, WORKGROUP_SIZE), 1, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(RmsNormUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_block_norm() {
        let (u, wg) = plan(2 * 4096, 4096, 4096, 1e-6).unwrap();
        assert_eq!(u.n_rows, 2);
        assert_eq!(wg.0, 1);
    }

    #[test]
    fn test_plan_per_head_qnorm() {
        // 32 query heads of head_dim=128, one token.
        let (u, _) = plan(32 * 128, 128, 128, 1e-6).unwrap();
        assert_eq!(u.n_rows, 32);
    }

    #[test]
    fn test_plan_weight_mismatch() {
        assert!(plan(256, 100, 256, 1e-6).is_err());
    }
}
