//! Rotary position embedding . Dispatched twice per layer step,
//! once against the Q buffer (`n_heads = h_q`) and once against K
//! (`n_heads = h_kv`), sharing this module's uniform layout and shader.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/rope.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RopeUniforms {
    pub n_heads: u32,
    pub head_dim: u32,
    pub pos: u32,
    pub theta: f32,
}

impl KernelUniform for RopeUniforms {
    const KERNEL: &'static str = "rope";
    const FIELD_ORDER: &'static [&'static str] = &["n_heads", "head_dim", "pos", "theta"];
}

pub fn bindings() -> [BindingDesc; 2] {
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
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
    ]
}

pub fn plan(
    buf_len: usize,
    n_heads: usize,
    head_dim: usize,
    pos: usize,
    theta: f32,
) -> Result<(RopeUniforms, (u32, u32, u32))> {
    if head_dim % 2 != 0 {
        return Err(TensorError::Other(format!(
            "rope: head_dim={head_dim} must be even"
        )));
    }
    if buf_len != n_heads * head_dim {
        return Err(TensorError::ShapeMismatch {
            expected: vec![n_heads * head_dim],
            got: vec![buf_len],
        });
    }
    let uniforms = RopeUniforms {
        n_heads: n_heads as u32,
        head_dim: head_dim as u32,
        pos: pos as u32,
        theta,
    };
    Ok((
        uniforms,
        (workgroup_count_1d(n_heads as u32, WORKGROUP_SIZE), 1, 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(RopeUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_odd_head_dim_rejected() {
        assert!(plan(3, 1, 3, 0, 10000.0).is_err());
    }

    #[test]
    fn test_plan_shape_mismatch() {
        assert!(plan(10, 2, 8, 0, 10000.0).is_err());
    }
}
