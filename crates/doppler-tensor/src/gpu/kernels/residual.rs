//! Residual add (post-attention and post-FFN additions).

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/residual.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResidualUniforms {
    pub len: u32,
}

impl KernelUniform for ResidualUniforms {
    const KERNEL: &'static str = "residual";
    const FIELD_ORDER: &'static [&'static str] = &["len"];
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

pub fn plan(a_len: usize, b_len: usize) -> Result<(ResidualUniforms, (u32, u32, u32))> {
    if a_len != b_len {
        return Err(TensorError::Other(format!(
            "residual: length mismatch a={a_len} b={b_len}"
        )));
    }
    let uniforms = ResidualUniforms { len: a_len as u32 };
    Ok((
        uniforms,
        (workgroup_count_1d(a_len as u32, WORKGROUP_SIZE), 1, 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(ResidualUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_length_mismatch() {
        assert!(plan(10, 11).is_err());
    }

    #[test]
    fn test_plan_workgroup_count() {
        let (_, (wx, wy, wz)) = plan(130, 130).unwrap();
        assert_eq!((wx, wy, wz), (3, 1, 1));
    }
}
