//! Elementwise scalar multiply. Used by the layer driver for the Gemma-3
//! embedding scale (`x *= sqrt(hidden_size)`) applied right after `gather`.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/scale.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScaleUniforms {
    pub len: u32,
    pub factor: f32,
}

impl KernelUniform for ScaleUniforms {
    const KERNEL: &'static str = "scale";
    const FIELD_ORDER: &'static [&'static str] = &["len", "factor"];
}

pub fn bindings() -> [BindingDesc; 3] {
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
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
    ]
}

pub fn plan(len: usize, factor: f32) -> Result<(ScaleUniforms, (u32, u32, u32))> {
    if len == 0 {
        return Err(TensorError::Other("scale: len must be non-zero".to_string()));
    }
    let uniforms = ScaleUniforms {
        len: len as u32,
        factor,
    };
    Ok((
        uniforms,
        (workgroup_count_1d(len as u32, WORKGROUP_SIZE), 1, 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(ScaleUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_zero_length_rejected() {
        assert!(plan(0, 1.0).is_err());
    }

    #[test]
    fn test_plan_workgroup_count() {
        let (uniforms, (wx, wy, wz)) = plan(130, 2.0).unwrap();
        assert_eq!(uniforms.factor, 2.0);
        assert_eq!((wx, wy, wz), (3, 1, 1));
    }
}
