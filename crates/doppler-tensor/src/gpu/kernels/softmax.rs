//! Row-wise softmax, used for LM-head logits and (folded into attention,
//! see `kernels::attention`) the attention score normalization.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/softmax.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;

/// Uniform layout fixed at `{innerSize: u32@0, outerSize: u32@4,
/// temperature: f32@8, _pad: u32@12}` — field order must match the WGSL
/// struct exactly, see the softmax postmortem in the crate design notes.
/// `innerSize` is the reduced dimension (e.g. vocab size), `outerSize` the
/// number of independent rows (e.g. token count).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SoftmaxUniforms {
    pub inner_size: u32,
    pub outer_size: u32,
    pub temperature: f32,
    pub _pad: u32,
}

impl KernelUniform for SoftmaxUniforms {
    const KERNEL: &'static str = "softmax";
    const FIELD_ORDER: &'static [&'static str] =
        &["innerSize", "outerSize", "temperature", "_pad"];
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

/// `temperature` scales `x` before the softmax (`x / temperature`); pass
/// `1.0` for an unscaled softmax (e.g. MoE routing, LM-head probabilities).
pub fn plan(
    x_len: usize,
    inner_size: usize,
    temperature: f32,
) -> Result<(SoftmaxUniforms, (u32, u32, u32))> {
    if inner_size == 0 || x_len % inner_size != 0 {
        return Err(TensorError::Other(format!(
            "softmax: x_len={x_len} is not a multiple of inner_size={inner_size}"
        )));
    }
    let outer_size = (x_len / inner_size) as u32;
    let uniforms = SoftmaxUniforms {
        inner_size: inner_size as u32,
        outer_size,
        temperature,
        _pad: 0,
    };
    Ok((
        uniforms,
        (workgroup_count_1d(outer_size, WORKGROUP_SIZE), 1, 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(SoftmaxUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_uniform_field_order_is_load_bearing() {
        // A struct with innerSize and outerSize swapped must fail the
        // check: the host always writes {innerSize, outerSize, ...} in
        // that byte order (the fixed softmax uniform layout).
        #[repr(C)]
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        struct Swapped {
            outer_size: u32,
            inner_size: u32,
            temperature: f32,
            _pad: u32,
        }
        impl KernelUniform for Swapped {
            const KERNEL: &'static str = "softmax";
            const FIELD_ORDER: &'static [&'static str] =
                &["outerSize", "innerSize", "temperature", "_pad"];
        }
        assert!(Swapped::assert_matches_shader(SHADER_SRC).is_err());
    }

    #[test]
    fn test_plan_rejects_indivisible_length() {
        assert!(plan(100, 32000, 1.0).is_err());
    }

    #[test]
    fn test_plan_accepts_matching_length() {
        let (uniforms, workgroups) = plan(2 * 32000, 32000, 1.0).unwrap();
        assert_eq!(uniforms.outer_size, 2);
        assert_eq!(uniforms.inner_size, 32000);
        assert_eq!(workgroups.0, 1);
    }
}
