//! Embedding lookup (the `Gather` half of the Gather step). Exact copy,
//! no scale applied here — `maxError == 0` is a correctness invariant of
//! this kernel on its own. The embedding scale is a separate dispatch
//! (`crate::gpu::kernels::scale`) the layer driver issues right after.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const SHADER_SRC: &str = include_str!("../shaders/gather.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GatherUniforms {
    pub n_indices: u32,
    pub row_size: u32,
}

impl KernelUniform for GatherUniforms {
    const KERNEL: &'static str = "gather";
    const FIELD_ORDER: &'static [&'static str] = &["n_indices", "row_size"];
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
    table_len: usize,
    n_indices: usize,
    row_size: usize,
) -> Result<(GatherUniforms, (u32, u32, u32))> {
    if row_size == 0 || table_len % row_size != 0 {
        return Err(TensorError::Other(format!(
            "gather: table_len={table_len} is not a multiple of row_size={row_size}"
        )));
    }
    let uniforms = GatherUniforms {
        n_indices: n_indices as u32,
        row_size: row_size as u32,
    };
    Ok((
        uniforms,
        (workgroup_count_1d(n_indices as u32, WORKGROUP_SIZE), 1, 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(GatherUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_row_size_mismatch() {
        assert!(plan(100, 4, 7).is_err());
    }
}
