//! Mixture-of-experts routing and combine . The per-expert
//! FFN computation itself is ordinary dense matmul/silu_gated dispatches
//! against each routed expert's weight slice — only the gather-by-route
//! and weighted scatter-add are their own kernels.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::{workgroup_count_1d, BindingDesc};
use crate::gpu::uniform::KernelUniform;

pub const ROUTE_SHADER_SRC: &str = include_str!("../shaders/moe_route.wgsl");
pub const COMBINE_SHADER_SRC: &str = include_str!("../shaders/moe_combine.wgsl");
pub const ENTRY_POINT: &str = "main";
const WORKGROUP_SIZE: u32 = 64;
/// Must match `MAX_TOP_K` in `moe_route.wgsl`.
const MAX_TOP_K: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RouteUniforms {
    pub n_tokens: u32,
    pub n_experts: u32,
    pub top_k: u32,
}

impl KernelUniform for RouteUniforms {
    const KERNEL: &'static str = "moe_route";
    const FIELD_ORDER: &'static [&'static str] = &["n_tokens", "n_experts", "top_k"];
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CombineUniforms {
    pub n_tokens: u32,
    pub top_k: u32,
    pub hidden_size: u32,
}

impl KernelUniform for CombineUniforms {
    const KERNEL: &'static str = "moe_combine";
    const FIELD_ORDER: &'static [&'static str] = &["n_tokens", "top_k", "hidden_size"];
}

pub fn route_bindings() -> [BindingDesc; 4] {
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

pub fn combine_bindings() -> [BindingDesc; 4] {
    route_bindings()
}

pub fn plan_route(
    n_tokens: usize,
    n_experts: usize,
    top_k: usize,
) -> Result<(RouteUniforms, (u32, u32, u32))> {
    if top_k == 0 || top_k > n_experts {
        return Err(TensorError::Other(format!(
            "moe_route: top_k={top_k} must be in 1..=n_experts={n_experts}"
        )));
    }
    if top_k > MAX_TOP_K {
        return Err(TensorError::Other(format!(
            "moe_route: top_k={top_k} exceeds the kernel's fixed capacity of {MAX_TOP_K}"
        )));
    }
    let uniforms = RouteUniforms {
        n_tokens: n_tokens as u32,
        n_experts: n_experts as u32,
        top_k: top_k as u32,
    };
    Ok((
        uniforms,
        (workgroup_count_1d(n_tokens as u32, WORKGROUP_SIZE), 1, 1),
    ))
}

pub fn plan_combine(
    n_tokens: usize,
    top_k: usize,
    hidden_size: usize,
) -> Result<(CombineUniforms, (u32, u32, u32))> {
    let uniforms = CombineUniforms {
        n_tokens: n_tokens as u32,
        top_k: top_k as u32,
        hidden_size: hidden_size as u32,
    };
    Ok((
        uniforms,
        (workgroup_count_1d(n_tokens as u32, WORKGROUP_SIZE), 1, 1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_uniform_matches_shader() {
        assert!(RouteUniforms::assert_matches_shader(ROUTE_SHADER_SRC).is_ok());
    }

    #[test]
    fn test_combine_uniform_matches_shader() {
        assert!(CombineUniforms::assert_matches_shader(COMBINE_SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_route_top_k_over_capacity() {
        assert!(plan_route(4, 16, MAX_TOP_K + 1).is_err());
    }

    #[test]
    fn test_plan_route_top_k_over_experts() {
        assert!(plan_route(4, 4, 5).is_err());
    }
}
