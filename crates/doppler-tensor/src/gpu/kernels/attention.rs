//! Causal grouped-query attention . Three dispatch tiers
//! share one uniform layout; `select_tier` is a pure function of the
//! query count and decode/prefill mode so the driver can't accidentally
//! dispatch the prefill tier on a decode step — picking the wrong tier
//! for a given shape is a correctness bug, not just a performance one.

use crate::error::{Result, TensorError};
use crate::gpu::pipeline::BindingDesc;
use crate::gpu::uniform::KernelUniform;

pub const STREAMING_SHADER_SRC: &str = include_str!("../shaders/attention_streaming.wgsl");
pub const TILED_SMALL_SHADER_SRC: &str = include_str!("../shaders/attention_tiled_small.wgsl");
pub const TILED_LARGE_SHADER_SRC: &str = include_str!("../shaders/attention_tiled_large.wgsl");
pub const ENTRY_POINT: &str = "main";

const TILED_SMALL_TILE: u32 = 32;
const TILED_LARGE_TILE: u32 = 64;
/// Above this many tokens, tiled_large amortizes better than tiled_small.
const TILED_LARGE_THRESHOLD: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AttentionUniforms {
    pub t: u32,
    pub t_k: u32,
    pub h_q: u32,
    pub h_kv: u32,
    pub head_dim: u32,
    pub group: u32,
    pub workgroups_x: u32,
    pub _pad: u32,
}

impl KernelUniform for AttentionUniforms {
    const KERNEL: &'static str = "attention";
    const FIELD_ORDER: &'static [&'static str] = &[
        "t",
        "t_k",
        "h_q",
        "h_kv",
        "head_dim",
        "group",
        "workgroups_x",
        "_pad",
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttentionTier {
    Streaming,
    TiledSmall,
    TiledLarge,
}

impl AttentionTier {
    pub fn shader_src(self) -> &'static str {
        match self {
            AttentionTier::Streaming => STREAMING_SHADER_SRC,
            AttentionTier::TiledSmall => TILED_SMALL_SHADER_SRC,
            AttentionTier::TiledLarge => TILED_LARGE_SHADER_SRC,
        }
    }

    fn tile(self) -> u32 {
        match self {
            AttentionTier::Streaming => 1,
            AttentionTier::TiledSmall => TILED_SMALL_TILE,
            AttentionTier::TiledLarge => TILED_LARGE_TILE,
        }
    }
}

/// Decode (`t == 1`) always selects the streaming tier; prefill picks by
/// token count. A fixed `T` can legitimately select different tiers for
/// decode vs. prefill call sites — that asymmetry is intentional, not a bug.
pub fn select_tier(t: usize, is_decode: bool) -> AttentionTier {
    if is_decode || t == 1 {
        AttentionTier::Streaming
    } else if t > TILED_LARGE_THRESHOLD {
        AttentionTier::TiledLarge
    } else {
        AttentionTier::TiledSmall
    }
}

pub fn bindings() -> [BindingDesc; 5] {
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
                ty: BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
        BindingDesc {
            binding: 4,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        },
    ]
}

#[allow(clippy::too_many_arguments)]
pub fn plan(
    tier: AttentionTier,
    t: usize,
    t_k: usize,
    h_q: usize,
    h_kv: usize,
    head_dim: usize,
) -> Result<(AttentionUniforms, (u32, u32, u32))> {
    if h_kv == 0 || h_q % h_kv != 0 {
        return Err(TensorError::Other(format!(
            "attention: h_q={h_q} must be a whole multiple of h_kv={h_kv}"
        )));
    }
    if t > t_k {
        return Err(TensorError::Other(format!(
            "attention: t={t} cannot exceed cache length t_k={t_k}"
        )));
    }
    let tile = tier.tile();
    let workgroups_x = (t as u32).div_ceil(tile).max(1);
    let uniforms = AttentionUniforms {
        t: t as u32,
        t_k: t_k as u32,
        h_q: h_q as u32,
        h_kv: h_kv as u32,
        head_dim: head_dim as u32,
        group: (h_q / h_kv) as u32,
        workgroups_x,
        _pad: 0,
    };
    Ok((uniforms, (workgroups_x, h_q as u32, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_uniform_matches_shader() {
        assert!(AttentionUniforms::assert_matches_shader(STREAMING_SHADER_SRC).is_ok());
    }

    #[test]
    fn test_tiled_small_uniform_matches_shader() {
        assert!(AttentionUniforms::assert_matches_shader(TILED_SMALL_SHADER_SRC).is_ok());
    }

    #[test]
    fn test_tiled_large_uniform_matches_shader() {
        assert!(AttentionUniforms::assert_matches_shader(TILED_LARGE_SHADER_SRC).is_ok());
    }

    #[test]
    fn test_decode_always_selects_streaming() {
        assert_eq!(select_tier(1, true), AttentionTier::Streaming);
        // Same T as a prefill call, but decode mode still forces streaming.
        assert_eq!(select_tier(1, false), AttentionTier::Streaming);
    }

    #[test]
    fn test_prefill_tier_selection_by_length() {
        assert_eq!(select_tier(16, false), AttentionTier::TiledSmall);
        assert_eq!(select_tier(128, false), AttentionTier::TiledLarge);
    }

    #[test]
    fn test_plan_dispatch_counts() {
        let (_, wg_streaming) = plan(AttentionTier::Streaming, 1, 129, 8, 2, 64).unwrap();
        assert_eq!(wg_streaming, (1, 8, 1));

        let (_, wg_small) = plan(AttentionTier::TiledSmall, 40, 40, 8, 2, 64).unwrap();
        assert_eq!(wg_small.0, 2); // ceil(40/32)
        assert_eq!(wg_small.1, 8);

        let (_, wg_large) = plan(AttentionTier::TiledLarge, 130, 130, 8, 2, 64).unwrap();
        assert_eq!(wg_large.0, 3); // ceil(130/64)
    }

    #[test]
    fn test_plan_rejects_non_divisible_group() {
        assert!(plan(AttentionTier::Streaming, 1, 1, 7, 2, 64).is_err());
    }

    #[test]
    fn test_plan_rejects_t_exceeding_cache() {
        assert!(plan(AttentionTier::Streaming, 5, 3, 8, 2, 64).is_err());
    }
}
