//! Fused dequant-and-multiply matvec over raw Q4_K bytes, avoiding a
//! materialized dequantized copy of multi-gigabyte weight matrices.
//! Shares `MatmulUniforms`'s field layout so the layer driver can route a
//! given weight through either this kernel or plain `matmul` by
//! tensor-catalog variant alone, without touching the uniform-upload code
//! path.

use crate::error::{Result, TensorError};
use crate::gpu::kernels::matmul::MatmulUniforms;
use crate::gpu::pipeline::BindingDesc;

pub const SHADER_SRC: &str = include_str!("../shaders/matmul_q4k.wgsl");
pub const ENTRY_POINT: &str = "main";
const BLOCK_ELEMS: usize = 256;

pub fn bindings() -> [BindingDesc; 4] {
    crate::gpu::kernels::matmul::bindings()
}

/// Validates that `k` is a whole number of Q4_K superblocks (256 elements
/// each) and that `b_bytes_len` matches the expected row-major byte count,
/// then reuses `matmul`'s uniform layout and workgroup math.
pub fn plan(
    m: usize,
    k: usize,
    n: usize,
    b_bytes_len: usize,
) -> Result<(MatmulUniforms, (u32, u32, u32))> {
    if k % BLOCK_ELEMS != 0 {
        return Err(TensorError::Other(format!(
            "matmul_q4k: k={k} is not a multiple of the Q4_K block size {BLOCK_ELEMS}"
        )));
    }
    let n_blocks = k / BLOCK_ELEMS;
    let expected_bytes = n * n_blocks * 144;
    if b_bytes_len != expected_bytes {
        return Err(TensorError::Other(format!(
            "matmul_q4k: b_bytes_len={b_bytes_len} does not match expected {expected_bytes} for n={n} blocks_per_row={n_blocks}"
        )));
    }
    crate::gpu::kernels::matmul::plan(m, k, k, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::uniform::KernelUniform;

    #[test]
    fn test_uniform_matches_shader() {
        assert!(MatmulUniforms::assert_matches_shader(SHADER_SRC).is_ok());
    }

    #[test]
    fn test_plan_rejects_non_block_aligned_k() {
        assert!(plan(1, 300, 4, 4 * 144).is_err());
    }

    #[test]
    fn test_plan_rejects_wrong_byte_length() {
        // k=256 -> 1 block per row, n=4 rows -> expects 4*144 bytes.
        assert!(plan(1, 256, 4, 4 * 100).is_err());
    }

    #[test]
    fn test_plan_accepts_matching_layout() {
        let (uniforms, _) = plan(1, 512, 8, 8 * 2 * 144).unwrap();
        assert_eq!(uniforms.k, 512);
        assert_eq!(uniforms.n, 8);
    }
}
