// Reference block dequantization for Q4K, Q4_0 and Q4_1.
//
// Ground truth for the loader's dequant-on-load fallback (packed Q4K,
// `doppler_model::loader`) and for the GPU fused-matmul kernel's dequant
// step, which must reproduce these values bit-for-bit up to the tolerance
// in the kernel's error bound.

use half::f16;

use crate::dtype::{Q4K_BLOCK_BYTES, Q4K_BLOCK_ELEMENTS};
use crate::error::{Result, TensorError};

/// Unpacks one of the 8 six-bit (scale, min) pairs packed into a Q4K
/// block's 12-byte `scales` array. `j` ranges over `0..8`.
fn scale_min_k4(j: usize, scales: &[u8; 12]) -> (u8, u8) {
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        let d = (scales[j + 4] & 0xF) | ((scales[j - 4] >> 6) << 4);
        let m = (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4);
        (d, m)
    }
}

/// Dequantizes a single 144-byte Q4K block into 256 f32 values.
///
/// Layout: `d: f16, dmin: f16, scales: [u8; 12], qs: [u8; 128]`. Value
/// `i` in sub-block `j` (32 elements each) is `d*sc_j*nibble_i - dmin*m_j`.
pub fn dequantize_q4k_block(block: &[u8]) -> Result<[f32; Q4K_BLOCK_ELEMENTS]> {
    if block.len() != Q4K_BLOCK_BYTES {
        return Err(TensorError::Other(format!(
            "dequantize_q4k_block: block.len()={} but expected {}",
            block.len(),
            Q4K_BLOCK_BYTES
        )));
    }

    let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
    let dmin = f16::from_le_bytes([block[2], block[3]]).to_f32();
    let mut scales = [0u8; 12];
    scales.copy_from_slice(&block[4..16]);
    let qs = &block[16..144];

    let mut out = [0.0f32; Q4K_BLOCK_ELEMENTS];
    let mut y = 0usize;
    let mut is = 0usize;
    let mut q_off = 0usize;

    for _ in 0..(Q4K_BLOCK_ELEMENTS / 64) {
        let (sc1, m1) = scale_min_k4(is, &scales);
        let d1 = d * sc1 as f32;
        let min1 = dmin * m1 as f32;
        let (sc2, m2) = scale_min_k4(is + 1, &scales);
        let d2 = d * sc2 as f32;
        let min2 = dmin * m2 as f32;

        for l in 0..32 {
            out[y + l] = d1 * (qs[q_off + l] & 0x0F) as f32 - min1;
        }
        for l in 0..32 {
            out[y + 32 + l] = d2 * (qs[q_off + l] >> 4) as f32 - min2;
        }

        y += 64;
        is += 2;
        q_off += 32;
    }

    Ok(out)
}

/// Dequantizes `n_blocks * 144` bytes of Q4K data into `n_blocks * 256` f32s.
pub fn dequantize_q4k(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % Q4K_BLOCK_BYTES != 0 {
        return Err(TensorError::Other(format!(
            "dequantize_q4k: bytes.len()={} is not a multiple of block size {}",
            bytes.len(),
            Q4K_BLOCK_BYTES
        )));
    }
    let n_blocks = bytes.len() / Q4K_BLOCK_BYTES;
    let mut out = Vec::with_capacity(n_blocks * Q4K_BLOCK_ELEMENTS);
    for i in 0..n_blocks {
        let block = &bytes[i * Q4K_BLOCK_BYTES..(i + 1) * Q4K_BLOCK_BYTES];
        out.extend_from_slice(&dequantize_q4k_block(block)?);
    }
    Ok(out)
}

/// Dequantizes one 18-byte Q4_0 block (32 elements): `d: f16, qs: [u8; 16]`,
/// value `= (nibble - 8) * d`.
pub fn dequantize_q4_0_block(block: &[u8]) -> Result<[f32; 32]> {
    if block.len() != 18 {
        return Err(TensorError::Other(format!(
            "dequantize_q4_0_block: block.len()={} but expected 18",
            block.len()
        )));
    }
    let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
    let qs = &block[2..18];

    let mut out = [0.0f32; 32];
    for j in 0..16 {
        let x0 = (qs[j] & 0x0F) as i32 - 8;
        let x1 = (qs[j] >> 4) as i32 - 8;
        out[j] = x0 as f32 * d;
        out[j + 16] = x1 as f32 * d;
    }
    Ok(out)
}

/// Dequantizes one 20-byte Q4_1 block (32 elements): `d: f16, m: f16, qs:
/// [u8; 16]`, value `= nibble * d + m`.
pub fn dequantize_q4_1_block(block: &[u8]) -> Result<[f32; 32]> {
    if block.len() != 20 {
        return Err(TensorError::Other(format!(
            "dequantize_q4_1_block: block.len()={} but expected 20",
            block.len()
        )));
    }
    let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
    let m = f16::from_le_bytes([block[2], block[3]]).to_f32();
    let qs = &block[4..20];

    let mut out = [0.0f32; 32];
    for j in 0..16 {
        let x0 = (qs[j] & 0x0F) as f32;
        let x1 = (qs[j] >> 4) as f32;
        out[j] = x0 * d + m;
        out[j + 16] = x1 * d + m;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_q4k_block() -> Vec<u8> {
        vec![0u8; Q4K_BLOCK_BYTES]
    }

    #[test]
    fn test_dequantize_q4k_all_zero_is_zero() {
        let block = zero_q4k_block();
        let out = dequantize_q4k_block(&block).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_dequantize_q4k_wrong_size() {
        assert!(dequantize_q4k_block(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_dequantize_q4k_multi_block() {
        let bytes = vec![0u8; Q4K_BLOCK_BYTES * 3];
        let out = dequantize_q4k(&bytes).unwrap();
        assert_eq!(out.len(), 3 * Q4K_BLOCK_ELEMENTS);
    }

    #[test]
    fn test_dequantize_q4_0_bias() {
        // d=1.0, all nibbles = 8 (midpoint) -> all outputs zero.
        let mut block = vec![0u8; 18];
        block[0..2].copy_from_slice(&f16::from_f32(1.0).to_le_bytes());
        for b in block[2..18].iter_mut() {
            *b = 0x88;
        }
        let out = dequantize_q4_0_block(&block).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_dequantize_q4_1_offset() {
        // d=0, m=3.0 -> every output is exactly the min offset.
        let mut block = vec![0u8; 20];
        block[2..4].copy_from_slice(&f16::from_f32(3.0).to_le_bytes());
        let out = dequantize_q4_1_block(&block).unwrap();
        assert!(out.iter().all(|&v| (v - 3.0).abs() < 1e-3));
    }
}
