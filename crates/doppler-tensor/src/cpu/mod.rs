pub mod attention;
pub mod matmul;
pub mod moe;
pub mod quant;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements every kernel operation with straightforward loops optimized
/// for correctness rather than peak performance. This is the ground truth
/// every GPU kernel is checked against in tests, and the fallback path when
/// no suitable adapter is available.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        matmul::matmul(a, b, m, k, n)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
    }

    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        if weight.len() != hidden_size {
            return Err(TensorError::Other(format!(
                "rms_norm: weight.len()={} but hidden_size={}",
                weight.len(),
                hidden_size
            )));
        }
        if x.len() % hidden_size != 0 {
            return Err(TensorError::Other(format!(
                "rms_norm: x.len()={} is not a multiple of hidden_size={}",
                x.len(),
                hidden_size
            )));
        }

        let n_rows = x.len() / hidden_size;
        let mut result = vec![0.0f32; x.len()];

        for row in 0..n_rows {
            let offset = row * hidden_size;
            let row_data = &x[offset..offset + hidden_size];

            let mean_sq: f32 =
                row_data.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
            let rms = (mean_sq + eps).sqrt();

            for i in 0..hidden_size {
                result[offset + i] = row_data[i] * weight[i] / rms;
            }
        }

        Ok(result)
    }

    fn softmax(&self, x: &[f32], n_vocab: usize) -> Result<Vec<f32>> {
        if n_vocab == 0 {
            return Err(TensorError::Other(
                "softmax: n_vocab must be > 0".to_string(),
            ));
        }
        if x.len() % n_vocab != 0 {
            return Err(TensorError::Other(format!(
                "softmax: x.len()={} is not a multiple of n_vocab={}",
                x.len(),
                n_vocab
            )));
        }

        let n_chunks = x.len() / n_vocab;
        let mut result = vec![0.0f32; x.len()];

        for chunk in 0..n_chunks {
            let offset = chunk * n_vocab;
            let chunk_data = &x[offset..offset + n_vocab];

            let max_val = chunk_data
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for i in 0..n_vocab {
                let e = (chunk_data[i] - max_val).exp();
                result[offset + i] = e;
                sum += e;
            }

            for i in 0..n_vocab {
                result[offset + i] /= sum;
            }
        }

        Ok(result)
    }

    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        theta: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        if q.len() != n_heads_q * head_dim {
            return Err(TensorError::Other(format!(
                "rope: q.len()={} but expected n_heads_q*head_dim={}",
                q.len(),
                n_heads_q * head_dim
            )));
        }
        if k.len() != n_heads_k * head_dim {
            return Err(TensorError::Other(format!(
                "rope: k.len()={} but expected n_heads_k*head_dim={}",
                k.len(),
                n_heads_k * head_dim
            )));
        }

        let mut q_out = q.to_vec();
        apply_rope_inplace(&mut q_out, head_dim, pos, n_heads_q, theta);
        let mut k_out = k.to_vec();
        apply_rope_inplace(&mut k_out, head_dim, pos, n_heads_k, theta);

        Ok((q_out, k_out))
    }

    fn silu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| v / (1.0 + (-v).exp())).collect())
    }

    fn silu_gated(&self, gate: &[f32], up: &[f32]) -> Result<Vec<f32>> {
        if gate.len() != up.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![gate.len()],
                got: vec![up.len()],
            });
        }
        Ok(gate
            .iter()
            .zip(up.iter())
            .map(|(&g, &u)| (g / (1.0 + (-g).exp())) * u)
            .collect())
    }

    fn attention(
        &self,
        q: &[f32],
        k: &[f32],
        v: &[f32],
        t: usize,
        t_k: usize,
        h_q: usize,
        h_kv: usize,
        head_dim: usize,
    ) -> Result<Vec<f32>> {
        attention::causal_gqa_attention(q, k, v, t, t_k, h_q, h_kv, head_dim)
    }

    fn gather_rows(&self, table: &[f32], indices: &[u32], row_size: usize) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; indices.len() * row_size];
        for (i, &idx) in indices.iter().enumerate() {
            let idx = idx as usize;
            let start = idx * row_size;
            let end = start + row_size;
            if end > table.len() {
                return Err(TensorError::InvalidAxis {
                    axis: idx,
                    ndim: table.len() / row_size.max(1),
                });
            }
            out[i * row_size..(i + 1) * row_size].copy_from_slice(&table[start..end]);
        }
        Ok(out)
    }

    fn moe_route(
        &self,
        router_logits: &[f32],
        n_tokens: usize,
        n_experts: usize,
        top_k: usize,
    ) -> Result<(Vec<u32>, Vec<f32>)> {
        moe::route(router_logits, n_tokens, n_experts, top_k)
    }

    fn moe_combine(
        &self,
        expert_outputs: &[f32],
        weights: &[f32],
        n_tokens: usize,
        top_k: usize,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        moe::combine(expert_outputs, weights, n_tokens, top_k, hidden_size)
    }
}

/// Rotates every head of a packed `[n_heads, head_dim]` buffer in place,
/// shared by the `q` and `k` halves of [`ComputeBackend::rope`].
fn apply_rope_inplace(buf: &mut [f32], head_dim: usize, pos: usize, n_heads: usize, theta: f32) {
    for h in 0..n_heads {
        let offset = h * head_dim;
        for i in 0..head_dim / 2 {
            let freq = pos as f32 * (1.0 / theta.powf(2.0 * i as f32 / head_dim as f32));
            let cos_theta = freq.cos();
            let sin_theta = freq.sin();

            let x0 = buf[offset + 2 * i];
            let x1 = buf[offset + 2 * i + 1];
            buf[offset + 2 * i] = x0 * cos_theta - x1 * sin_theta;
            buf[offset + 2 * i + 1] = x0 * sin_theta + x1 * cos_theta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_identity() {
        let b = backend();
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let x = vec![5.0, 6.0, 7.0, 8.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_add() {
        let b = backend();
        let r = b.add(&[1.0, 2.0], &[3.0, 4.0]).unwrap();
        assert_eq!(r, vec![4.0, 6.0]);
    }

    #[test]
    fn test_mul() {
        let b = backend();
        let r = b.mul(&[2.0, 3.0], &[4.0, 5.0]).unwrap();
        assert_eq!(r, vec![8.0, 15.0]);
    }

    #[test]
    fn test_scale() {
        let b = backend();
        let r = b.scale(&[1.0, 2.0, 3.0], 2.0).unwrap();
        assert_eq!(r, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_silu() {
        let b = backend();
        let r = b.silu(&[0.0]).unwrap();
        assert!((r[0] - 0.0).abs() < 1e-6);

        let r2 = b.silu(&[1.0]).unwrap();
        assert!((r2[0] - 0.7310586).abs() < 1e-5);
    }

    #[test]
    fn test_silu_gated() {
        let b = backend();
        let r = b.silu_gated(&[0.0], &[5.0]).unwrap();
        assert!((r[0] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_silu_gated_length_mismatch() {
        let b = backend();
        assert!(b.silu_gated(&[1.0, 2.0], &[1.0]).is_err());
    }

    #[test]
    fn test_softmax() {
        let b = backend();
        let r = b.softmax(&[1.0, 2.0, 3.0], 3).unwrap();
        let sum: f32 = r.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(r[0] < r[1]);
        assert!(r[1] < r[2]);
    }

    #[test]
    fn test_rms_norm() {
        let b = backend();
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let w = vec![1.0, 1.0, 1.0, 1.0];
        let r = b.rms_norm(&x, &w, 1e-5, 4).unwrap();
        let rms = (7.5f32 + 1e-5).sqrt();
        assert!((r[0] - 1.0 / rms).abs() < 1e-5);
        assert!((r[1] - 2.0 / rms).abs() < 1e-5);
    }

    #[test]
    fn test_rope_zero_pos() {
        let b = backend();
        let q = vec![1.0, 0.0, 0.0, 1.0]; // 1 head, head_dim=4
        let k = vec![1.0, 0.0, 0.0, 1.0];
        let (q_out, k_out) = b.rope(&q, &k, 4, 0, 1, 1, 10000.0).unwrap();
        // At pos=0, theta=0 for all pairs, so cos=1, sin=0 => no rotation
        assert!((q_out[0] - 1.0).abs() < 1e-6);
        assert!((q_out[1] - 0.0).abs() < 1e-6);
        assert!((k_out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_add_length_mismatch() {
        let b = backend();
        assert!(b.add(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_gather_rows() {
        let b = backend();
        let table = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]; // 3 rows of width 2
        let r = b.gather_rows(&table, &[2, 0], 2).unwrap();
        assert_eq!(r, vec![2.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gather_rows_out_of_range() {
        let b = backend();
        let table = vec![0.0, 0.0];
        assert!(b.gather_rows(&table, &[5], 2).is_err());
    }
}
