// Reference causal grouped-query attention.
//
// Ground truth for the GPU kernel library's three dispatch tiers
// (streaming / tiled_small / tiled_large); this implementation always
// takes the O(T * T_k) path and makes no tiling decision.

use crate::error::{Result, TensorError};

#[allow(clippy::too_many_arguments)]
pub fn causal_gqa_attention(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    t: usize,
    t_k: usize,
    h_q: usize,
    h_kv: usize,
    head_dim: usize,
) -> Result<Vec<f32>> {
    if h_kv == 0 || h_q % h_kv != 0 {
        return Err(TensorError::Other(format!(
            "attention: h_q={} is not a multiple of h_kv={}",
            h_q, h_kv
        )));
    }
    if q.len() != t * h_q * head_dim {
        return Err(TensorError::Other(format!(
            "attention: q.len()={} but expected t*h_q*head_dim={}",
            q.len(),
            t * h_q * head_dim
        )));
    }
    if k.len() != t_k * h_kv * head_dim || v.len() != t_k * h_kv * head_dim {
        return Err(TensorError::Other(format!(
            "attention: k/v.len() must equal t_k*h_kv*head_dim={}",
            t_k * h_kv * head_dim
        )));
    }
    if t > t_k {
        return Err(TensorError::Other(format!(
            "attention: t={} cannot exceed the cache length t_k={}",
            t, t_k
        )));
    }

    let group = h_q / h_kv;
    let scale = 1.0 / (head_dim as f32).sqrt();
    // The cache already holds this call's t tokens appended at its tail, so
    // query position i (0-indexed within this call) may attend up to
    // absolute key position (t_k - t + i), inclusive.
    let base_pos = t_k - t;

    let mut out = vec![0.0f32; t * h_q * head_dim];
    let mut scores = vec![0.0f32; t_k];

    for qi in 0..t {
        let causal_limit = base_pos + qi; // inclusive
        for hq in 0..h_q {
            let hkv = hq / group;
            let q_row = &q[(qi * h_q + hq) * head_dim..(qi * h_q + hq + 1) * head_dim];

            let mut max_score = f32::NEG_INFINITY;
            for kp in 0..=causal_limit {
                let k_row = &k[(kp * h_kv + hkv) * head_dim..(kp * h_kv + hkv + 1) * head_dim];
                let dot: f32 = q_row.iter().zip(k_row.iter()).map(|(&a, &b)| a * b).sum();
                let s = dot * scale;
                scores[kp] = s;
                if s > max_score {
                    max_score = s;
                }
            }

            let mut sum = 0.0f32;
            for kp in 0..=causal_limit {
                let e = (scores[kp] - max_score).exp();
                scores[kp] = e;
                sum += e;
            }

            let out_row =
                &mut out[(qi * h_q + hq) * head_dim..(qi * h_q + hq + 1) * head_dim];
            for kp in 0..=causal_limit {
                let weight = scores[kp] / sum;
                let v_row = &v[(kp * h_kv + hkv) * head_dim..(kp * h_kv + hkv + 1) * head_dim];
                for d in 0..head_dim {
                    out_row[d] += weight * v_row[d];
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_token_attends_to_self() {
        // t=1, t_k=1, h_q=h_kv=1, head_dim=2: output must equal v exactly.
        let q = vec![1.0, 0.0];
        let k = vec![1.0, 0.0];
        let v = vec![3.0, 4.0];
        let out = causal_gqa_attention(&q, &k, &v, 1, 1, 1, 1, 2).unwrap();
        assert!((out[0] - 3.0).abs() < 1e-5);
        assert!((out[1] - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_causal_mask_excludes_future() {
        // decode step: cache holds 2 tokens (t_k=2), current call appends 1
        // (t=1), so base_pos=1 and the query may see both cache slots.
        let q = vec![1.0, 0.0];
        let k = vec![1.0, 0.0, 1.0, 0.0];
        let v = vec![1.0, 0.0, 0.0, 1.0];
        let out = causal_gqa_attention(&q, &k, &v, 1, 2, 1, 1, 2).unwrap();
        // Equal scores over both positions -> averages v rows.
        assert!((out[0] - 0.5).abs() < 1e-5);
        assert!((out[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_gqa_group_sharing() {
        // h_q=2, h_kv=1: both query heads read the same KV head.
        let q = vec![1.0, 0.0, 1.0, 0.0]; // 1 token, 2 heads
        let k = vec![1.0, 0.0];
        let v = vec![5.0, 6.0];
        let out = causal_gqa_attention(&q, &k, &v, 1, 1, 2, 1, 2).unwrap();
        assert_eq!(out, vec![5.0, 6.0, 5.0, 6.0]);
    }

    #[test]
    fn test_invalid_group_size() {
        assert!(causal_gqa_attention(&[0.0; 4], &[0.0; 4], &[0.0; 4], 1, 1, 3, 2, 2).is_err());
    }
}
