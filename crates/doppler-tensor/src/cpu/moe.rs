// Reference mixture-of-experts routing and combine.
//
// Ground truth for the GPU MoE kernels' gather/scatter dispatch; this
// implementation works one token at a time and makes no attempt at the
// batched gather the device-side kernel uses.

use crate::error::{Result, TensorError};

/// Softmaxes `n_experts` logits per token, keeps the top `top_k`, and
/// renormalizes their weights to sum to 1. Returns `(expert_ids, weights)`,
/// each `n_tokens * top_k` long, grouped by token in descending weight order.
pub fn route(
    router_logits: &[f32],
    n_tokens: usize,
    n_experts: usize,
    top_k: usize,
) -> Result<(Vec<u32>, Vec<f32>)> {
    if top_k == 0 || top_k > n_experts {
        return Err(TensorError::Other(format!(
            "moe_route: top_k={} must be in 1..=n_experts={}",
            top_k, n_experts
        )));
    }
    if router_logits.len() != n_tokens * n_experts {
        return Err(TensorError::Other(format!(
            "moe_route: router_logits.len()={} but expected n_tokens*n_experts={}",
            router_logits.len(),
            n_tokens * n_experts
        )));
    }

    let mut expert_ids = vec![0u32; n_tokens * top_k];
    let mut weights = vec![0.0f32; n_tokens * top_k];

    for tok in 0..n_tokens {
        let logits = &router_logits[tok * n_experts..(tok + 1) * n_experts];

        let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut probs: Vec<f32> = logits.iter().map(|&x| (x - max_val).exp()).collect();
        let sum: f32 = probs.iter().sum();
        for p in probs.iter_mut() {
            *p /= sum;
        }

        let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ranked.truncate(top_k);

        let top_sum: f32 = ranked.iter().map(|(_, w)| w).sum();
        for (slot, (expert, w)) in ranked.into_iter().enumerate() {
            expert_ids[tok * top_k + slot] = expert as u32;
            weights[tok * top_k + slot] = w / top_sum;
        }
    }

    Ok((expert_ids, weights))
}

/// Weighted scatter-add of each token's routed expert outputs back into one
/// row per token. `expert_outputs` is `[n_tokens * top_k, hidden_size]` in
/// the same token/slot order `route` returned; `weights` is `[n_tokens *
/// top_k]`. Returns `[n_tokens, hidden_size]`.
pub fn combine(
    expert_outputs: &[f32],
    weights: &[f32],
    n_tokens: usize,
    top_k: usize,
    hidden_size: usize,
) -> Result<Vec<f32>> {
    if expert_outputs.len() != n_tokens * top_k * hidden_size {
        return Err(TensorError::Other(format!(
            "moe_combine: expert_outputs.len()={} but expected {}",
            expert_outputs.len(),
            n_tokens * top_k * hidden_size
        )));
    }
    if weights.len() != n_tokens * top_k {
        return Err(TensorError::Other(format!(
            "moe_combine: weights.len()={} but expected n_tokens*top_k={}",
            weights.len(),
            n_tokens * top_k
        )));
    }

    let mut out = vec![0.0f32; n_tokens * hidden_size];
    for tok in 0..n_tokens {
        let out_row = &mut out[tok * hidden_size..(tok + 1) * hidden_size];
        for slot in 0..top_k {
            let w = weights[tok * top_k + slot];
            let expert_row = &expert_outputs
                [(tok * top_k + slot) * hidden_size..(tok * top_k + slot + 1) * hidden_size];
            for d in 0..hidden_size {
                out_row[d] += w * expert_row[d];
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_picks_top_k_and_renormalizes() {
        // 1 token, 4 experts, top_k=2: experts 2 and 3 clearly dominate.
        let logits = vec![0.0, 0.0, 10.0, 9.0];
        let (ids, weights) = route(&logits, 1, 4, 2).unwrap();
        assert_eq!(ids, vec![2, 3]);
        let sum: f32 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn test_route_invalid_top_k() {
        assert!(route(&[0.0; 4], 1, 4, 0).is_err());
        assert!(route(&[0.0; 4], 1, 4, 5).is_err());
    }

    #[test]
    fn test_combine_weighted_sum() {
        // 1 token, top_k=2, hidden_size=2.
        let expert_outputs = vec![1.0, 1.0, 3.0, 3.0];
        let weights = vec![0.25, 0.75];
        let out = combine(&expert_outputs, &weights, 1, 2, 2).unwrap();
        assert!((out[0] - 2.5).abs() < 1e-5);
        assert!((out[1] - 2.5).abs() < 1e-5);
    }
}
