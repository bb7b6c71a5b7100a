use crate::sampler::{Sampler, TokenLogit};
use rand::rngs::StdRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use std::sync::Mutex;

/// Greedy sampler: selects the single token with the highest logit.
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        // Sort descending by logit value.
        logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));

        // Keep only the top 1.
        logits.truncate(1);
    }
}

/// Distribution-based sampler: converts logits to probabilities via softmax,
/// then samples from the resulting distribution using a seeded RNG. The RNG
/// advances across calls so consecutive decode steps draw distinct tokens
/// rather than replaying the same draw from a reseeded generator; a `Mutex`
/// gives it interior mutability under the `Sampler::apply(&self, ..)` trait
/// signature while keeping the type `Sync`.
pub struct DistSampler {
    rng: Mutex<StdRng>,
}

impl DistSampler {
    /// Create a new distribution sampler with the given seed for reproducibility.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Sampler for DistSampler {
    fn name(&self) -> &str {
        "dist"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }
        if logits.len() == 1 {
            return;
        }

        // Compute softmax probabilities.
        let max_logit = logits
            .iter()
            .map(|t| t.logit)
            .fold(f32::NEG_INFINITY, f32::max);

        let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

        let dist = match WeightedIndex::new(&probs) {
            Ok(d) => d,
            Err(_) => {
                // Fallback: keep only the first token if weights are invalid.
                logits.truncate(1);
                return;
            }
        };

        let mut rng = self.rng.lock().unwrap();
        let selected_index = dist.sample(&mut *rng);
        let selected = logits[selected_index].clone();
        drop(rng);

        logits.clear();
        logits.push(selected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits(vals: &[f32]) -> Vec<TokenLogit> {
        vals.iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit { token_id: i as u32, logit })
            .collect()
    }

    #[test]
    fn greedy_picks_the_max_logit() {
        let mut l = logits(&[0.1, 0.9, 0.3]);
        GreedySampler::new().apply(&mut l);
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].token_id, 1);
    }

    #[test]
    fn greedy_empty_is_noop() {
        let mut l: Vec<TokenLogit> = Vec::new();
        GreedySampler::new().apply(&mut l);
        assert!(l.is_empty());
    }

    #[test]
    fn dist_single_token_is_noop() {
        let mut l = logits(&[5.0]);
        DistSampler::new(0).apply(&mut l);
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].token_id, 0);
    }

    #[test]
    fn dist_selects_a_single_token_from_the_set() {
        let mut l = logits(&[1.0, 2.0, 3.0]);
        let original_ids: Vec<u32> = l.iter().map(|t| t.token_id).collect();
        DistSampler::new(42).apply(&mut l);
        assert_eq!(l.len(), 1);
        assert!(original_ids.contains(&l[0].token_id));
    }

    #[test]
    fn dist_is_deterministic_for_a_fixed_seed() {
        let mut a = logits(&[1.0, 2.0, 3.0, 4.0]);
        let mut b = logits(&[1.0, 2.0, 3.0, 4.0]);
        DistSampler::new(7).apply(&mut a);
        DistSampler::new(7).apply(&mut b);
        assert_eq!(a[0].token_id, b[0].token_id);
    }
}
