use crate::sampler::{Sampler, TokenLogit};

/// Keeps only the top K tokens by logit value, discarding the rest.
pub struct TopKSampler {
    k: usize,
}

impl TopKSampler {
    /// Create a new top-K sampler that retains the `k` highest-logit tokens.
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl Sampler for TopKSampler {
    fn name(&self) -> &str {
        "top_k"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        if self.k == 0 || self.k >= logits.len() {
            return;
        }

        // Sort descending by logit value.
        logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));

        // Keep only the top K entries.
        logits.truncate(self.k);
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
    fn keeps_top_k_by_logit() {
        let mut l = logits(&[0.1, 0.9, 0.3, 0.7]);
        TopKSampler::new(2).apply(&mut l);
        assert_eq!(l.len(), 2);
        let ids: Vec<u32> = l.iter().map(|t| t.token_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn k_zero_is_noop() {
        let mut l = logits(&[0.1, 0.9, 0.3]);
        TopKSampler::new(0).apply(&mut l);
        assert_eq!(l.len(), 3);
    }

    #[test]
    fn k_larger_than_len_is_noop() {
        let mut l = logits(&[0.1, 0.9]);
        TopKSampler::new(10).apply(&mut l);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn ties_still_select_k_distinct_indices() {
        // Uniform logits over 4 experts, top-2: any two distinct indices are valid.
        let mut l = logits(&[0.0, 0.0, 0.0, 0.0]);
        TopKSampler::new(2).apply(&mut l);
        assert_eq!(l.len(), 2);
        assert_ne!(l[0].token_id, l[1].token_id);
    }
}
