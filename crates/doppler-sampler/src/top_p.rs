use crate::sampler::{Sampler, TokenLogit};

/// Nucleus sampling: keeps the smallest set of tokens whose cumulative
/// probability exceeds the threshold `p`.
pub struct TopPSampler {
    p: f32,
}

impl TopPSampler {
    /// Create a new top-p (nucleus) sampler with the given probability threshold.
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for TopPSampler {
    fn name(&self) -> &str {
        "top_p"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        // Sort descending by logit value.
        logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));

        // Compute softmax probabilities.
        let max_logit = logits[0].logit;
        let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

        // Find the cutoff index: keep tokens until cumulative probability exceeds p.
        let mut cumulative = 0.0f32;
        let mut cutoff = logits.len();
        for (i, &prob) in probs.iter().enumerate() {
            cumulative += prob;
            if cumulative > self.p {
                cutoff = i + 1;
                break;
            }
        }

        // Always keep at least one token.
        if cutoff == 0 {
            cutoff = 1;
        }

        logits.truncate(cutoff);
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
    fn keeps_smallest_nucleus_above_threshold() {
        // One dominant logit: p=0.9 should keep just the top token.
        let mut l = logits(&[10.0, 0.0, 0.0, 0.0]);
        TopPSampler::new(0.9).apply(&mut l);
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].token_id, 0);
    }

    #[test]
    fn p_near_one_keeps_most_tokens() {
        let mut l = logits(&[1.0, 1.0, 1.0, 1.0]);
        TopPSampler::new(0.99).apply(&mut l);
        assert_eq!(l.len(), 4);
    }

    #[test]
    fn always_keeps_at_least_one_token() {
        let mut l = logits(&[1.0, 1.0]);
        TopPSampler::new(0.0).apply(&mut l);
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn empty_logits_is_noop() {
        let mut l: Vec<TokenLogit> = Vec::new();
        TopPSampler::new(0.9).apply(&mut l);
        assert!(l.is_empty());
    }
}
