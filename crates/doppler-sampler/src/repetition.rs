use crate::sampler::{Sampler, TokenLogit};

/// Applies a repetition penalty to tokens that have appeared recently.
///
/// For tokens found in `recent_tokens`:
/// - Positive logits are divided by `penalty`.
/// - Negative logits are multiplied by `penalty`.
///
/// This discourages the model from repeating the same tokens.
pub struct RepetitionPenaltySampler {
    penalty: f32,
    recent_tokens: Vec<u32>,
    max_history: usize,
}

impl RepetitionPenaltySampler {
    /// Create a new repetition penalty sampler.
    ///
    /// - `penalty`: the penalty factor (1.0 = no penalty).
    /// - `max_history`: maximum number of recent tokens to track.
    pub fn new(penalty: f32, max_history: usize) -> Self {
        Self {
            penalty,
            recent_tokens: Vec::new(),
            max_history,
        }
    }

    /// Record a generated token so it will be penalized in future sampling steps.
    pub fn add_token(&mut self, token: u32) {
        self.recent_tokens.push(token);
        if self.recent_tokens.len() > self.max_history {
            self.recent_tokens.remove(0);
        }
    }
}

impl Sampler for RepetitionPenaltySampler {
    fn name(&self) -> &str {
        "repetition_penalty"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        for token in logits.iter_mut() {
            if self.recent_tokens.contains(&token.token_id) {
                if token.logit > 0.0 {
                    token.logit /= self.penalty;
                } else {
                    token.logit *= self.penalty;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.recent_tokens.clear();
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
    fn penalizes_positive_logit_of_seen_token() {
        let mut s = RepetitionPenaltySampler::new(2.0, 64);
        s.add_token(1);
        let mut l = logits(&[1.0, 4.0]);
        s.apply(&mut l);
        assert_eq!(l[0].logit, 1.0);
        assert_eq!(l[1].logit, 2.0);
    }

    #[test]
    fn penalizes_negative_logit_of_seen_token() {
        let mut s = RepetitionPenaltySampler::new(2.0, 64);
        s.add_token(0);
        let mut l = logits(&[-1.0, 4.0]);
        s.apply(&mut l);
        assert_eq!(l[0].logit, -2.0);
        assert_eq!(l[1].logit, 4.0);
    }

    #[test]
    fn history_evicts_oldest_beyond_max() {
        let mut s = RepetitionPenaltySampler::new(2.0, 2);
        s.add_token(0);
        s.add_token(1);
        s.add_token(2);
        assert_eq!(s.recent_tokens, vec![1, 2]);
    }

    #[test]
    fn reset_clears_history() {
        let mut s = RepetitionPenaltySampler::new(2.0, 64);
        s.add_token(0);
        s.reset();
        let mut l = logits(&[4.0]);
        s.apply(&mut l);
        assert_eq!(l[0].logit, 4.0);
    }
}
