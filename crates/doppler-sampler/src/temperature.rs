use crate::sampler::{Sampler, TokenLogit};

/// Scales all logits by dividing by a temperature value.
///
/// Higher temperatures produce more uniform distributions (more random),
/// while lower temperatures sharpen the distribution (more deterministic).
pub struct TemperatureSampler {
    temperature: f32,
}

impl TemperatureSampler {
    /// Create a new temperature sampler with the given temperature.
    pub fn new(temperature: f32) -> Self {
        Self { temperature }
    }
}

impl Sampler for TemperatureSampler {
    fn name(&self) -> &str {
        "temperature"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        // Clamp temperature to a very small positive value if it is <= 0.
        let temp = if self.temperature <= 0.0 {
            1e-7
        } else {
            self.temperature
        };

        for token in logits.iter_mut() {
            token.logit /= temp;
        }
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
    fn scales_logits_by_temperature() {
        let mut l = logits(&[2.0, 4.0]);
        TemperatureSampler::new(2.0).apply(&mut l);
        assert_eq!(l[0].logit, 1.0);
        assert_eq!(l[1].logit, 2.0);
    }

    #[test]
    fn preserves_ordering_for_greedy_selection() {
        // temperature=0 is the engine's greedy path: dividing by a tiny
        // epsilon must not flip the relative order of the logits.
        let mut l = logits(&[0.1, 0.9, 0.5]);
        TemperatureSampler::new(0.0).apply(&mut l);
        let max = l
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.logit.partial_cmp(&b.1.logit).unwrap())
            .unwrap();
        assert_eq!(max.0, 1);
        assert!(l.iter().all(|t| t.logit.is_finite()));
    }
}
