use super::BeliefPoint;

#[derive(Debug, Clone, PartialEq)]
pub struct BeliefMetrics {
    /// Shannon entropy in nats.
    pub entropy: f64,
    pub most_likely_state: usize,
    pub max_probability: f64,
    pub support: usize,
}

impl BeliefMetrics {
    pub fn from_belief(belief: &BeliefPoint) -> Self {
        let mut entropy = 0.0;
        let mut support = 0;
        for &p in belief.probabilities() {
            if p > 0.0 {
                entropy -= p * p.ln();
                support += 1;
            }
        }
        let most_likely_state = belief.most_likely_state().unwrap_or(0);
        let max_probability = belief.get(most_likely_state).unwrap_or(0.0);

        Self {
            entropy,
            most_likely_state,
            max_probability,
            support,
        }
    }
}
