use cpt_core::belief::CacheStats;
use cpt_core::instance::CostLimits;
use serde::Serialize;

use super::RunRecord;

/// Welford accumulator for mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance; zero with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn standard_error(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.std_dev() / (self.count as f64).sqrt()
        }
    }
}

/// Committed result of a successful `run` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationStatistics {
    pub num_runs: usize,
    pub num_agents: usize,
    pub num_decisions: usize,
    pub expected_reward: f64,
    pub reward: RunningMoments,
    /// Per-resource moments of the total trajectory cost.
    pub total_cost: Vec<RunningMoments>,
    pub mean_total_cost: Vec<f64>,
    /// `[k][t]`
    pub mean_instantaneous_cost: Vec<Vec<f64>>,
    pub limits: CostLimits,
    /// Budget regime only.
    pub violation_probability_total: Option<Vec<f64>>,
    /// Instantaneous regime only, `[k][t]`.
    pub violation_probability_instantaneous: Option<Vec<Vec<f64>>>,
    pub sampler_fallbacks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belief_cache: Option<Vec<CacheStats>>,
}

impl EvaluationStatistics {
    pub fn num_domain_resources(&self) -> usize {
        self.mean_total_cost.len()
    }

    pub fn mean_total_cost(&self, resource: usize) -> Option<f64> {
        self.mean_total_cost.get(resource).copied()
    }

    pub fn mean_instantaneous_cost(&self, resource: usize, epoch: usize) -> Option<f64> {
        self.mean_instantaneous_cost.get(resource)?.get(epoch).copied()
    }

    pub fn violation_probability_total(&self, resource: usize) -> Option<f64> {
        self.violation_probability_total.as_ref()?.get(resource).copied()
    }

    pub fn violation_probability_instantaneous(&self, resource: usize, epoch: usize) -> Option<f64> {
        self.violation_probability_instantaneous
            .as_ref()?
            .get(resource)?
            .get(epoch)
            .copied()
    }
}

/// Costs and reward collected along one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunTotals {
    pub reward: f64,
    /// `[k][t]`
    pub epoch_costs: Vec<Vec<f64>>,
    pub fallbacks: u64,
}

impl RunTotals {
    pub fn new(num_resources: usize, num_decisions: usize) -> Self {
        Self {
            reward: 0.0,
            epoch_costs: vec![vec![0.0; num_decisions]; num_resources],
            fallbacks: 0,
        }
    }

    pub fn add_cost(&mut self, resource: usize, epoch: usize, cost: f64) {
        self.epoch_costs[resource][epoch] += cost;
    }

    pub fn total_cost(&self, resource: usize) -> f64 {
        self.epoch_costs[resource].iter().sum()
    }
}

#[derive(Debug, Clone)]
enum Violations {
    Budget { limits: Vec<f64>, counts: Vec<u64> },
    Instantaneous {
        limits: Vec<Vec<f64>>,
        counts: Vec<Vec<u64>>,
    },
}

/// In-progress statistics of a `run` call; dropped on any failure.
#[derive(Debug, Clone)]
pub(crate) struct Accumulator {
    num_runs: usize,
    num_agents: usize,
    num_decisions: usize,
    limits: CostLimits,
    reward_mean: f64,
    total_cost_mean: Vec<f64>,
    epoch_cost_mean: Vec<Vec<f64>>,
    reward_moments: RunningMoments,
    cost_moments: Vec<RunningMoments>,
    violations: Violations,
    fallbacks: u64,
}

impl Accumulator {
    pub fn new(
        num_runs: usize,
        num_agents: usize,
        num_decisions: usize,
        limits: &CostLimits,
    ) -> Self {
        let num_resources = limits.num_resources();
        let violations = match limits {
            CostLimits::Budget(limits) => Violations::Budget {
                limits: limits.clone(),
                counts: vec![0; num_resources],
            },
            CostLimits::Instantaneous(limits) => Violations::Instantaneous {
                limits: limits.clone(),
                counts: vec![vec![0; num_decisions]; num_resources],
            },
        };
        Self {
            num_runs,
            num_agents,
            num_decisions,
            limits: limits.clone(),
            reward_mean: 0.0,
            total_cost_mean: vec![0.0; num_resources],
            epoch_cost_mean: vec![vec![0.0; num_decisions]; num_resources],
            reward_moments: RunningMoments::default(),
            cost_moments: vec![RunningMoments::default(); num_resources],
            violations,
            fallbacks: 0,
        }
    }

    /// Folds one finished trajectory in and returns its record.
    pub fn fold_run(&mut self, run: usize, totals: &RunTotals) -> RunRecord {
        let n = self.num_runs as f64;
        self.reward_mean += totals.reward / n;
        self.reward_moments.push(totals.reward);
        self.fallbacks += totals.fallbacks;

        let num_resources = self.total_cost_mean.len();
        let mut total_costs = Vec::with_capacity(num_resources);
        let mut violated = vec![false; num_resources];
        for k in 0..num_resources {
            let total = totals.total_cost(k);
            total_costs.push(total);
            self.total_cost_mean[k] += total / n;
            self.cost_moments[k].push(total);
            for (t, cost) in totals.epoch_costs[k].iter().enumerate() {
                self.epoch_cost_mean[k][t] += cost / n;
            }

            match &mut self.violations {
                Violations::Budget { limits, counts } => {
                    if total > limits[k] {
                        counts[k] += 1;
                        violated[k] = true;
                    }
                }
                Violations::Instantaneous { limits, counts } => {
                    for (t, cost) in totals.epoch_costs[k].iter().enumerate() {
                        if *cost > limits[k][t] {
                            counts[k][t] += 1;
                            violated[k] = true;
                        }
                    }
                }
            }
        }

        RunRecord {
            run,
            reward: totals.reward,
            total_costs,
            epoch_costs: totals.epoch_costs.clone(),
            violated,
            sampler_fallbacks: totals.fallbacks,
        }
    }

    pub fn finish(self, belief_cache: Option<Vec<CacheStats>>) -> EvaluationStatistics {
        let n = self.num_runs as f64;
        let (violation_probability_total, violation_probability_instantaneous) =
            match self.violations {
                Violations::Budget { counts, .. } => (
                    Some(counts.into_iter().map(|c| c as f64 / n).collect()),
                    None,
                ),
                Violations::Instantaneous { counts, .. } => (
                    None,
                    Some(
                        counts
                            .into_iter()
                            .map(|row| row.into_iter().map(|c| c as f64 / n).collect())
                            .collect(),
                    ),
                ),
            };

        EvaluationStatistics {
            num_runs: self.num_runs,
            num_agents: self.num_agents,
            num_decisions: self.num_decisions,
            expected_reward: self.reward_mean,
            reward: self.reward_moments,
            total_cost: self.cost_moments,
            mean_total_cost: self.total_cost_mean,
            mean_instantaneous_cost: self.epoch_cost_mean,
            limits: self.limits,
            violation_probability_total,
            violation_probability_instantaneous,
            sampler_fallbacks: self.fallbacks,
            belief_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut moments = RunningMoments::default();
        values.iter().for_each(|v| moments.push(*v));
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 7.0;
        assert!((moments.mean() - mean).abs() < 1e-12);
        assert!((moments.variance() - var).abs() < 1e-12);
        assert_eq!(moments.count(), 8);
    }

    #[test]
    fn single_sample_has_zero_variance() {
        let mut moments = RunningMoments::default();
        moments.push(3.0);
        assert_eq!(moments.variance(), 0.0);
        assert_eq!(moments.standard_error(), 0.0);
    }

    #[test]
    fn budget_regime_counts_total_cost_only() {
        let mut acc = Accumulator::new(2, 1, 2, &CostLimits::Budget(vec![2.0]));
        let mut over = RunTotals::new(1, 2);
        over.add_cost(0, 0, 3.0);
        let record = acc.fold_run(0, &over);
        assert_eq!(record.violated, vec![true]);
        let mut under = RunTotals::new(1, 2);
        under.add_cost(0, 1, 1.0);
        acc.fold_run(1, &under);
        let stats = acc.finish(None);
        assert_eq!(stats.violation_probability_total(0), Some(0.5));
        assert_eq!(stats.violation_probability_instantaneous(0, 0), None);
        assert_eq!(stats.mean_instantaneous_cost(0, 0), Some(1.5));
        assert_eq!(stats.mean_instantaneous_cost(0, 1), Some(0.5));
        assert_eq!(stats.mean_total_cost(0), Some(2.0));
    }

    #[test]
    fn instantaneous_regime_counts_each_epoch() {
        let limits = CostLimits::Instantaneous(vec![vec![2.0, 0.5]]);
        let mut acc = Accumulator::new(1, 1, 2, &limits);
        let mut totals = RunTotals::new(1, 2);
        totals.add_cost(0, 0, 3.0);
        totals.add_cost(0, 1, 1.0);
        acc.fold_run(0, &totals);
        let stats = acc.finish(None);
        assert_eq!(stats.violation_probability_instantaneous(0, 0), Some(1.0));
        assert_eq!(stats.violation_probability_instantaneous(0, 1), Some(1.0));
        assert_eq!(stats.violation_probability_total(0), None);
    }
}
