use cpt_core::belief::telemetry::BeliefMetrics;
use cpt_core::belief::{BeliefFilter, BeliefPoint, CacheStats};
use cpt_core::instance::{CostLimits, CpomdpInstance};
use cpt_core::model::{DecisionModel, ModelError};
use cpt_core::sample::sample_index;
use cpt_policy::PomdpOracle;
use rand::Rng;
use tracing::{Level, event};

use super::stats::{Accumulator, EvaluationStatistics, RunTotals};
use super::{check_joint_action, EvaluationError, RunSink};

const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Monte-Carlo evaluator for partially observable instances.
///
/// Each agent keeps an exact belief, advanced with its own model after every
/// observation. Only budget limits apply.
#[derive(Debug)]
pub struct CpomdpEvaluator<'a> {
    instance: &'a CpomdpInstance,
    cache_capacity: usize,
    statistics: Option<EvaluationStatistics>,
}

impl<'a> CpomdpEvaluator<'a> {
    pub fn new(instance: &'a CpomdpInstance) -> Self {
        Self::with_cache_capacity(instance, DEFAULT_CACHE_CAPACITY)
    }

    /// `capacity == 0` disables the shared marginals cache.
    pub fn with_cache_capacity(instance: &'a CpomdpInstance, capacity: usize) -> Self {
        Self {
            instance,
            cache_capacity: capacity,
            statistics: None,
        }
    }

    pub fn instance(&self) -> &CpomdpInstance {
        self.instance
    }

    pub fn run<R: Rng + ?Sized>(
        &mut self,
        oracle: &mut dyn PomdpOracle,
        rng: &mut R,
        num_runs: usize,
    ) -> Result<f64, EvaluationError> {
        self.run_with_sink(oracle, rng, num_runs, &mut ())
    }

    pub fn run_with_sink<R: Rng + ?Sized>(
        &mut self,
        oracle: &mut dyn PomdpOracle,
        rng: &mut R,
        num_runs: usize,
        sink: &mut dyn RunSink,
    ) -> Result<f64, EvaluationError> {
        self.statistics = None;
        if num_runs == 0 {
            return Err(EvaluationError::NoRuns);
        }
        let instance = self.instance;
        for model in instance.models() {
            model.validate()?;
            if model.dynamics().has_time_transitions() {
                return Err(ModelError::TimeIndexedFiltering.into());
            }
        }

        let limits = CostLimits::Budget(instance.cost_limits().to_vec());
        let mut acc = Accumulator::new(
            num_runs,
            instance.num_agents(),
            instance.num_decisions(),
            &limits,
        );
        let mut filters: Vec<BeliefFilter> = instance
            .models()
            .iter()
            .map(|_| BeliefFilter::new(self.cache_capacity))
            .collect();

        oracle.begin_simulation(num_runs)?;
        for run in 0..num_runs {
            oracle.begin_trajectory(run)?;
            let totals = self.simulate(oracle, rng, run, &mut filters)?;
            let record = acc.fold_run(run, &totals);
            sink.record(&record)?;
            event!(
                target: "cpt_bench::simulation",
                Level::TRACE,
                run,
                reward = record.reward,
                fallbacks = record.sampler_fallbacks,
                "trajectory finished"
            );
        }

        let cache: Vec<CacheStats> = filters.iter().map(BeliefFilter::stats).collect();
        let statistics = acc.finish(Some(cache));
        let expected = statistics.expected_reward;
        event!(
            target: "cpt_bench::simulation",
            Level::INFO,
            kind = "cpomdp",
            num_runs,
            expected_reward = expected,
            fallbacks = statistics.sampler_fallbacks,
            "evaluation finished"
        );
        self.statistics = Some(statistics);
        Ok(expected)
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        oracle: &mut dyn PomdpOracle,
        rng: &mut R,
        run: usize,
        filters: &mut [BeliefFilter],
    ) -> Result<RunTotals, EvaluationError> {
        let models = self.instance.models();
        let num_resources = self.instance.num_domain_resources();
        let num_decisions = self.instance.num_decisions();
        let mut totals = RunTotals::new(num_resources, num_decisions);

        let mut states = Vec::with_capacity(models.len());
        for model in models {
            let draw = sample_index(model.initial_belief().probabilities(), rng)?;
            if draw.is_fallback() {
                totals.fallbacks += 1;
            }
            states.push(draw.into_item());
        }
        let mut beliefs: Vec<BeliefPoint> =
            models.iter().map(|m| m.initial_belief().clone()).collect();
        let mut observations = vec![0; models.len()];

        for epoch in 0..num_decisions {
            let actions = oracle.choose_joint_action(epoch, &beliefs)?;
            check_joint_action(&actions, models)?;

            for (agent, model) in models.iter().enumerate() {
                let (state, action) = (states[agent], actions[agent]);
                totals.reward += model.reward_at(epoch, state, action)?;
                for resource in 0..num_resources {
                    totals.add_cost(resource, epoch, model.cost_at(resource, state, action)?);
                }

                let next = model.transition_at(epoch, state, action)?.sample(rng)?;
                let drifted = next.is_fallback();
                let next_state = next.into_item();
                let observed = sample_index(model.observation_row(action, next_state)?, rng)?;
                if drifted || observed.is_fallback() {
                    totals.fallbacks += 1;
                    event!(
                        target: "cpt_bench::simulation",
                        Level::DEBUG,
                        run,
                        epoch,
                        agent,
                        "sampler fell back to the last positive entry"
                    );
                }
                states[agent] = next_state;
                observations[agent] = observed.into_item();
                beliefs[agent] =
                    filters[agent].update(model, &beliefs[agent], action, observations[agent])?;
                if tracing::enabled!(Level::TRACE) {
                    let metrics = BeliefMetrics::from_belief(&beliefs[agent]);
                    event!(
                        target: "cpt_bench::simulation",
                        Level::TRACE,
                        run,
                        epoch,
                        agent,
                        observation = observations[agent],
                        entropy = metrics.entropy,
                        support = metrics.support,
                        most_likely = metrics.most_likely_state,
                        "belief updated"
                    );
                }
            }

            oracle.report_outcome(epoch, &actions, &observations)?;
        }
        Ok(totals)
    }

    pub fn statistics(&self) -> Option<&EvaluationStatistics> {
        self.statistics.as_ref()
    }

    pub fn expected_reward(&self) -> Option<f64> {
        self.statistics.as_ref().map(|s| s.expected_reward)
    }

    pub fn mean_total_cost(&self, resource: usize) -> Option<f64> {
        self.statistics.as_ref()?.mean_total_cost(resource)
    }

    pub fn mean_instantaneous_cost(&self, resource: usize, epoch: usize) -> Option<f64> {
        self.statistics.as_ref()?.mean_instantaneous_cost(resource, epoch)
    }

    pub fn violation_probability_total(&self, resource: usize) -> Option<f64> {
        self.statistics.as_ref()?.violation_probability_total(resource)
    }
}
