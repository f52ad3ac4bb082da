use cpt_core::instance::CmdpInstance;
use cpt_core::model::DecisionModel;
use cpt_policy::MdpOracle;
use rand::Rng;
use tracing::{Level, event};

use super::stats::{Accumulator, EvaluationStatistics, RunTotals};
use super::{check_joint_action, EvaluationError, RunSink};

/// Monte-Carlo evaluator for fully observable instances.
#[derive(Debug)]
pub struct CmdpEvaluator<'a> {
    instance: &'a CmdpInstance,
    statistics: Option<EvaluationStatistics>,
}

impl<'a> CmdpEvaluator<'a> {
    pub fn new(instance: &'a CmdpInstance) -> Self {
        Self {
            instance,
            statistics: None,
        }
    }

    pub fn instance(&self) -> &CmdpInstance {
        self.instance
    }

    /// Simulates `num_runs` trajectories and returns the expected joint reward.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        oracle: &mut dyn MdpOracle,
        rng: &mut R,
        num_runs: usize,
    ) -> Result<f64, EvaluationError> {
        self.run_with_sink(oracle, rng, num_runs, &mut ())
    }

    /// As [`run`](Self::run), handing every finished trajectory to `sink`.
    pub fn run_with_sink<R: Rng + ?Sized>(
        &mut self,
        oracle: &mut dyn MdpOracle,
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
        }

        let num_decisions = instance.num_decisions();
        let mut acc = Accumulator::new(
            num_runs,
            instance.num_agents(),
            num_decisions,
            instance.cost_limits(),
        );

        oracle.begin_simulation(num_runs)?;
        for run in 0..num_runs {
            oracle.begin_trajectory(run)?;
            let totals = self.simulate(oracle, rng, run)?;
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

        let statistics = acc.finish(None);
        let expected = statistics.expected_reward;
        event!(
            target: "cpt_bench::simulation",
            Level::INFO,
            kind = "cmdp",
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
        oracle: &mut dyn MdpOracle,
        rng: &mut R,
        run: usize,
    ) -> Result<RunTotals, EvaluationError> {
        let models = self.instance.models();
        let num_resources = self.instance.num_domain_resources();
        let num_decisions = self.instance.num_decisions();
        let mut totals = RunTotals::new(num_resources, num_decisions);
        let mut states: Vec<usize> = models.iter().map(|m| m.initial_state()).collect();

        for epoch in 0..num_decisions {
            let actions = oracle.choose_joint_action(epoch, &states)?;
            check_joint_action(&actions, models)?;

            for (agent, model) in models.iter().enumerate() {
                let (state, action) = (states[agent], actions[agent]);
                totals.reward += model.reward_at(epoch, state, action)?;
                for resource in 0..num_resources {
                    totals.add_cost(resource, epoch, model.cost_at(resource, state, action)?);
                }
                let draw = model.transition_at(epoch, state, action)?.sample(rng)?;
                if draw.is_fallback() {
                    totals.fallbacks += 1;
                    event!(
                        target: "cpt_bench::simulation",
                        Level::DEBUG,
                        run,
                        epoch,
                        agent,
                        "transition sampler fell back to the last positive entry"
                    );
                }
                states[agent] = draw.into_item();
            }
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

    pub fn violation_probability_instantaneous(&self, resource: usize, epoch: usize) -> Option<f64> {
        self.statistics
            .as_ref()?
            .violation_probability_instantaneous(resource, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::RunRecord;
    use cpt_core::model::{Cmdp, Transition};
    use cpt_policy::{DeterministicPolicy, JointMdpPolicy, OracleError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two states; state 0 costs 3, every transition lands in state 1.
    fn drift_model() -> Cmdp {
        let mut model = Cmdp::new(2, 1, 0, 2).unwrap();
        model.set_reward_function(vec![vec![0.0], vec![0.0]]).unwrap();
        model
            .set_transitions(vec![
                vec![Transition::deterministic(1)],
                vec![Transition::deterministic(1)],
            ])
            .unwrap();
        model
            .set_cost_functions(vec![vec![vec![3.0], vec![0.0]]])
            .unwrap();
        model
    }

    /// `R[1][1] = 10`, action 1 moves 0 to 1 with probability 0.9.
    fn toy_model() -> Cmdp {
        let mut model = Cmdp::new(2, 2, 0, 2).unwrap();
        model
            .set_reward_function(vec![vec![0.0, 0.0], vec![0.0, 10.0]])
            .unwrap();
        model
            .set_transitions(vec![
                vec![
                    Transition::deterministic(0),
                    Transition::new(vec![0, 1], vec![0.1, 0.9]),
                ],
                vec![Transition::deterministic(1), Transition::deterministic(1)],
            ])
            .unwrap();
        model
            .set_cost_functions(vec![vec![vec![0.0, 1.0], vec![0.0, 1.0]]])
            .unwrap();
        model
    }

    fn constant_oracle(action: usize, num_states: usize) -> JointMdpPolicy {
        let mut joint = JointMdpPolicy::default();
        joint.push(DeterministicPolicy::constant(action, 2, num_states));
        joint
    }

    fn evaluate(instance: &CmdpInstance, runs: usize) -> CmdpEvaluator<'_> {
        let mut evaluator = CmdpEvaluator::new(instance);
        let mut oracle = constant_oracle(0, 2);
        let mut rng = StdRng::seed_from_u64(1);
        evaluator.run(&mut oracle, &mut rng, runs).unwrap();
        evaluator
    }

    #[test]
    fn budget_regime_flags_total_cost_over_limit() {
        let instance = CmdpInstance::budget(vec![drift_model()], vec![2.0], 2).unwrap();
        let evaluator = evaluate(&instance, 10);
        assert_eq!(evaluator.violation_probability_total(0), Some(1.0));
        assert_eq!(evaluator.violation_probability_instantaneous(0, 0), None);
        assert_eq!(evaluator.mean_total_cost(0), Some(3.0));
    }

    #[test]
    fn instantaneous_limit_on_first_epoch_is_violated() {
        let instance =
            CmdpInstance::instantaneous(vec![drift_model()], vec![vec![2.0, 10.0]], 2).unwrap();
        let evaluator = evaluate(&instance, 10);
        assert_eq!(evaluator.violation_probability_instantaneous(0, 0), Some(1.0));
        assert_eq!(evaluator.violation_probability_instantaneous(0, 1), Some(0.0));
        assert_eq!(evaluator.violation_probability_total(0), None);
    }

    #[test]
    fn instantaneous_limit_on_second_epoch_ignores_first_epoch_cost() {
        let instance =
            CmdpInstance::instantaneous(vec![drift_model()], vec![vec![10.0, 2.0]], 2).unwrap();
        let evaluator = evaluate(&instance, 10);
        assert_eq!(evaluator.violation_probability_instantaneous(0, 0), Some(0.0));
        assert_eq!(evaluator.violation_probability_instantaneous(0, 1), Some(0.0));
        assert_eq!(evaluator.mean_instantaneous_cost(0, 0), Some(3.0));
        assert_eq!(evaluator.mean_instantaneous_cost(0, 1), Some(0.0));
    }

    #[test]
    fn toy_reward_converges_to_nine() {
        let instance = CmdpInstance::budget(vec![toy_model()], vec![1.5], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let mut oracle = constant_oracle(1, 2);
        let mut rng = StdRng::seed_from_u64(7);
        let expected = evaluator.run(&mut oracle, &mut rng, 20_000).unwrap();

        let stats = evaluator.statistics().unwrap();
        let se = stats.reward.standard_error();
        assert!(se > 0.0);
        assert!((expected - 9.0).abs() < 5.0 * se, "{expected} vs 9 (se {se})");
        assert_eq!(evaluator.mean_total_cost(0), Some(2.0));
        assert_eq!(evaluator.violation_probability_total(0), Some(1.0));
    }

    #[test]
    fn standard_error_shrinks_with_more_runs() {
        let instance = CmdpInstance::budget(vec![toy_model()], vec![1.5], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let mut rng = StdRng::seed_from_u64(11);

        evaluator
            .run(&mut constant_oracle(1, 2), &mut rng, 1_000)
            .unwrap();
        let small = evaluator.statistics().unwrap().reward.standard_error();
        evaluator
            .run(&mut constant_oracle(1, 2), &mut rng, 16_000)
            .unwrap();
        let large = evaluator.statistics().unwrap().reward.standard_error();
        assert!(large < small / 2.0, "{large} vs {small}");
    }

    #[test]
    fn violation_estimates_agree_across_run_counts() {
        let mut coin = Cmdp::new(2, 1, 0, 2).unwrap();
        coin.set_reward_function(vec![vec![0.0], vec![0.0]]).unwrap();
        coin.set_transitions(vec![
            vec![Transition::new(vec![0, 1], vec![0.5, 0.5])],
            vec![Transition::deterministic(1)],
        ])
        .unwrap();
        coin.set_cost_functions(vec![vec![vec![0.0], vec![1.0]]])
            .unwrap();
        let instance = CmdpInstance::budget(vec![coin], vec![0.5], 2).unwrap();

        let estimate = |runs: usize, seed: u64| {
            let mut evaluator = CmdpEvaluator::new(&instance);
            evaluator
                .run(&mut constant_oracle(0, 2), &mut StdRng::seed_from_u64(seed), runs)
                .unwrap();
            evaluator.violation_probability_total(0).unwrap()
        };
        let small = estimate(4_000, 21);
        let large = estimate(8_000, 22);
        assert!((small - large).abs() < 0.04, "{small} vs {large}");
        assert!((large - 0.5).abs() < 0.03, "{large}");
    }

    #[test]
    fn run_sink_sees_every_trajectory() {
        let instance = CmdpInstance::budget(vec![drift_model()], vec![2.0], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let mut records: Vec<RunRecord> = Vec::new();
        let mut rng = StdRng::seed_from_u64(3);
        evaluator
            .run_with_sink(&mut constant_oracle(0, 2), &mut rng, 4, &mut records)
            .unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.violated == vec![true]));
        assert_eq!(records[2].epoch_costs, vec![vec![3.0, 0.0]]);
    }

    #[test]
    fn zero_runs_are_rejected() {
        let instance = CmdpInstance::budget(vec![drift_model()], vec![2.0], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let mut rng = StdRng::seed_from_u64(0);
        let err = evaluator
            .run(&mut constant_oracle(0, 2), &mut rng, 0)
            .unwrap_err();
        assert!(matches!(err, EvaluationError::NoRuns));
    }

    struct FailingOracle {
        fail_at_run: usize,
        current: usize,
    }

    impl MdpOracle for FailingOracle {
        fn begin_trajectory(&mut self, run: usize) -> Result<(), OracleError> {
            self.current = run;
            Ok(())
        }

        fn choose_joint_action(
            &mut self,
            _epoch: usize,
            _joint_state: &[usize],
        ) -> Result<Vec<usize>, OracleError> {
            if self.current == self.fail_at_run {
                return Err(OracleError::Unavailable("gone".into()));
            }
            Ok(vec![0])
        }
    }

    #[test]
    fn failed_run_clears_committed_statistics() {
        let instance = CmdpInstance::budget(vec![drift_model()], vec![2.0], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let mut rng = StdRng::seed_from_u64(0);
        evaluator
            .run(&mut constant_oracle(0, 2), &mut rng, 3)
            .unwrap();
        assert!(evaluator.statistics().is_some());

        let mut failing = FailingOracle {
            fail_at_run: 2,
            current: 0,
        };
        let err = evaluator.run(&mut failing, &mut rng, 5).unwrap_err();
        assert!(matches!(err, EvaluationError::Oracle(OracleError::Unavailable(_))));
        assert!(evaluator.statistics().is_none());
        assert_eq!(evaluator.mean_total_cost(0), None);
    }

    struct WrongArity;

    impl MdpOracle for WrongArity {
        fn choose_joint_action(
            &mut self,
            _epoch: usize,
            _joint_state: &[usize],
        ) -> Result<Vec<usize>, OracleError> {
            Ok(vec![0, 0])
        }
    }

    #[test]
    fn joint_action_length_is_checked() {
        let instance = CmdpInstance::budget(vec![drift_model()], vec![2.0], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let err = evaluator
            .run(&mut WrongArity, &mut StdRng::seed_from_u64(0), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::JointActionLength {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn out_of_range_action_is_rejected() {
        let instance = CmdpInstance::budget(vec![drift_model()], vec![2.0], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let err = evaluator
            .run(&mut constant_oracle(4, 2), &mut StdRng::seed_from_u64(0), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::ActionOutOfRange {
                agent: 0,
                action: 4,
                num_actions: 1
            }
        ));
    }

    #[test]
    fn rewards_and_costs_sum_over_agents() {
        let instance =
            CmdpInstance::budget(vec![drift_model(), drift_model()], vec![4.0], 2).unwrap();
        let mut evaluator = CmdpEvaluator::new(&instance);
        let mut joint = JointMdpPolicy::default();
        joint.push(DeterministicPolicy::constant(0, 2, 2));
        joint.push(DeterministicPolicy::constant(0, 2, 2));
        evaluator
            .run(&mut joint, &mut StdRng::seed_from_u64(0), 2)
            .unwrap();
        assert_eq!(evaluator.mean_total_cost(0), Some(6.0));
        assert_eq!(evaluator.violation_probability_total(0), Some(1.0));
        assert_eq!(evaluator.statistics().unwrap().num_agents, 2);
    }
}
