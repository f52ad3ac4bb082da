use cpt_core::belief::BeliefPoint;
use cpt_policy::{
    ConstantPomdpPolicy, DeterministicPolicy, JointMdpPolicy, JointPomdpPolicy, MdpOracle,
    OracleError, PolicyGraph, PomdpOracle, StochasticPolicy,
};

#[test]
fn pomdp_joint_policy_resets_graphs_between_trajectories() {
    let graph = PolicyGraph::new(vec![vec![0], vec![1, 2]], vec![vec![vec![0, 1]]], 0).unwrap();
    let mut joint = JointPomdpPolicy::default();
    joint.push(graph);
    joint.push(ConstantPomdpPolicy::new(vec![3, 4]));
    let beliefs = vec![BeliefPoint::uniform(2), BeliefPoint::uniform(1)];

    for run in 0..3 {
        joint.begin_trajectory(run).unwrap();
        assert_eq!(joint.choose_joint_action(0, &beliefs).unwrap(), vec![0, 3]);
        joint.report_outcome(0, &[0, 3], &[1, 0]).unwrap();
        assert_eq!(joint.choose_joint_action(1, &beliefs).unwrap(), vec![2, 4]);
        joint.report_outcome(1, &[2, 4], &[0, 0]).unwrap();
    }
}

#[test]
fn skipped_reports_surface_as_out_of_sync() {
    let graph = PolicyGraph::new(vec![vec![0], vec![0]], vec![vec![vec![0]]], 0).unwrap();
    let mut joint = JointPomdpPolicy::default();
    joint.push(graph);
    joint.begin_trajectory(0).unwrap();
    let err = joint
        .choose_joint_action(1, &[BeliefPoint::uniform(1)])
        .unwrap_err();
    assert_eq!(
        err,
        OracleError::OutOfSync {
            expected: 0,
            found: 1
        }
    );
}

#[test]
fn mixed_mdp_agents_share_one_joint_oracle() {
    let mut joint = JointMdpPolicy::default();
    joint.push(DeterministicPolicy::constant(1, 2, 2));
    joint.push(StochasticPolicy::new(vec![vec![vec![0.0, 1.0]; 2]; 2], 5).unwrap());
    let mut boxed: Box<dyn MdpOracle> = Box::new(joint);
    boxed.begin_simulation(1).unwrap();
    boxed.begin_trajectory(0).unwrap();
    assert_eq!(boxed.choose_joint_action(0, &[0, 1]).unwrap(), vec![1, 1]);
    assert!(boxed.close().is_ok());
}
