use ndarray::{array, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use crate::agent::{Agent, AgentConfig, DdpgAgent, UNIQUE_ACTION, UNIQUE_STATE};
use crate::error::PallasError;
use crate::models::Model;
use crate::types::{ActionValue, OneOrNamed, Tensor};

const MODEL: &str = r#"{
    "network": [{"type": "dense", "size": 8}],
    "critic_network": {"size_t0": 6, "size_t1": 4},
    "update_mode": {"batch_size": 2, "frequency": 1},
    "memory": {"capacity": 10},
    "seed": 3
}"#;

fn config(states: &str, actions: &str, extra: &str) -> AgentConfig {
    let json = format!(
        r#"{{"states": {}, "actions": {}, {} "model": {}}}"#,
        states, actions, extra, MODEL
    );
    AgentConfig::from_json_str(&json).unwrap()
}

fn continuous_agent() -> DdpgAgent {
    DdpgAgent::new(config(r#"{"shape": [3]}"#, r#"{"type": "float"}"#, "")).unwrap()
}

fn state() -> OneOrNamed<Tensor> {
    OneOrNamed::Single(array![0.1, -0.2, 0.3].into_dyn())
}

#[test]
fn test_act_before_reset_fails() {
    let mut agent = continuous_agent();
    assert!(matches!(agent.act(state()), Err(PallasError::PreconditionViolation(_))));
}

#[test]
fn test_reset_starts_episode() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    agent.reset().unwrap();
    assert_eq!(agent.core().episode(), 2);
    assert_eq!(agent.core().internals().unwrap(), agent.core().next_internals());
}

#[test]
fn test_single_forms_round_trip() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    let (state, action) = agent.act(state()).unwrap();
    assert_eq!(state.single().unwrap().shape(), &[3]);
    let action = action.single().unwrap();
    assert!(!action.is_discrete());
    assert_eq!(action.as_continuous().unwrap().shape(), &[] as &[usize]);
    assert_eq!(agent.core().timestep(), 1);
    assert!(agent.core().states().contains_key(UNIQUE_STATE));
    assert!(agent.core().actions().contains_key(UNIQUE_ACTION));
}

#[test]
fn test_named_forms_round_trip() {
    let mut agent = DdpgAgent::new(config(
        r#"{"observation": {"shape": [3]}}"#,
        r#"{"steer": {"type": "int", "num_actions": 4}}"#,
        "",
    ))
    .unwrap();
    agent.reset().unwrap();
    let states = OneOrNamed::Named(BTreeMap::from([(
        "observation".to_string(),
        array![1.0, 0.0, 0.0].into_dyn(),
    )]));
    let (state, action) = agent.act(states).unwrap();
    assert!(state.named().unwrap().contains_key("observation"));
    let actions = action.named().unwrap();
    let steer = &actions["steer"];
    assert!(steer.as_discrete().unwrap().iter().all(|&a| a < 4));
}

#[test]
fn test_state_form_must_match_declaration() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    let named = OneOrNamed::Named(BTreeMap::from([(
        "state".to_string(),
        array![0.0, 0.0, 0.0].into_dyn(),
    )]));
    assert!(matches!(agent.act(named), Err(PallasError::Configuration(_))));
}

#[test]
fn test_state_shape_checked() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    let wrong = OneOrNamed::Single(array![0.0, 0.0].into_dyn());
    assert!(matches!(agent.act(wrong), Err(PallasError::ShapeMismatch { .. })));
}

#[test]
fn test_preprocessing_rewrites_state_shape() {
    let mut agent = DdpgAgent::new(config(
        r#"{"shape": [3]}"#,
        r#"{"type": "float"}"#,
        r#""preprocessing": [{"type": "clip", "min_value": -0.1, "max_value": 0.1}, {"type": "sequence", "length": 2}],"#,
    ))
    .unwrap();
    assert_eq!(agent.core().states()[UNIQUE_STATE].shape, vec![3, 2]);
    agent.reset().unwrap();
    let (state, _) = agent.act(state()).unwrap();
    let state = state.single().unwrap();
    assert_eq!(state.shape(), &[3, 2]);
    assert!(state.iter().all(|&v| (-0.1..=0.1).contains(&v)));
}

#[test]
fn test_preprocessing_form_must_match_states() {
    let named = r#""preprocessing": {"state": [{"type": "standardize"}]},"#;
    let result = DdpgAgent::new(config(r#"{"shape": [3]}"#, r#"{"type": "float"}"#, named));
    assert!(matches!(result, Err(PallasError::Configuration(_))));
}

#[test]
fn test_exploration_for_undeclared_action_rejected() {
    let result = DdpgAgent::new(config(
        r#"{"observation": {"shape": [3]}}"#,
        r#"{"steer": {"type": "float"}}"#,
        r#""exploration": {"throttle": {"type": "constant", "value": 0.1}},"#,
    ));
    assert!(matches!(result, Err(PallasError::Configuration(_))));
}

#[test]
fn test_constant_exploration_shifts_continuous_action() {
    let mut plain = continuous_agent();
    let mut shifted = DdpgAgent::new(config(
        r#"{"shape": [3]}"#,
        r#"{"type": "float"}"#,
        r#""exploration": {"type": "constant", "value": 0.5},"#,
    ))
    .unwrap();
    plain.reset().unwrap();
    shifted.reset().unwrap();
    let (_, a) = plain.act_deterministic(state()).unwrap();
    let (_, b) = shifted.act_deterministic(state()).unwrap();
    let a = a.single().unwrap().as_continuous().unwrap().clone();
    let b = b.single().unwrap().as_continuous().unwrap().clone();
    assert!((&b - &a).iter().all(|d| (d - 0.5).abs() < 1e-5));
}

#[test]
fn test_observe_holds_back_until_successor_known() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    let (s0, a0) = agent.act(state()).unwrap();
    agent.observe(s0, a0, 1.0, false).unwrap();
    assert_eq!(agent.memory().len(), 0);

    let (s1, a1) = agent.act(state()).unwrap();
    agent.observe(s1, a1, 0.5, true).unwrap();
    assert_eq!(agent.memory().len(), 2);
    assert!(agent.last_stats().is_some());
    assert_eq!(agent.core().model.timestep(), 2);
}

#[test]
fn test_reset_stores_held_back_step_without_crossing_episodes() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    let (s0, a0) = agent.act(OneOrNamed::Single(array![1.0, 1.0, 1.0].into_dyn())).unwrap();
    agent.observe(s0, a0, 1.0, false).unwrap();
    assert_eq!(agent.memory().len(), 0);

    agent.reset().unwrap();
    assert_eq!(agent.memory().len(), 1);
    let (s1, a1) = agent.act(OneOrNamed::Single(array![9.0, 9.0, 9.0].into_dyn())).unwrap();
    agent.observe(s1, a1, 1.0, false).unwrap();
    assert_eq!(agent.memory().len(), 1);

    let mut rng = StdRng::seed_from_u64(0);
    let batch = agent.memory().sample(1, &mut rng).unwrap();
    let expected = array![[1.0, 1.0, 1.0]].into_dyn();
    assert_eq!(batch.states[UNIQUE_STATE], expected);
    assert_eq!(batch.next_states.unwrap()[UNIQUE_STATE], expected);
}

#[test]
fn test_deterministic_act_still_applies_exploration() {
    let mut plain = continuous_agent();
    let mut explored = DdpgAgent::new(config(
        r#"{"shape": [3]}"#,
        r#"{"type": "float"}"#,
        r#""exploration": {"type": "constant", "value": 5.0},"#,
    ))
    .unwrap();
    plain.reset().unwrap();
    explored.reset().unwrap();
    let (_, a) = plain.act_deterministic(state()).unwrap();
    let (_, b) = explored.act_deterministic(state()).unwrap();
    let a = a.single().unwrap().as_continuous().unwrap().clone();
    let b = b.single().unwrap().as_continuous().unwrap().clone();
    assert!((&b - &a).iter().all(|d| (d - 5.0).abs() < 1e-4));

    // deterministic sampling alone is repeatable
    let (_, again) = plain.act_deterministic(state()).unwrap();
    assert_eq!(again.single().unwrap().as_continuous().unwrap(), &a);
}

#[test]
fn test_observe_rejects_foreign_action_names() {
    let mut agent = continuous_agent();
    agent.reset().unwrap();
    let (state, _) = agent.act(state()).unwrap();
    let action = OneOrNamed::Named(BTreeMap::from([(
        "other".to_string(),
        ActionValue::Continuous(Tensor::zeros(IxDyn(&[]))),
    )]));
    assert!(agent.observe(state, action, 0.0, false).is_err());
}

#[test]
fn test_update_changes_actor() {
    let mut agent = continuous_agent();
    let before = agent.core().model.store().clone();
    agent.reset().unwrap();
    for step in 0..6 {
        let (s, a) = agent.act(state()).unwrap();
        agent.observe(s, a, 1.0, step == 5).unwrap();
    }
    let after = agent.core().model.store();
    let changed = agent
        .core()
        .model
        .actor_variables()
        .into_iter()
        .any(|id| before.value(id).unwrap() != after.value(id).unwrap());
    assert!(changed);
}
