//! Online principal: a logistic classifier trained as the actor of a linear
//! actor-critic.
//!
//! Transitions are buffered; when the buffer fills, every transition in it is
//! replayed once in shuffled order and the buffer is cleared. Each transition
//! performs a clipped TD update of the action-value weights followed by a
//! clipped policy-gradient update of the classifier weights.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::ReplayBuffer;
use crate::config::AgentConfig;
use crate::data::FeatureVector;
use crate::decision::Decision;
use crate::env::StepInfo;
use crate::error::{Result, SimError};
use crate::linalg::{clip, clip_in_place, sigmoid};
use crate::weights::{ActionValueWeights, ClassifierWeights};

pub const TD_ERROR_CLIP: f64 = 10.0;
pub const POLICY_GRADIENT_CLIP: f64 = 10.0;
pub const POLICY_UPDATE_CLIP: f64 = 10.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub observation: FeatureVector,
    pub decision: Decision,
    pub reward: f64,
    pub terminated: bool,
    pub next_observation: Option<FeatureVector>,
    pub true_label: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub predicted_prob: f64,
    pub predicted: Decision,
    pub true_label: u8,
    /// Probability the policy assigns to the correct label.
    pub expected_accuracy: f64,
    pub reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub prob: f64,
    pub decision: Decision,
    pub true_label: u8,
}

/// Outcome of one batch pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub size: usize,
    pub mean_abs_td_error: f64,
    pub mean_expected_accuracy: f64,
}

/// Observational bookkeeping. Nothing here feeds back into learning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentHistory {
    pub batch_updates: usize,
    pub training_error: Vec<f64>,
    pub training_expected_accuracy: Vec<f64>,
    pub training_rewards: Vec<f64>,
    pub training_policy_weights: Vec<ClassifierWeights>,
    pub training_details: Vec<TrainingRecord>,
    /// Applied (clipped) policy update per replayed transition.
    pub policy_updates: Vec<Vec<f64>>,
    pub batch_expected_accuracy: Vec<f64>,
    pub testing_accuracy: Vec<f64>,
    pub testing_details: Vec<TestRecord>,
}

impl AgentHistory {
    pub fn test_accuracy(&self) -> Option<f64> {
        mean(&self.testing_accuracy)
    }

    pub fn mean_training_reward(&self) -> Option<f64> {
        mean(&self.training_rewards)
    }

    pub fn mean_expected_accuracy(&self) -> Option<f64> {
        mean(&self.training_expected_accuracy)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn expected_accuracy(prob: f64, true_label: u8) -> f64 {
    if true_label == 1 {
        prob
    } else {
        1.0 - prob
    }
}

pub struct PrincipalAgent {
    config: AgentConfig,
    policy: ClassifierWeights,
    values: ActionValueWeights,
    buffer: ReplayBuffer<Transition>,
    rng: StdRng,
    history: AgentHistory,
}

impl PrincipalAgent {
    /// Agent for `feature_dim` features: policy weights drawn from
    /// `N(0, initial_policy_std)`, action-value weights set to `initial_value_weight`.
    pub fn new(feature_dim: usize, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let policy = ClassifierWeights::sample(feature_dim + 1, config.initial_policy_std, &mut rng)?;
        let values = ActionValueWeights::filled(feature_dim + 2, config.initial_value_weight);
        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            config,
            policy,
            values,
            rng,
            history: AgentHistory::default(),
        })
    }

    /// Agent starting from explicit weights.
    pub fn with_weights(
        config: AgentConfig,
        policy: ClassifierWeights,
        values: ActionValueWeights,
    ) -> Result<Self> {
        config.validate()?;
        if values.len() != policy.len() + 1 {
            return Err(SimError::DimensionMismatch {
                expected: policy.len() + 1,
                found: values.len(),
            });
        }
        Ok(Self {
            buffer: ReplayBuffer::new(config.buffer_capacity),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            policy,
            values,
            history: AgentHistory::default(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn policy_weights(&self) -> &ClassifierWeights {
        &self.policy
    }

    pub fn value_weights(&self) -> &ActionValueWeights {
        &self.values
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn history(&self) -> &AgentHistory {
        &self.history
    }

    fn check_observation(&self, observation: &[f64]) -> Result<()> {
        if observation.len() != self.policy.len() {
            return Err(SimError::DimensionMismatch {
                expected: self.policy.len(),
                found: observation.len(),
            });
        }
        Ok(())
    }

    /// Probability of `Accept` under the current policy and the chosen decision.
    ///
    /// Stochastic selection samples `Bernoulli(p)`; otherwise `Accept` iff
    /// `p > decision_threshold`, which never consumes randomness.
    pub fn select_action(&mut self, observation: &[f64], stochastic: bool) -> Result<(f64, Decision)> {
        self.check_observation(observation)?;
        let prob = sigmoid(self.policy.logit(observation));
        let accept = if stochastic {
            self.rng.gen::<f64>() < prob
        } else {
            prob > self.config.decision_threshold
        };
        let decision = if accept {
            Decision::Accept
        } else {
            Decision::Reject
        };
        Ok((prob, decision))
    }

    /// Buffers one transition and trains once the buffer is full.
    ///
    /// # Returns
    /// Summary of the batch update this call triggered, if any
    pub fn observe(
        &mut self,
        observation: &[f64],
        decision: Decision,
        reward: f64,
        terminated: bool,
        info: &StepInfo,
        prob: f64,
    ) -> Result<Option<BatchSummary>> {
        self.check_observation(observation)?;
        if let Some(next) = &info.next_observation {
            self.check_observation(next)?;
        }
        let transition = Transition {
            observation: observation.to_vec(),
            decision,
            reward,
            terminated,
            next_observation: info.next_observation.clone(),
            true_label: info.true_label,
        };

        let summary = self
            .buffer
            .push_and_maybe_drain(transition)
            .map(|batch| self.batch_update(batch));

        let expected = expected_accuracy(prob, info.true_label);
        self.history.training_expected_accuracy.push(expected);
        self.history
            .training_error
            .push((prob - f64::from(info.true_label)).abs());
        self.history.training_rewards.push(reward);
        self.history.training_policy_weights.push(self.policy.clone());
        self.history.training_details.push(TrainingRecord {
            predicted_prob: prob,
            predicted: decision,
            true_label: info.true_label,
            expected_accuracy: expected,
            reward,
        });
        Ok(summary)
    }

    /// One pass over a full batch in freshly shuffled order.
    ///
    /// Per transition:
    /// 1. `target = r + γ·max_a Q(s', a)` (`r` alone when terminal or `s'` is absent)
    /// 2. `δ = clip(target - Q(s, a), ±10)`
    /// 3. `w_Q += lr_critic·δ·[s, a]`
    /// 4. `g = clip((a - σ(θ·s))·s, ±10)` with `θ` as it stands now, unless frozen
    /// 5. `θ += clip(lr_actor·δ·g / N, ±10)`
    fn batch_update(&mut self, mut batch: Vec<Transition>) -> BatchSummary {
        self.history.batch_updates += 1;
        batch.shuffle(&mut self.rng);

        let frozen = self
            .config
            .freeze_policy_during_batch
            .then(|| self.policy.clone());
        let capacity = self.buffer.capacity() as f64;
        let mut expected = Vec::with_capacity(batch.len());
        let mut abs_td = 0.0;

        for t in &batch {
            let q = self.values.q_value(&t.observation, t.decision);
            let max_next = match (&t.next_observation, t.terminated) {
                (Some(next), false) => self.values.max_q(next),
                _ => 0.0,
            };
            let target = t.reward + self.config.discount * max_next;
            let td_error = clip(target - q, TD_ERROR_CLIP);
            abs_td += td_error.abs();

            self.values
                .add_scaled(&t.observation, t.decision, self.config.lr_critic * td_error);

            let prob = sigmoid(frozen.as_ref().unwrap_or(&self.policy).logit(&t.observation));
            let mut grad: Vec<f64> = t
                .observation
                .iter()
                .map(|x| (t.decision.as_f64() - prob) * x)
                .collect();
            clip_in_place(&mut grad, POLICY_GRADIENT_CLIP);

            let update: Vec<f64> = grad
                .iter()
                .map(|g| clip(self.config.lr_actor * td_error * g / capacity, POLICY_UPDATE_CLIP))
                .collect();
            for (w, u) in self.policy.iter_mut().zip(&update) {
                *w += u;
            }
            self.history.policy_updates.push(update);
            expected.push(expected_accuracy(prob, t.true_label));
        }

        let size = batch.len();
        let summary = BatchSummary {
            size,
            mean_abs_td_error: abs_td / size as f64,
            mean_expected_accuracy: mean(&expected).unwrap_or(0.0),
        };
        self.history
            .batch_expected_accuracy
            .push(summary.mean_expected_accuracy);
        debug!(
            batch = self.history.batch_updates,
            size,
            mean_abs_td_error = summary.mean_abs_td_error,
            mean_expected_accuracy = summary.mean_expected_accuracy,
            "Batch update applied"
        );
        summary
    }

    /// Records a test-mode prediction. Never touches the buffer or the weights.
    pub fn record_test_result(&mut self, decision: Decision, info: &StepInfo, prob: f64) {
        let correct = decision.matches(info.true_label);
        self.history
            .testing_accuracy
            .push(if correct { 1.0 } else { 0.0 });
        self.history.testing_details.push(TestRecord {
            prob,
            decision,
            true_label: info.true_label,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(label: u8, next: Option<Vec<f64>>) -> StepInfo {
        StepInfo {
            true_label: label,
            next_observation: next,
        }
    }

    fn agent(capacity: usize, policy: Vec<f64>) -> PrincipalAgent {
        let n = policy.len();
        PrincipalAgent::with_weights(
            AgentConfig {
                buffer_capacity: capacity,
                lr_actor: 0.1,
                lr_critic: 0.1,
                ..AgentConfig::default()
            },
            ClassifierWeights::new(policy).unwrap(),
            ActionValueWeights::filled(n + 1, 0.01),
        )
        .unwrap()
    }

    #[test]
    fn deterministic_selection_thresholds_at_half() {
        let mut a = agent(4, vec![1.0, 0.0]);
        assert_eq!(a.select_action(&[2.0, 1.0], false).unwrap().1, Decision::Accept);
        assert_eq!(a.select_action(&[-2.0, 1.0], false).unwrap().1, Decision::Reject);
        // p == 0.5 is not strictly above the threshold
        assert_eq!(a.select_action(&[0.0, 1.0], false).unwrap().1, Decision::Reject);
    }

    #[test]
    fn stochastic_selection_respects_extremes() {
        let mut a = agent(4, vec![100.0, 0.0]);
        for _ in 0..20 {
            assert_eq!(a.select_action(&[1.0, 1.0], true).unwrap().1, Decision::Accept);
            assert_eq!(a.select_action(&[-1.0, 1.0], true).unwrap().1, Decision::Reject);
        }
    }

    #[test]
    fn single_transition_update_matches_hand_computation() {
        let mut a = agent(1, vec![0.0, 0.0]);
        let obs = [2.0, 1.0];
        let summary = a
            .observe(&obs, Decision::Accept, 1.0, true, &info(1, None), 0.5)
            .unwrap()
            .unwrap();
        assert_eq!(summary.size, 1);
        assert!((summary.mean_abs_td_error - 0.96).abs() < 1e-12);
        // Q(s, a) = 0.01*2 + 0.01*1 + 0.01*1 = 0.04, target = 1, δ = 0.96
        let td = 0.96;
        let values = a.value_weights();
        assert!((values[0] - (0.01 + 0.1 * td * 2.0)).abs() < 1e-12);
        assert!((values[1] - (0.01 + 0.1 * td * 1.0)).abs() < 1e-12);
        assert!((values[2] - (0.01 + 0.1 * td * 1.0)).abs() < 1e-12);
        // g = (1 - 0.5) * s, update = 0.1 * δ * g / 1
        let policy = a.policy_weights();
        assert!((policy[0] - 0.1 * td * 1.0).abs() < 1e-12);
        assert!((policy[1] - 0.1 * td * 0.5).abs() < 1e-12);
    }

    #[test]
    fn td_error_is_clipped() {
        let mut a = agent(1, vec![0.0, 0.0]);
        a.observe(&[1.0, 1.0], Decision::Reject, 1000.0, true, &info(0, None), 0.5)
            .unwrap();
        // δ clipped to 10: w_Q[0] = 0.01 + 0.1 * 10 * 1
        assert!((a.value_weights()[0] - 1.01).abs() < 1e-12);
    }

    #[test]
    fn policy_gradient_and_update_are_clipped() {
        let mut a = PrincipalAgent::with_weights(
            AgentConfig {
                buffer_capacity: 1,
                lr_actor: 1e6,
                lr_critic: 0.0,
                ..AgentConfig::default()
            },
            ClassifierWeights::new(vec![0.0, 0.0]).unwrap(),
            ActionValueWeights::filled(3, 0.0),
        )
        .unwrap();
        a.observe(&[1e6, 1.0], Decision::Accept, 1.0, true, &info(1, None), 0.5)
            .unwrap();
        assert_eq!(a.policy_weights()[0], 10.0);
        assert_eq!(a.policy_weights()[1], 10.0);
        assert_eq!(a.history().policy_updates, vec![vec![10.0, 10.0]]);
    }

    #[test]
    fn bootstraps_from_next_observation_when_not_terminal() {
        let mut a = PrincipalAgent::with_weights(
            AgentConfig {
                buffer_capacity: 1,
                lr_critic: 1.0,
                lr_actor: 0.0,
                discount: 0.5,
                ..AgentConfig::default()
            },
            ClassifierWeights::new(vec![0.0, 0.0]).unwrap(),
            ActionValueWeights::from_vec(vec![0.0, 0.0, 2.0]),
        )
        .unwrap();
        a.observe(
            &[0.0, 0.0],
            Decision::Reject,
            1.0,
            false,
            &info(0, Some(vec![0.0, 0.0])),
            0.5,
        )
        .unwrap();
        // Q(s, reject) = 0, max Q(s') = 2, target = 1 + 0.5 * 2 = 2, δ = 2; only the action
        // weight sees a non-zero input and it is 0 for reject.
        assert_eq!(&**a.value_weights(), &[0.0, 0.0, 2.0]);
        assert!((a.history().policy_updates[0][0]).abs() < 1e-15);
    }

    #[test]
    fn buffer_drains_after_capacity_observations() {
        let mut a = agent(3, vec![0.1, -0.1]);
        let before = (a.policy_weights().clone(), a.value_weights().clone());
        for i in 0..3 {
            let summary = a
                .observe(&[0.5, 1.0], Decision::Accept, 1.0, false, &info(1, None), 0.5)
                .unwrap();
            assert_eq!(summary.is_some(), i == 2);
        }
        assert_eq!(a.buffer_len(), 0);
        assert_eq!(a.history().batch_updates, 1);
        assert_ne!(a.policy_weights(), &before.0);
        assert_ne!(a.value_weights(), &before.1);
    }

    #[test]
    fn test_results_never_train() {
        let mut a = agent(1, vec![0.3, 0.3]);
        let before = a.policy_weights().clone();
        a.record_test_result(Decision::Accept, &info(1, None), 0.7);
        a.record_test_result(Decision::Accept, &info(0, None), 0.7);
        assert_eq!(a.policy_weights(), &before);
        assert_eq!(a.buffer_len(), 0);
        assert_eq!(a.history().batch_updates, 0);
        assert_eq!(a.history().test_accuracy(), Some(0.5));
    }

    #[test]
    fn frozen_policy_uses_pre_batch_probabilities() {
        let config = AgentConfig {
            buffer_capacity: 2,
            lr_actor: 1.0,
            lr_critic: 0.0,
            freeze_policy_during_batch: true,
            ..AgentConfig::default()
        };
        let mut a = PrincipalAgent::with_weights(
            config,
            ClassifierWeights::new(vec![0.0, 0.0]).unwrap(),
            ActionValueWeights::filled(3, 0.0),
        )
        .unwrap();
        a.observe(&[1.0, 1.0], Decision::Accept, 1.0, true, &info(1, None), 0.5)
            .unwrap();
        a.observe(&[1.0, 1.0], Decision::Accept, 1.0, true, &info(1, None), 0.5)
            .unwrap();
        // both transitions see p = 0.5: each update is 1 * 1 * 0.5 / 2
        assert!((a.policy_weights()[0] - 0.5).abs() < 1e-12);
        let updates = &a.history().policy_updates;
        assert_eq!(updates[0], updates[1]);
    }

    #[test]
    fn later_transitions_see_policy_updated_earlier_in_the_batch() {
        let mut a = PrincipalAgent::with_weights(
            AgentConfig {
                buffer_capacity: 2,
                lr_actor: 1.0,
                lr_critic: 0.0,
                ..AgentConfig::default()
            },
            ClassifierWeights::new(vec![0.0, 0.0]).unwrap(),
            ActionValueWeights::filled(3, 0.0),
        )
        .unwrap();
        for _ in 0..2 {
            a.observe(&[1.0, 1.0], Decision::Accept, 1.0, true, &info(1, None), 0.5)
                .unwrap();
        }
        // δ = 1 throughout; the first update is (1 - 0.5) / 2 per weight, which moves θ to
        // [0.25, 0.25], so the second transition sees p = σ(0.5)
        let updates = &a.history().policy_updates;
        assert_eq!(updates[0], vec![0.25, 0.25]);
        assert_ne!(updates[0], updates[1]);
        let expected = (1.0 - sigmoid(0.5)) / 2.0;
        for u in &updates[1] {
            assert!((u - expected).abs() < 1e-15);
        }
        for w in a.policy_weights().iter() {
            assert!((w - (0.25 + expected)).abs() < 1e-15);
        }
    }

    #[test]
    fn new_agent_needs_at_least_one_feature() {
        let err = PrincipalAgent::new(0, AgentConfig::default()).err().unwrap();
        assert!(matches!(err, SimError::DimensionMismatch { .. }));
    }

    #[test]
    fn mismatched_observation_is_rejected() {
        let mut a = agent(2, vec![0.0, 0.0]);
        assert!(matches!(
            a.select_action(&[1.0, 2.0, 3.0], false),
            Err(SimError::DimensionMismatch { .. })
        ));
    }
}
