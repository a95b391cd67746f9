use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{EnvironmentConfig, ResponseConfig};
use crate::data::{Dataset, FeatureVector, Split};
use crate::decision::Decision;
use crate::error::{Result, SimError};
use crate::response::StrategicResponder;
use crate::traits::{Environment, TraceSink};
use crate::weights::ClassifierWeights;

pub const REWARD_CORRECT: f64 = 1.0;
pub const REWARD_INCORRECT: f64 = -1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvState {
    #[default]
    Idle,
    Running,
    Terminated,
}

/// Side information for the sample under the cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub true_label: u8,
    /// Manipulated sample at `cursor + 1`, if the split has one.
    pub next_observation: Option<FeatureVector>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: Option<FeatureVector>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Credit-scoring environment: one applicant per step, each best-responding to
/// the policy snapshot the environment currently holds.
pub struct CreditScoringEnv {
    dataset: Dataset,
    split: Split,
    cursor: usize,
    state: EnvState,
    policy: ClassifierWeights,
    responder: StrategicResponder,
    max_episode_length: usize,
    episode: u64,
    episode_reward: f64,
}

impl CreditScoringEnv {
    /// # Errors
    /// `SimError::DimensionMismatch` if `policy` does not have `D + 1` weights, and
    /// `SimError::Config` if the response configuration does not fit the dataset.
    pub fn new(
        dataset: Dataset,
        response: ResponseConfig,
        config: EnvironmentConfig,
        policy: ClassifierWeights,
    ) -> Result<Self> {
        let dim = dataset.feature_dim();
        if policy.len() != dim + 1 {
            return Err(SimError::DimensionMismatch {
                expected: dim + 1,
                found: policy.len(),
            });
        }
        let responder = StrategicResponder::new(response, dim)?;
        Ok(Self {
            dataset,
            split: Split::Train,
            cursor: 0,
            state: EnvState::Idle,
            policy,
            responder,
            max_episode_length: config.max_episode_length,
            episode: 0,
            episode_reward: 0.0,
        })
    }

    pub fn with_trace_sink(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.responder.set_sink(Some(sink));
        self
    }

    /// Switches the active split. The next call must be `reset`.
    pub fn set_split(&mut self, split: Split) {
        self.split = split;
        self.state = EnvState::Idle;
        self.cursor = 0;
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn feature_dim(&self) -> usize {
        self.dataset.feature_dim()
    }

    pub fn responder(&self) -> &StrategicResponder {
        &self.responder
    }

    /// Reward accumulated since the last `reset`.
    pub fn episode_reward(&self) -> f64 {
        self.episode_reward
    }

    pub fn policy_snapshot(&self) -> &ClassifierWeights {
        &self.policy
    }

    /// Replaces the classifier applicants respond to from the next observation on.
    pub fn set_policy_snapshot(&mut self, policy: ClassifierWeights) -> Result<()> {
        if policy.len() != self.policy.len() {
            return Err(SimError::DimensionMismatch {
                expected: self.policy.len(),
                found: policy.len(),
            });
        }
        self.policy = policy;
        Ok(())
    }

    fn split_len(&self) -> usize {
        self.dataset.len(self.split)
    }

    fn observation_at(&mut self, idx: usize) -> Result<FeatureVector> {
        let raw = &self.dataset.features(self.split)[idx];
        self.responder.respond(raw, &self.policy)
    }

    fn info_at(&mut self, idx: usize) -> Result<StepInfo> {
        let true_label = self.dataset.labels(self.split)[idx];
        let next_observation = if idx + 1 < self.split_len() {
            Some(self.observation_at(idx + 1)?)
        } else {
            None
        };
        Ok(StepInfo {
            true_label,
            next_observation,
        })
    }
}

impl Environment for CreditScoringEnv {
    /// Starts an episode at the first sample of the active split.
    ///
    /// # Returns
    /// Manipulated first sample and its info (label plus look-ahead observation)
    fn reset(&mut self) -> Result<(FeatureVector, StepInfo)> {
        if self.split_len() == 0 {
            return Err(SimError::Data(format!("{:?} split is empty", self.split)));
        }
        self.cursor = 0;
        self.state = EnvState::Running;
        self.episode += 1;
        self.episode_reward = 0.0;
        debug!(episode = self.episode, split = ?self.split, "Episode reset");
        let observation = self.observation_at(0)?;
        let info = self.info_at(0)?;
        Ok((observation, info))
    }

    /// Scores `decision` against the sample under the cursor, then advances.
    ///
    /// # Invariants
    /// * reward is `+1` when the decision equals the label, `-1` otherwise
    /// * `terminated` iff the advanced cursor reaches the split length
    /// * `truncated` iff the advanced cursor exceeds `max_episode_length`
    /// * the cursor never leaves `[0, len)`; at episode end it stays on the last scored sample
    ///   and the info carries that sample's label
    fn step(&mut self, decision: Decision, policy: Option<ClassifierWeights>) -> Result<StepOutcome> {
        match self.state {
            EnvState::Running => {}
            EnvState::Idle => {
                return Err(SimError::Sequencing("step called before reset".to_string()))
            }
            EnvState::Terminated => {
                return Err(SimError::Sequencing(
                    "step called after the episode ended without a reset".to_string(),
                ))
            }
        }
        let len = self.split_len();
        if self.cursor >= len {
            return Err(SimError::Invariant(format!(
                "cursor {} outside split of length {}",
                self.cursor, len
            )));
        }

        // the only fallible update runs before any other state changes
        if let Some(policy) = policy {
            self.set_policy_snapshot(policy)?;
        }

        let label = self.dataset.labels(self.split)[self.cursor];
        let reward = if decision.matches(label) {
            REWARD_CORRECT
        } else {
            REWARD_INCORRECT
        };
        self.episode_reward += reward;

        let next = self.cursor + 1;
        let terminated = next >= len;
        let truncated = next > self.max_episode_length;

        if terminated || truncated {
            self.state = EnvState::Terminated;
            let info = self.info_at(self.cursor)?;
            info!(
                episode = self.episode,
                split = ?self.split,
                steps = next,
                reward = self.episode_reward,
                terminated,
                truncated,
                "Episode finished"
            );
            return Ok(StepOutcome {
                observation: None,
                reward,
                terminated,
                truncated,
                info,
            });
        }

        self.cursor = next;
        let observation = self.observation_at(self.cursor)?;
        let info = self.info_at(self.cursor)?;
        Ok(StepOutcome {
            observation: Some(observation),
            reward,
            terminated,
            truncated,
            info,
        })
    }
}
