use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::PrincipalAgent;
use crate::config::{SimulationConfig, TrainingConfig};
use crate::data::{Dataset, FeatureVector, Split};
use crate::env::{CreditScoringEnv, StepInfo};
use crate::error::{Result, SimError};
use crate::traits::{DatasetProvider, Environment};
use crate::weights::{ActionValueWeights, ClassifierWeights};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: usize,
    pub steps: usize,
    pub total_reward: f64,
    pub batch_updates: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub episodes: Vec<EpisodeSummary>,
    pub total_steps: usize,
    pub mean_training_reward: f64,
    pub batch_updates: usize,
    /// `None` when the test split is empty.
    pub test_accuracy: Option<f64>,
    pub final_policy: ClassifierWeights,
    pub final_values: ActionValueWeights,
}

/// Drives the agent/environment loop: `reset → select_action → step → observe`.
pub struct PrincipalTrainer {
    pub config: TrainingConfig,
    env: CreditScoringEnv,
    agent: PrincipalAgent,
}

impl PrincipalTrainer {
    /// Pairs an environment with an agent and publishes the agent's policy to the environment.
    pub fn new(mut env: CreditScoringEnv, agent: PrincipalAgent, config: TrainingConfig) -> Result<Self> {
        env.set_policy_snapshot(agent.policy_weights().clone())?;
        Ok(Self { config, env, agent })
    }

    pub fn from_dataset(dataset: Dataset, config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        let agent = PrincipalAgent::new(dataset.feature_dim(), config.agent.clone())?;
        let env = CreditScoringEnv::new(
            dataset,
            config.response.clone(),
            config.environment.clone(),
            agent.policy_weights().clone(),
        )?;
        Self::new(env, agent, config.training.clone())
    }

    pub fn from_provider(provider: &dyn DatasetProvider, config: &SimulationConfig) -> Result<Self> {
        Self::from_dataset(provider.load()?, config)
    }

    pub fn env(&self) -> &CreditScoringEnv {
        &self.env
    }

    pub fn agent(&self) -> &PrincipalAgent {
        &self.agent
    }

    pub fn into_parts(self) -> (CreditScoringEnv, PrincipalAgent) {
        (self.env, self.agent)
    }

    pub fn run(&mut self) -> Result<TrainingReport> {
        let mut episodes = Vec::with_capacity(self.config.episodes);
        for episode in 0..self.config.episodes {
            episodes.push(self.train_episode(episode)?);
        }
        let test_accuracy = self.evaluate()?;

        let total_steps = episodes.iter().map(|e| e.steps).sum();
        let report = TrainingReport {
            total_steps,
            mean_training_reward: self.agent.history().mean_training_reward().unwrap_or(0.0),
            batch_updates: self.agent.history().batch_updates,
            test_accuracy,
            final_policy: self.agent.policy_weights().clone(),
            final_values: self.agent.value_weights().clone(),
            episodes,
        };
        info!(
            total_steps = report.total_steps,
            batch_updates = report.batch_updates,
            test_accuracy = ?report.test_accuracy,
            "Training complete"
        );
        Ok(report)
    }

    /// One pass over the training split.
    pub fn train_episode(&mut self, episode: usize) -> Result<EpisodeSummary> {
        self.env.set_split(Split::Train);
        let batches_before = self.agent.history().batch_updates;
        let (mut obs, mut info) = self.env.reset()?;
        let mut steps = 0;
        let mut total_reward = 0.0;

        loop {
            let (prob, decision) = self
                .agent
                .select_action(&obs, self.config.stochastic_training)?;
            let outcome = self
                .env
                .step(decision, Some(self.agent.policy_weights().clone()))?;
            // `info` describes `obs`: its label and the look-ahead observation.
            self.agent
                .observe(&obs, decision, outcome.reward, outcome.terminated, &info, prob)?;
            steps += 1;
            total_reward += outcome.reward;

            if outcome.is_done() {
                break;
            }
            (obs, info) = next_pair(outcome.observation, outcome.info)?;
        }

        let summary = EpisodeSummary {
            episode,
            steps,
            total_reward,
            batch_updates: self.agent.history().batch_updates - batches_before,
        };
        info!(
            episode,
            steps,
            total_reward,
            batch_updates = summary.batch_updates,
            "Training episode complete"
        );
        Ok(summary)
    }

    /// Deterministic pass over the test split. Returns the accuracy of this pass.
    pub fn evaluate(&mut self) -> Result<Option<f64>> {
        self.env.set_split(Split::Test);
        let total = self.env.dataset().len(Split::Test);
        if total == 0 {
            return Ok(None);
        }
        let (mut obs, mut info) = self.env.reset()?;
        let mut correct = 0usize;
        let mut seen = 0usize;

        loop {
            let (prob, decision) = self.agent.select_action(&obs, false)?;
            self.agent.record_test_result(decision, &info, prob);
            if decision.matches(info.true_label) {
                correct += 1;
            }
            seen += 1;
            let outcome = self
                .env
                .step(decision, Some(self.agent.policy_weights().clone()))?;
            if outcome.is_done() {
                break;
            }
            (obs, info) = next_pair(outcome.observation, outcome.info)?;
        }

        let accuracy = correct as f64 / seen as f64;
        info!(samples = seen, accuracy, "Evaluation complete");
        Ok(Some(accuracy))
    }
}

fn next_pair(observation: Option<FeatureVector>, info: StepInfo) -> Result<(FeatureVector, StepInfo)> {
    let observation = observation.ok_or_else(|| {
        SimError::Invariant("running episode produced no observation".to_string())
    })?;
    Ok((observation, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::data::SyntheticProvider;

    #[test]
    fn episode_visits_every_training_sample() {
        let provider = SyntheticProvider {
            train_len: 50,
            test_len: 10,
            ..SyntheticProvider::default()
        };
        let config = SimulationConfig {
            agent: AgentConfig {
                buffer_capacity: 8,
                ..AgentConfig::default()
            },
            response: crate::config::ResponseConfig {
                strategic_features: [0].into_iter().collect(),
                ..Default::default()
            },
            ..SimulationConfig::default()
        };
        let mut trainer = PrincipalTrainer::from_provider(&provider, &config).unwrap();
        let summary = trainer.train_episode(0).unwrap();
        assert_eq!(summary.steps, 50);
        assert_eq!(summary.batch_updates, 6);
        assert_eq!(trainer.agent().buffer_len(), 2);
        assert_eq!(trainer.env().policy_snapshot(), trainer.agent().policy_weights());
    }
}
