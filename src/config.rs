use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// How an applicant computes its best response to the classifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    /// `x'_i = x_i - ε·θ_i` on the manipulable features.
    #[default]
    #[serde(alias = "close")]
    ClosedForm,
    /// Projected ascent on `sigmoid(θ·z) - cost(z)` over the manipulable features.
    #[serde(alias = "ga")]
    IterativeAscent,
}

impl ResponseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStrategy::ClosedForm => "closed_form",
            ResponseStrategy::IterativeAscent => "iterative_ascent",
        }
    }
}

impl FromStr for ResponseStrategy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "closed_form" | "close" => Ok(ResponseStrategy::ClosedForm),
            "iterative_ascent" | "ga" => Ok(ResponseStrategy::IterativeAscent),
            _ => Err(SimError::Config(format!("Unknown response method: {}", s))),
        }
    }
}

impl fmt::Display for ResponseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Update rule used inside the iterative-ascent best response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AscentOptimizer {
    #[default]
    Adam,
    Gradient,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default = "default_true")]
    pub manipulation_enabled: bool,
    /// Manipulation strength; the cost term is scaled by `1 / (2ε)`.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Zero-based indices of the features an applicant may change. The bias is never included.
    #[serde(default = "default_strategic_features")]
    pub strategic_features: BTreeSet<usize>,
    #[serde(default)]
    pub strategy: ResponseStrategy,
    #[serde(default = "default_ascent_steps")]
    pub ascent_steps: usize,
    #[serde(default = "default_ascent_lr")]
    pub ascent_lr: f64,
    #[serde(default)]
    pub ascent_optimizer: AscentOptimizer,
    #[serde(default = "default_cost_weight")]
    pub cost_weight: f64,
    /// Per-feature cost weights. Empty means `cost_weight` everywhere.
    #[serde(default)]
    pub feature_cost_weights: Vec<f64>,
    /// Response call numbers (1-based) whose ascent trajectory goes to the trace sink.
    #[serde(default = "default_trace_calls")]
    pub trace_calls: BTreeSet<u64>,
}

fn default_true() -> bool {
    true
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_strategic_features() -> BTreeSet<usize> {
    [0, 5, 7].into_iter().collect()
}

fn default_ascent_steps() -> usize {
    20
}

fn default_ascent_lr() -> f64 {
    0.01
}

fn default_cost_weight() -> f64 {
    0.5
}

fn default_trace_calls() -> BTreeSet<u64> {
    [10, 20, 30, 40, 50].into_iter().collect()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            manipulation_enabled: true,
            epsilon: default_epsilon(),
            strategic_features: default_strategic_features(),
            strategy: ResponseStrategy::default(),
            ascent_steps: default_ascent_steps(),
            ascent_lr: default_ascent_lr(),
            ascent_optimizer: AscentOptimizer::default(),
            cost_weight: default_cost_weight(),
            feature_cost_weights: Vec::new(),
            trace_calls: default_trace_calls(),
        }
    }
}

impl ResponseConfig {
    /// Identity response: applicants report their true features.
    pub fn disabled() -> Self {
        Self {
            manipulation_enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(SimError::Config("epsilon must be finite and >= 0".to_string()));
        }
        if self.ascent_steps == 0 {
            return Err(SimError::Config("ascent_steps must be > 0".to_string()));
        }
        if !self.ascent_lr.is_finite() || self.ascent_lr <= 0.0 {
            return Err(SimError::Config("ascent_lr must be finite and > 0".to_string()));
        }
        if !self.cost_weight.is_finite() || self.cost_weight < 0.0 {
            return Err(SimError::Config("cost_weight must be finite and >= 0".to_string()));
        }
        if self
            .feature_cost_weights
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(SimError::Config(
                "feature_cost_weights must be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "default_max_episode_length")]
    pub max_episode_length: usize,
}

fn default_max_episode_length() -> usize {
    1_000_000
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_episode_length: default_max_episode_length(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_learning_rate")]
    pub lr_actor: f64,
    #[serde(default = "default_learning_rate")]
    pub lr_critic: f64,
    #[serde(default = "default_discount")]
    pub discount: f64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Standard deviation of the Gaussian the policy weights are drawn from.
    #[serde(default = "default_initial_policy_std")]
    pub initial_policy_std: f64,
    #[serde(default = "default_initial_value_weight")]
    pub initial_value_weight: f64,
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
    /// When set, every transition in a batch sees the policy as it was before the batch.
    #[serde(default)]
    pub freeze_policy_during_batch: bool,
    #[serde(default)]
    pub seed: u64,
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_discount() -> f64 {
    0.99
}

fn default_buffer_capacity() -> usize {
    128
}

fn default_initial_policy_std() -> f64 {
    0.1
}

fn default_initial_value_weight() -> f64 {
    0.01
}

fn default_decision_threshold() -> f64 {
    0.5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lr_actor: default_learning_rate(),
            lr_critic: default_learning_rate(),
            discount: default_discount(),
            buffer_capacity: default_buffer_capacity(),
            initial_policy_std: default_initial_policy_std(),
            initial_value_weight: default_initial_value_weight(),
            decision_threshold: default_decision_threshold(),
            freeze_policy_during_batch: false,
            seed: 0,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(SimError::Config("buffer_capacity must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(SimError::Config("discount must be in [0, 1]".to_string()));
        }
        if !self.lr_actor.is_finite() || !self.lr_critic.is_finite() {
            return Err(SimError::Config("learning rates must be finite".to_string()));
        }
        if !self.initial_policy_std.is_finite() || self.initial_policy_std < 0.0 {
            return Err(SimError::Config(
                "initial_policy_std must be finite and >= 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(SimError::Config(
                "decision_threshold must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_episodes")]
    pub episodes: usize,
    #[serde(default = "default_true")]
    pub stochastic_training: bool,
}

fn default_episodes() -> usize {
    1
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: default_episodes(),
            stochastic_training: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_train_csv")]
    pub train_csv: PathBuf,
    #[serde(default = "default_test_csv")]
    pub test_csv: PathBuf,
    #[serde(default = "default_test_probabilities_csv")]
    pub test_probabilities_csv: PathBuf,
    #[serde(default = "default_label_column")]
    pub label_column: String,
    #[serde(default = "default_max_negatives")]
    pub max_negatives: usize,
    #[serde(default = "default_test_threshold")]
    pub test_threshold: f64,
    #[serde(default)]
    pub seed: u64,
}

fn default_train_csv() -> PathBuf {
    PathBuf::from("data/GiveMeSomeCredit/cs-training.csv")
}

fn default_test_csv() -> PathBuf {
    PathBuf::from("data/ProcessedData/cs-test-processed.csv")
}

fn default_test_probabilities_csv() -> PathBuf {
    PathBuf::from("data/ProcessedData/sampleEntry.csv")
}

fn default_label_column() -> String {
    "SeriousDlqin2yrs".to_string()
}

fn default_max_negatives() -> usize {
    10_000
}

fn default_test_threshold() -> f64 {
    0.5
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_csv: default_train_csv(),
            test_csv: default_test_csv(),
            test_probabilities_csv: default_test_probabilities_csv(),
            label_column: default_label_column(),
            max_negatives: default_max_negatives(),
            test_threshold: default_test_threshold(),
            seed: 0,
        }
    }
}

/// Top-level configuration, loadable from a TOML file where every section is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub data: DataConfig,
}

impl SimulationConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.response.validate()?;
        self.agent.validate()?;
        if !(0.0..=1.0).contains(&self.data.test_threshold) {
            return Err(SimError::Config("test_threshold must be in [0, 1]".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = SimulationConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimulationConfig::default());
        assert_eq!(config.agent.buffer_capacity, 128);
        assert_eq!(config.response.strategy, ResponseStrategy::ClosedForm);
    }

    #[test]
    fn parses_strategy_aliases() {
        let config = SimulationConfig::from_toml_str(
            r#"
            [response]
            strategy = "ga"
            epsilon = 0.5
            strategic_features = [1, 2]
            "#,
        )
        .unwrap();
        assert_eq!(config.response.strategy, ResponseStrategy::IterativeAscent);
        assert_eq!(config.response.epsilon, 0.5);
        assert_eq!(
            config.response.strategic_features,
            [1, 2].into_iter().collect()
        );
    }

    #[test]
    fn unknown_strategy_is_rejected_at_load() {
        let err = SimulationConfig::from_toml_str(
            r#"
            [response]
            strategy = "newton"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::Toml(_)));
        assert!("newton".parse::<ResponseStrategy>().is_err());
    }

    #[test]
    fn strategy_from_str_roundtrips_names() {
        for strategy in [ResponseStrategy::ClosedForm, ResponseStrategy::IterativeAscent] {
            assert_eq!(strategy.as_str().parse::<ResponseStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "Close".parse::<ResponseStrategy>().unwrap(),
            ResponseStrategy::ClosedForm
        );
    }

    #[test]
    fn validation_rejects_zero_capacity() {
        let err = SimulationConfig::from_toml_str(
            r#"
            [agent]
            buffer_capacity = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn validation_rejects_negative_epsilon() {
        let config = ResponseConfig {
            epsilon: -1.0,
            ..ResponseConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
