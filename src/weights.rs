use std::ops::{Deref, DerefMut};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::error::{Result, SimError};
use crate::linalg::dot;

/// Classifier (policy) parameters: one weight per feature, bias weight last.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassifierWeights(Vec<f64>);

/// At least one feature weight plus the bias.
const MIN_CLASSIFIER_LEN: usize = 2;

fn check_classifier_len(len: usize) -> Result<()> {
    if len < MIN_CLASSIFIER_LEN {
        return Err(SimError::DimensionMismatch {
            expected: MIN_CLASSIFIER_LEN,
            found: len,
        });
    }
    Ok(())
}

impl ClassifierWeights {
    pub fn new(values: Vec<f64>) -> Result<Self> {
        check_classifier_len(values.len())?;
        Ok(Self(values))
    }

    /// `len` weights all set to `value`.
    pub fn filled(len: usize, value: f64) -> Result<Self> {
        check_classifier_len(len)?;
        Ok(Self(vec![value; len]))
    }

    /// Draws every weight from `N(0, std)`.
    pub fn sample<R: Rng + ?Sized>(len: usize, std: f64, rng: &mut R) -> Result<Self> {
        check_classifier_len(len)?;
        let normal = Normal::new(0.0, std)
            .map_err(|e| SimError::Config(format!("invalid policy std {}: {}", std, e)))?;
        Ok(Self((0..len).map(|_| normal.sample(rng)).collect()))
    }

    /// Number of non-bias features.
    pub fn feature_dim(&self) -> usize {
        self.0.len() - 1
    }

    pub fn bias(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    pub fn features(&self) -> &[f64] {
        &self.0[..self.0.len() - 1]
    }

    pub fn logit(&self, observation: &[f64]) -> f64 {
        dot(&self.0, observation)
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for ClassifierWeights {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ClassifierWeights {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Linear action-value weights over `concat(observation, action)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionValueWeights(Vec<f64>);

impl ActionValueWeights {
    pub fn filled(len: usize, value: f64) -> Self {
        Self(vec![value; len])
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// `Q(obs, a) = w · concat(obs, a)`.
    pub fn q_value(&self, observation: &[f64], decision: Decision) -> f64 {
        let n = self.0.len().saturating_sub(1);
        let action_weight = self.0.get(n).copied().unwrap_or(0.0);
        dot(&self.0[..n], observation) + action_weight * decision.as_f64()
    }

    pub fn max_q(&self, observation: &[f64]) -> f64 {
        self.q_value(observation, Decision::Reject)
            .max(self.q_value(observation, Decision::Accept))
    }

    /// `w += scale · concat(obs, a)`.
    pub fn add_scaled(&mut self, observation: &[f64], decision: Decision, scale: f64) {
        let Some(n) = self.0.len().checked_sub(1) else {
            return;
        };
        for (w, x) in self.0[..n].iter_mut().zip(observation) {
            *w += scale * x;
        }
        self.0[n] += scale * decision.as_f64();
    }
}

impl Deref for ActionValueWeights {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
