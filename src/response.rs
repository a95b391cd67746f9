//! Applicant best response to a published linear classifier.
//!
//! An applicant with true features `x` reports `z`, chosen to maximise
//! `sigmoid(θ·z) - (1/2ε)·Σ w_i (z_i - x_i)^2` over the manipulable features
//! only. Two solvers are available: the first-order closed form
//! `z_i = x_i - ε·θ_i` and projected iterative ascent with `z` kept in `[0, 1]`.

use tracing::warn;

use crate::config::{AscentOptimizer, ResponseConfig, ResponseStrategy};
use crate::data::FeatureVector;
use crate::error::{Result, SimError};
use crate::linalg::sigmoid;
use crate::trace::AscentTrace;
use crate::traits::TraceSink;
use crate::weights::ClassifierWeights;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

pub struct StrategicResponder {
    config: ResponseConfig,
    /// Sorted manipulable feature indices.
    features: Vec<usize>,
    /// Cost weight per non-bias feature.
    cost_weights: Vec<f64>,
    calls: u64,
    sink: Option<Box<dyn TraceSink>>,
}

impl std::fmt::Debug for StrategicResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategicResponder")
            .field("config", &self.config)
            .field("features", &self.features)
            .field("cost_weights", &self.cost_weights)
            .field("calls", &self.calls)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl StrategicResponder {
    /// Binds a response configuration to a feature dimension `D`.
    ///
    /// # Errors
    /// `SimError::Config` if the configuration is invalid, a manipulable index is `>= D`
    /// (the bias at index `D` can never be manipulated) or the cost weights do not cover `D`.
    /// Indices are not checked when manipulation is disabled.
    pub fn new(config: ResponseConfig, feature_dim: usize) -> Result<Self> {
        config.validate()?;
        let out_of_range = config
            .strategic_features
            .iter()
            .find(|&&i| i >= feature_dim)
            .filter(|_| config.manipulation_enabled);
        if let Some(&bad) = out_of_range {
            return Err(SimError::Config(format!(
                "strategic feature index {} out of range for {} features",
                bad, feature_dim
            )));
        }
        let cost_weights = if config.feature_cost_weights.is_empty() {
            vec![config.cost_weight; feature_dim]
        } else if config.feature_cost_weights.len() == feature_dim {
            config.feature_cost_weights.clone()
        } else {
            return Err(SimError::Config(format!(
                "expected {} feature cost weights, got {}",
                feature_dim,
                config.feature_cost_weights.len()
            )));
        };
        Ok(Self {
            features: config
                .strategic_features
                .iter()
                .copied()
                .filter(|&i| i < feature_dim)
                .collect(),
            cost_weights,
            config,
            calls: 0,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn TraceSink>>) {
        self.sink = sink;
    }

    pub fn config(&self) -> &ResponseConfig {
        &self.config
    }

    /// Number of responses computed so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn is_identity(&self) -> bool {
        !self.config.manipulation_enabled || self.config.epsilon == 0.0 || self.features.is_empty()
    }

    /// Manipulated copy of `x` under the classifier `theta`.
    pub fn respond(&mut self, x: &[f64], theta: &ClassifierWeights) -> Result<FeatureVector> {
        if x.len() != theta.len() {
            return Err(SimError::DimensionMismatch {
                expected: theta.len(),
                found: x.len(),
            });
        }
        if x.len() != self.cost_weights.len() + 1 {
            return Err(SimError::DimensionMismatch {
                expected: self.cost_weights.len() + 1,
                found: x.len(),
            });
        }
        self.calls += 1;
        if self.is_identity() {
            return Ok(x.to_vec());
        }
        match self.config.strategy {
            ResponseStrategy::ClosedForm => Ok(closed_form_response(
                x,
                theta,
                self.config.epsilon,
                &self.features,
            )),
            ResponseStrategy::IterativeAscent => {
                let traced = self.sink.is_some() && self.config.trace_calls.contains(&self.calls);
                let mut trace = traced.then(|| AscentTrace::new(self.calls, self.features.clone()));
                let z = ascent_response(
                    x,
                    theta,
                    &AscentParams {
                        epsilon: self.config.epsilon,
                        steps: self.config.ascent_steps,
                        lr: self.config.ascent_lr,
                        optimizer: self.config.ascent_optimizer,
                    },
                    &self.features,
                    &self.cost_weights,
                    trace.as_mut(),
                );
                if let (Some(trace), Some(sink)) = (trace, self.sink.as_mut()) {
                    if let Err(e) = sink.record(&trace) {
                        warn!(call = trace.call, "Failed to record ascent trace: {}", e);
                    }
                }
                Ok(z)
            }
        }
    }
}

/// `x'_i = x_i - ε·θ_i` for `i` in `features`; every other coordinate is copied.
pub fn closed_form_response(
    x: &[f64],
    theta: &[f64],
    epsilon: f64,
    features: &[usize],
) -> FeatureVector {
    let mut z = x.to_vec();
    for &i in features {
        z[i] = x[i] - epsilon * theta[i];
    }
    z
}

#[derive(Clone, Copy, Debug)]
pub struct AscentParams {
    pub epsilon: f64,
    pub steps: usize,
    pub lr: f64,
    pub optimizer: AscentOptimizer,
}

/// Projected ascent on `sigmoid(θ_S·z + c) - Σ_S w_i (z_i - x_i)^2 / (2ε)`, starting at `x_S`,
/// clamping every optimised coordinate into `[0, 1]` after each step. `c` collects the fixed
/// features and the bias. `features` must be sorted. Optimizer state starts fresh on every call.
pub fn ascent_response(
    x: &[f64],
    theta: &[f64],
    params: &AscentParams,
    features: &[usize],
    cost_weights: &[f64],
    mut trace: Option<&mut AscentTrace>,
) -> FeatureVector {
    let d = theta.len() - 1;
    let fixed: f64 = (0..d)
        .filter(|i| features.binary_search(i).is_err())
        .map(|i| theta[i] * x[i])
        .sum::<f64>()
        + theta[d];

    let x_s: Vec<f64> = features.iter().map(|&i| x[i]).collect();
    let theta_s: Vec<f64> = features.iter().map(|&i| theta[i]).collect();
    let cost_s: Vec<f64> = features.iter().map(|&i| cost_weights[i]).collect();
    let mut z_s = x_s.clone();

    let mut m = vec![0.0; z_s.len()];
    let mut v = vec![0.0; z_s.len()];

    // 1/ε overflows: the cost dominates every move, leaving only the projection of x_S
    let pinned = !(1.0 / params.epsilon).is_finite();

    for t in 1..=params.steps {
        let logit = fixed + theta_s.iter().zip(&z_s).map(|(a, b)| a * b).sum::<f64>();
        let s = sigmoid(logit);
        let slope = s * (1.0 - s);
        let bc1 = 1.0 - ADAM_BETA1.powi(t as i32);
        let bc2 = 1.0 - ADAM_BETA2.powi(t as i32);

        for k in 0..z_s.len() {
            // gradient of the loss (negated objective)
            let grad = -slope * theta_s[k] + cost_s[k] * (z_s[k] - x_s[k]) / params.epsilon;
            let step = if pinned || !grad.is_finite() {
                None
            } else {
                match params.optimizer {
                    AscentOptimizer::Gradient => Some(params.lr * grad),
                    AscentOptimizer::Adam => {
                        m[k] = ADAM_BETA1 * m[k] + (1.0 - ADAM_BETA1) * grad;
                        v[k] = ADAM_BETA2 * v[k] + (1.0 - ADAM_BETA2) * grad * grad;
                        let denom = (v[k] / bc2).sqrt() + ADAM_EPS;
                        Some(params.lr * (m[k] / bc1) / denom)
                    }
                }
            };
            match step.filter(|s| s.is_finite()) {
                Some(step) => z_s[k] -= step,
                None => {
                    // overflowing cost pulls the coordinate back to the reported value
                    z_s[k] = x_s[k];
                    m[k] = 0.0;
                    v[k] = 0.0;
                }
            }
        }

        for z in z_s.iter_mut() {
            *z = z.clamp(0.0, 1.0);
        }
        if let Some(trace) = trace.as_deref_mut() {
            trace.steps.push(z_s.clone());
        }
    }

    let mut out = x.to_vec();
    for (k, &i) in features.iter().enumerate() {
        out[i] = z_s[k];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::MemoryTraceSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn weights(v: &[f64]) -> ClassifierWeights {
        ClassifierWeights::new(v.to_vec()).unwrap()
    }

    fn config(strategy: ResponseStrategy, features: &[usize]) -> ResponseConfig {
        ResponseConfig {
            strategy,
            strategic_features: features.iter().copied().collect(),
            ..ResponseConfig::default()
        }
    }

    #[test]
    fn closed_form_moves_only_strategic_features() {
        let mut r = StrategicResponder::new(
            ResponseConfig {
                epsilon: 0.5,
                ..config(ResponseStrategy::ClosedForm, &[0, 2])
            },
            3,
        )
        .unwrap();
        let x = [1.0, 2.0, 3.0, 1.0];
        let theta = weights(&[0.4, -1.0, -2.0, 7.0]);
        let z = r.respond(&x, &theta).unwrap();
        assert_eq!(z, vec![1.0 - 0.5 * 0.4, 2.0, 3.0 + 0.5 * 2.0, 1.0]);
    }

    #[test]
    fn disabled_manipulation_is_identity() {
        let mut r = StrategicResponder::new(ResponseConfig::disabled(), 8).unwrap();
        let x = vec![0.3; 9];
        let z = r.respond(&x, &weights(&[1.0; 9])).unwrap();
        assert_eq!(z, x);
        assert_eq!(r.calls(), 1);
    }

    #[test]
    fn zero_epsilon_is_bit_identical() {
        for strategy in [ResponseStrategy::ClosedForm, ResponseStrategy::IterativeAscent] {
            let mut r = StrategicResponder::new(
                ResponseConfig {
                    epsilon: 0.0,
                    ..config(strategy, &[0, 1])
                },
                2,
            )
            .unwrap();
            let x = [-0.0, 5.5, 1.0];
            let z = r.respond(&x, &weights(&[-3.0, 2.0, 1.0])).unwrap();
            for (a, b) in x.iter().zip(&z) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn empty_feature_set_is_identity() {
        let mut r = StrategicResponder::new(config(ResponseStrategy::IterativeAscent, &[]), 2).unwrap();
        let x = [0.2, 0.4, 1.0];
        assert_eq!(r.respond(&x, &weights(&[1.0, 1.0, 0.0])).unwrap(), x.to_vec());
    }

    #[test]
    fn out_of_range_feature_is_config_error() {
        let err = StrategicResponder::new(config(ResponseStrategy::ClosedForm, &[3]), 3).unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut r = StrategicResponder::new(config(ResponseStrategy::ClosedForm, &[0]), 2).unwrap();
        let err = r.respond(&[0.1, 1.0], &weights(&[1.0, 1.0, 1.0])).unwrap_err();
        assert!(matches!(err, SimError::DimensionMismatch { .. }));
    }

    #[test]
    fn ascent_clamps_into_unit_interval() {
        let mut r = StrategicResponder::new(config(ResponseStrategy::IterativeAscent, &[0, 1]), 3).unwrap();
        let x = [-4.0, 7.0, 0.5, 1.0];
        let z = r.respond(&x, &weights(&[1.0, -1.0, 0.3, 0.0])).unwrap();
        assert!((0.0..=1.0).contains(&z[0]));
        assert!((0.0..=1.0).contains(&z[1]));
        assert_eq!(z[2], 0.5);
        assert_eq!(z[3], 1.0);
    }

    #[test]
    fn ascent_moves_toward_higher_score() {
        let params = AscentParams {
            epsilon: 1.0,
            steps: 50,
            lr: 0.01,
            optimizer: AscentOptimizer::Adam,
        };
        let x = [0.5, 0.5, 1.0];
        let theta = [2.0, -2.0, 0.0];
        let z = ascent_response(&x, &theta, &params, &[0, 1], &[0.5, 0.5], None);
        assert!(z[0] > 0.5);
        assert!(z[1] < 0.5);
    }

    #[test]
    fn vanishing_epsilon_keeps_reported_features() {
        let mut r = StrategicResponder::new(
            ResponseConfig {
                epsilon: 1e-320,
                ..config(ResponseStrategy::IterativeAscent, &[0])
            },
            1,
        )
        .unwrap();
        let z = r.respond(&[0.5, 1.0], &weights(&[1.0, 0.0])).unwrap();
        assert_eq!(z, vec![0.5, 1.0]);
    }

    #[test]
    fn overflowing_cost_still_lands_in_unit_interval() {
        for optimizer in [AscentOptimizer::Adam, AscentOptimizer::Gradient] {
            let params = AscentParams {
                epsilon: 1e-12,
                steps: 20,
                lr: 0.01,
                optimizer,
            };
            let z = ascent_response(&[-1e300, 1.0], &[1.0, 0.0], &params, &[0], &[0.5], None);
            assert_eq!(z, vec![0.0, 1.0]);
            let z = ascent_response(&[1e300, 1.0], &[1.0, 0.0], &params, &[0], &[0.5], None);
            assert_eq!(z, vec![1.0, 1.0]);
        }
    }

    #[test]
    fn ascent_is_deterministic() {
        let params = AscentParams {
            epsilon: 2.0,
            steps: 20,
            lr: 0.05,
            optimizer: AscentOptimizer::Gradient,
        };
        let x = [0.1, 0.9, 0.4, 1.0];
        let theta = [0.7, 0.2, -1.1, 0.3];
        let a = ascent_response(&x, &theta, &params, &[0, 2], &[0.5; 3], None);
        let b = ascent_response(&x, &theta, &params, &[0, 2], &[0.5; 3], None);
        assert_eq!(a, b);
    }

    #[test]
    fn trace_is_recorded_only_on_configured_calls_and_does_not_change_result() {
        let sink = Rc::new(RefCell::new(MemoryTraceSink::default()));
        let cfg = ResponseConfig {
            trace_calls: [2].into_iter().collect(),
            ..config(ResponseStrategy::IterativeAscent, &[0])
        };
        let mut traced = StrategicResponder::new(cfg.clone(), 1)
            .unwrap()
            .with_sink(Box::new(sink.clone()));
        let mut plain = StrategicResponder::new(cfg, 1).unwrap();
        let x = [0.3, 1.0];
        let theta = weights(&[1.5, -0.2]);
        for _ in 0..3 {
            assert_eq!(
                traced.respond(&x, &theta).unwrap(),
                plain.respond(&x, &theta).unwrap()
            );
        }
        let sink = sink.borrow();
        let traces = &sink.traces;
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].call, 2);
        assert_eq!(traces[0].steps.len(), 20);
    }
}
