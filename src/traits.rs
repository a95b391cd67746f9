use crate::data::{Dataset, FeatureVector};
use crate::decision::Decision;
use crate::env::{StepInfo, StepOutcome};
use crate::error::Result;
use crate::trace::AscentTrace;
use crate::weights::ClassifierWeights;

/// Episodic environment driven by a single controlling loop.
pub trait Environment {
    fn reset(&mut self) -> Result<(FeatureVector, StepInfo)>;

    /// Scores `decision` against the current sample and advances. When `policy` is given it
    /// replaces the snapshot used for every later strategic response.
    fn step(&mut self, decision: Decision, policy: Option<ClassifierWeights>) -> Result<StepOutcome>;
}

/// Source of the train and test splits, loaded once up front.
pub trait DatasetProvider {
    fn load(&self) -> Result<Dataset>;
}

/// Receives iterative-ascent trajectories. Never influences the response itself.
pub trait TraceSink {
    fn record(&mut self, trace: &AscentTrace) -> Result<()>;
}
