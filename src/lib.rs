//! Strategic classification simulator.
//!
//! A classifier (the principal) scores a stream of loan applicants who
//! best-respond to the classifier's published weights before reporting their
//! features. The principal learns online with a linear actor-critic:
//! - `response`: applicant best response (closed form or iterative ascent)
//! - `env`: episodic environment over a dataset split
//! - `agent`: buffered batch actor-critic learner
//! - `trainer`: the controlling loop tying the two together

pub mod agent;
pub mod buffer;
pub mod config;
pub mod data;
pub mod decision;
pub mod env;
pub mod error;
pub mod linalg;
pub mod response;
pub mod trace;
pub mod trainer;
pub mod traits;
pub mod weights;

pub use agent::{AgentHistory, BatchSummary, PrincipalAgent, Transition};
pub use buffer::ReplayBuffer;
pub use config::{
    AgentConfig, AscentOptimizer, DataConfig, EnvironmentConfig, ResponseConfig,
    ResponseStrategy, SimulationConfig, TrainingConfig,
};
pub use data::{CreditCsvProvider, Dataset, FeatureVector, InMemoryProvider, Split, SyntheticProvider};
pub use decision::Decision;
pub use env::{CreditScoringEnv, EnvState, StepInfo, StepOutcome};
pub use error::{Result, SimError};
pub use response::StrategicResponder;
pub use trace::{AscentTrace, JsonLinesTraceSink, MemoryTraceSink};
pub use trainer::{PrincipalTrainer, TrainingReport};
pub use traits::{DatasetProvider, Environment, TraceSink};
pub use weights::{ActionValueWeights, ClassifierWeights};
