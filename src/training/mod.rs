//! Round-based training and evaluation drivers

pub mod eval;
pub mod orchestrator;
pub mod reward;
pub mod round;

pub use eval::{EvalConfig, EvalRound, EvaluationRunner};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RoundSummary, StepStatus, TrainedBot};
pub use reward::{DamageLedger, RewardConfig, RewardShaper, StepContext};
pub use round::{EndReason, RoundOutcome, RoundPhase, RoundState};
