//! Run model, raw run events and per-run registries

pub mod event;
pub mod model;
pub mod registry;

pub use event::{RunEventEnvelope, RunStream};
pub use model::{ExecutionMode, Operation, RunJob, RunMetrics, RunStatus, VerboseLevel};
pub use registry::{
    ChatRunEntry, ChatRunRegistry, RunContext, RunContextRegistry, RunJobRegistry,
    ToolEventRecipients,
};
