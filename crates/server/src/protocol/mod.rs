//! Gateway RPC protocol: frames, error shapes and method parameters

pub mod error;
pub mod frames;
pub mod params;

pub use error::{external_error_envelope, ErrorCode, ErrorShape};
pub use frames::{ClientFrame, Responder, ServerFrame};
pub use params::{
    AgentConfirmParams, AgentExecuteParams, AgentIdentityParams, AgentParams, AgentWaitParams,
    ApprovalDecision, ExecApprovalRequestParams, ExecApprovalResolveParams,
};
