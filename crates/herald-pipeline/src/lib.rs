//! Pipeline stages that turn a CI event into a delegated coding run.
//!
//! The flow is fixed: resolve the [`context::RunContext`] from ambient
//! signals, gate on write access and a human actor, evaluate the trigger,
//! post the tracking comment, fetch and normalize run data, resolve
//! branches, write the task spec, execute the assistant, and finalize.
//! [`orchestrator::Pipeline`] sequences the stages; each stage module is
//! independently testable against any [`herald_core::Platform`].

pub mod access;
pub mod branch;
pub mod context;
pub mod orchestrator;
pub mod prompt;
pub mod runner;
pub mod tracker;
pub mod trigger;


pub use context::{
    build_platform, detect_provider, resolve_context, resolve_credential, Credential,
    CredentialSource, EnvSource, RunContext, TriggerOptions,
};
pub use orchestrator::{
    FinalizeRequest, Pipeline, PipelinePaths, PrepareReport, RunSummary,
};
pub use runner::{AssistantRunner, ClaudeCliRunner, ClaudeCliRunnerConfig, RunnerRequest};
pub use trigger::TriggerDecision;
