//! Error taxonomy for the delegation pipeline.
//!
//! "Trigger not found" is deliberately absent: a negative trigger decision
//! stops the pipeline successfully and is modeled as a value, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeraldError {
    /// A required ambient signal or credential is missing or malformed.
    /// Raised before any write side effect occurs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The platform rejected our credential outright.
    #[error("platform authentication failed with status {status}: {message}")]
    Authentication { status: u16, message: String },

    /// The triggering actor lacks the required role. Non-retryable.
    #[error("actor '{actor}' does not have write permissions")]
    Authorization { actor: String },

    /// Non-success response from the platform API on a required resource.
    #[error("platform api {operation} failed with status {status}: {message}")]
    UpstreamApi {
        operation: String,
        status: u16,
        message: String,
    },

    /// The request never produced a usable response (connect, timeout,
    /// body read). Distinct from `UpstreamApi` so callers can tell "the
    /// platform said no" apart from "we never reached the platform".
    #[error("platform api {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The tracking comment disappeared between transitions.
    #[error("tracking comment {comment_id} was not found")]
    CommentMissing { comment_id: u64 },

    /// The triggering actor is a known automation account.
    #[error("actor '{username}' is a bot account; refusing to start a run")]
    BotActor { username: String },

    /// The assistant runner failed to produce a result.
    #[error("assistant runner failed: {0}")]
    Runner(String),

    /// A cross-invocation handoff artifact (the record or the task spec)
    /// could not be read or written.
    #[error("handoff record error: {0}")]
    Handoff(String),
}

impl HeraldError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Upstream HTTP status, when this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::UpstreamApi { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures where the platform was never reached. The trigger
    /// evaluator propagates these instead of degrading the sub-check.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
