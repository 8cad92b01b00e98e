//! Canonical data model, capability interface, and shared value logic for
//! the herald delegation pipeline.
//!
//! Everything here is platform-independent: the two adapter crates produce
//! and consume these types, and the pipeline crate sequences them. The only
//! I/O in this crate is the handoff record's file load/save.

pub mod comment;
pub mod diff;
pub mod error;
pub mod handoff;
pub mod model;
pub mod platform;
pub mod retry;

pub use comment::{
    branch_note_line, format_seconds, CommentDocument, CommentHeader, RunFooter, RunOutcome,
    ERROR_HEADER, PENDING_HEADER, SUCCESS_HEADER, TRACKING_MARKER,
};
pub use diff::{count_diff_lines, sum_file_changes};
pub use error::HeraldError;
pub use handoff::{HandoffRecord, RunMetrics, HANDOFF_SCHEMA_VERSION};
pub use model::{
    Actor, BranchComparison, BranchPlan, ChangeType, Comment, Commit, CommitAuthor, Entity,
    EntityKind, EntityState, FileChange, Issue, MergeRequest, Repository, Review, ReviewComment,
    RunData, UNKNOWN_DISPLAY_NAME, UNKNOWN_USERNAME,
};
pub use platform::{
    AccessLevel, ActorProfile, EntityHandle, EntityPreview, OptionalFetch, Platform, ProviderKind,
};
