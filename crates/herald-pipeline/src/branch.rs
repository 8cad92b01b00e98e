//! Branch selection for a run and post-run cleanup.
//!
//! Merge-request runs work directly on the source branch. Issue runs get
//! a dedicated working branch derived from the issue number, created from
//! the base branch on first use and reused verbatim on repeat runs so a
//! second trigger continues where the first left off.

use herald_core::model::{BranchPlan, Entity};
use herald_core::platform::Platform;
use herald_core::HeraldError;

use crate::context::RunContext;

pub const ISSUE_BRANCH_PREFIX: &str = "claude-issue-";

pub fn issue_branch_name(issue_number: u64) -> String {
    format!("{ISSUE_BRANCH_PREFIX}{issue_number}")
}

/// Resolves the base and working branches for this run.
///
/// Branch creation failures are fatal: a run that cannot get its working
/// branch has nowhere safe to push.
pub async fn setup_branch(
    platform: &dyn Platform,
    context: &RunContext,
    entity: Option<&Entity>,
) -> Result<BranchPlan, HeraldError> {
    match entity {
        Some(Entity::MergeRequest(merge_request)) => Ok(BranchPlan {
            base_branch: merge_request.target_branch.clone(),
            current_branch: merge_request.source_branch.clone(),
            claude_branch: None,
        }),
        Some(Entity::Issue(issue)) => {
            let base_branch = context
                .options
                .base_branch
                .clone()
                .unwrap_or_else(|| context.repository.default_branch.clone());
            let branch = issue_branch_name(issue.number);
            if platform.branch_exists(&branch).await? {
                tracing::info!(branch, "reusing existing working branch");
            } else {
                platform.create_branch(&branch, &base_branch).await?;
                tracing::info!(branch, base = base_branch, "created working branch");
            }
            Ok(BranchPlan {
                base_branch,
                current_branch: branch.clone(),
                claude_branch: Some(branch),
            })
        }
        None => {
            let base_branch = context.repository.default_branch.clone();
            let current_branch = if context.ambient_branch.is_empty() {
                base_branch.clone()
            } else {
                context.ambient_branch.clone()
            };
            Ok(BranchPlan {
                base_branch,
                current_branch,
                claude_branch: None,
            })
        }
    }
}

/// What cleanup decided: whether the branch was empty (and so deleted),
/// and the branch link to surface in the final comment when it was kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupOutcome {
    pub should_delete: bool,
    pub branch_link: String,
}

/// Deletes the working branch when the run pushed nothing to it.
///
/// Infallible by contract: comparison or deletion failures degrade to
/// keeping the branch, with the deletion decision still reported so the
/// comment never links a branch scheduled for removal.
pub async fn cleanup_if_empty(
    platform: &dyn Platform,
    branch: &str,
    base_branch: &str,
) -> CleanupOutcome {
    if branch.is_empty() || base_branch.is_empty() || branch == base_branch {
        return CleanupOutcome::default();
    }
    match platform.compare_branches(base_branch, branch).await {
        Ok(comparison) if comparison.is_empty() => {
            if let Err(error) = platform.delete_branch(branch).await {
                tracing::warn!(branch, error = %error, "failed to delete empty working branch");
            } else {
                tracing::info!(branch, "deleted empty working branch");
            }
            CleanupOutcome {
                should_delete: true,
                branch_link: String::new(),
            }
        }
        Ok(_) => CleanupOutcome {
            should_delete: false,
            branch_link: platform.branch_url(branch),
        },
        Err(error) => {
            tracing::warn!(branch, error = %error, "branch comparison failed; keeping branch");
            CleanupOutcome::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::issue_branch_name;

    #[test]
    fn unit_issue_branch_name_embeds_issue_number() {
        assert_eq!(issue_branch_name(789), "claude-issue-789");
        assert_eq!(issue_branch_name(1), "claude-issue-1");
    }
}
