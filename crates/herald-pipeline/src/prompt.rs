//! Task-spec rendering: the markdown brief handed to the assistant.
//!
//! The brief carries everything the assistant needs without further API
//! access: repository and branch instructions, the normalized entity with
//! its discussion, and for merge requests the commit/file/review detail.
//! Written to the scratch directory so the runner invocation stays a
//! plain file handoff.

use std::path::{Path, PathBuf};

use herald_core::model::{BranchPlan, Comment, Issue, MergeRequest, RunData};
use herald_core::HeraldError;

use crate::context::RunContext;

pub const TASK_SPEC_FILE: &str = "task-spec.md";

/// Renders the complete task brief. `run_data` is absent only for
/// direct-prompt runs that target no entity.
pub fn render_task_spec(
    context: &RunContext,
    run_data: Option<&RunData>,
    plan: &BranchPlan,
    comment_id: Option<u64>,
) -> String {
    let mut out = String::new();
    let slug = context.repository.slug();

    match run_data.map(|data| &data.entity) {
        Some(entity) => {
            push_line(
                &mut out,
                &format!(
                    "# Coding task for {slug} {} #{}",
                    context.entity_label(),
                    entity.number()
                ),
            );
        }
        None => push_line(&mut out, &format!("# Coding task for {slug}")),
    }
    push_line(&mut out, "");
    push_line(
        &mut out,
        &format!("You are working in the repository `{slug}`."),
    );
    push_line(&mut out, "");

    push_line(&mut out, "## Branch instructions");
    push_line(&mut out, &format!("- Base branch: `{}`", plan.base_branch));
    push_line(
        &mut out,
        &format!("- Working branch: `{}`", plan.current_branch),
    );
    push_line(
        &mut out,
        &format!(
            "- Commit and push your changes to `{}`. Never push to `{}` directly.",
            plan.current_branch, plan.base_branch
        ),
    );
    push_line(&mut out, "");

    if let Some(comment_id) = comment_id {
        push_line(&mut out, "## Progress reporting");
        push_line(
            &mut out,
            &format!(
                "A status comment with id `{comment_id}` tracks this run. \
                 Post progress by updating that comment's body; do not open new comments."
            ),
        );
        push_line(&mut out, "");
    }

    push_line(&mut out, "## Request");
    match context.options.direct_prompt.as_deref() {
        Some(direct_prompt) => {
            push_line(&mut out, direct_prompt);
            push_line(&mut out, "");
        }
        None => {
            push_line(
                &mut out,
                &format!(
                    "Address the request described in the {} below.",
                    context.entity_label()
                ),
            );
            push_line(&mut out, "");
        }
    }

    match run_data.map(|data| &data.entity) {
        Some(herald_core::model::Entity::Issue(issue)) => render_issue(&mut out, issue),
        Some(herald_core::model::Entity::MergeRequest(merge_request)) => {
            render_merge_request(&mut out, merge_request, context.entity_label())
        }
        None => {}
    }

    out
}

fn render_issue(out: &mut String, issue: &Issue) {
    push_line(out, &format!("## Issue #{}: {}", issue.number, issue.title));
    push_line(
        out,
        &format!(
            "State: {} | opened by @{} on {}",
            issue.state.as_str(),
            issue.author.username,
            issue.created_at
        ),
    );
    push_line(out, "");
    if !issue.description.is_empty() {
        push_line(out, &issue.description);
        push_line(out, "");
    }
    render_discussion(out, &issue.comments);
}

fn render_merge_request(out: &mut String, merge_request: &MergeRequest, label: &str) {
    push_line(
        out,
        &format!(
            "## {} #{}: {}",
            capitalize(label),
            merge_request.number,
            merge_request.title
        ),
    );
    push_line(
        out,
        &format!(
            "State: {} | opened by @{} on {} | `{}` into `{}` at `{}`",
            merge_request.state.as_str(),
            merge_request.author.username,
            merge_request.created_at,
            merge_request.source_branch,
            merge_request.target_branch,
            merge_request.head_sha
        ),
    );
    push_line(
        out,
        &format!(
            "Diff size: +{} -{} across {} files",
            merge_request.additions,
            merge_request.deletions,
            merge_request.files.len()
        ),
    );
    push_line(out, "");
    if !merge_request.description.is_empty() {
        push_line(out, &merge_request.description);
        push_line(out, "");
    }

    if !merge_request.commits.is_empty() {
        push_line(out, "### Commits");
        for commit in &merge_request.commits {
            let subject = commit.message.lines().next().unwrap_or_default();
            push_line(
                out,
                &format!("- `{}` {} ({})", short_sha(&commit.sha), subject, commit.author.name),
            );
        }
        push_line(out, "");
    }

    if !merge_request.files.is_empty() {
        push_line(out, "### Changed files");
        for file in &merge_request.files {
            push_line(
                out,
                &format!(
                    "- `{}` ({}, +{} -{})",
                    file.path,
                    file.change_type.as_str(),
                    file.additions,
                    file.deletions
                ),
            );
        }
        push_line(out, "");
    }

    if !merge_request.reviews.is_empty() {
        push_line(out, "### Reviews");
        for review in &merge_request.reviews {
            push_line(
                out,
                &format!("- @{} ({}): {}", review.author.username, review.state, review.body),
            );
            for comment in &review.comments {
                let line = comment
                    .line
                    .map(|line| format!(":{line}"))
                    .unwrap_or_default();
                push_line(
                    out,
                    &format!("  - `{}{}` {}", comment.path, line, comment.body),
                );
            }
        }
        push_line(out, "");
    }

    render_discussion(out, &merge_request.comments);
}

fn render_discussion(out: &mut String, comments: &[Comment]) {
    if comments.is_empty() {
        return;
    }
    push_line(out, "### Discussion");
    for comment in comments {
        push_line(
            out,
            &format!(
                "- @{} ({}): {}",
                comment.author.username,
                comment.created_at,
                single_line(&comment.body)
            ),
        );
    }
    push_line(out, "");
}

/// Writes the rendered task spec into the scratch directory and returns
/// its path.
pub fn write_task_spec(scratch_dir: &Path, content: &str) -> Result<PathBuf, HeraldError> {
    std::fs::create_dir_all(scratch_dir).map_err(|error| {
        HeraldError::Handoff(format!(
            "failed to create scratch directory {}: {error}",
            scratch_dir.display()
        ))
    })?;
    let path = scratch_dir.join(TASK_SPEC_FILE);
    std::fs::write(&path, content).map_err(|error| {
        HeraldError::Handoff(format!(
            "failed to write task spec {}: {error}",
            path.display()
        ))
    })?;
    Ok(path)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn short_sha(sha: &str) -> &str {
    if sha.len() > 8 {
        &sha[..8]
    } else {
        sha
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
