//! Tracking-comment lifecycle: create, announce the branch, finalize.
//!
//! Every transition reads the live comment, reparses it into a
//! [`CommentDocument`], mutates sections, and rerenders the whole body.
//! Rerendering from structure is what makes transitions idempotent:
//! applying the same transition twice converges on the same body.

use herald_core::comment::{branch_note_line, CommentDocument, RunFooter, RunOutcome};
use herald_core::platform::{EntityHandle, Platform};
use herald_core::HeraldError;

/// Inputs for the terminal transition.
#[derive(Debug, Clone)]
pub struct FinalizeUpdate {
    pub outcome: RunOutcome,
    /// Shown in the error block when the outcome is an error.
    pub error_message: Option<String>,
    /// Working branch that survived cleanup, if any.
    pub kept_branch: Option<String>,
    pub base_branch: String,
    pub footer: RunFooter,
}

/// Handle on one entity's tracking comment. Constructing one requires an
/// entity handle, so a comment can never be created for a run without a
/// discussion thread to live in.
pub struct TrackingComment<'a> {
    platform: &'a dyn Platform,
    entity: EntityHandle,
}

impl<'a> TrackingComment<'a> {
    pub fn new(platform: &'a dyn Platform, entity: EntityHandle) -> Self {
        Self { platform, entity }
    }

    fn entity_label(&self) -> &'static str {
        if self.entity.kind.is_issue() {
            "issue"
        } else {
            self.platform.provider().change_request_noun()
        }
    }

    /// Posts the pending-state comment and returns its id. Failures are
    /// fatal to prepare: without the comment there is nowhere to report
    /// the run.
    pub async fn create(&self) -> Result<u64, HeraldError> {
        let body = CommentDocument::pending(self.entity_label()).render();
        let comment_id = self.platform.create_comment(self.entity, &body).await?;
        tracing::info!(
            entity = self.entity.kind.as_str(),
            number = self.entity.number,
            comment_id,
            "created tracking comment"
        );
        Ok(comment_id)
    }

    /// Adds the working-branch note to the pending comment. Purely
    /// cosmetic, so every failure degrades to a warning.
    pub async fn announce_branch(&self, comment_id: u64, branch: &str) {
        if let Err(error) = self.try_announce_branch(comment_id, branch).await {
            tracing::warn!(
                comment_id,
                branch,
                error = %error,
                "branch announcement skipped"
            );
        }
    }

    async fn try_announce_branch(&self, comment_id: u64, branch: &str) -> Result<(), HeraldError> {
        let current = self.platform.get_comment(self.entity, comment_id).await?;
        let mut document = CommentDocument::parse(&current.body);
        let note = branch_note_line(branch, Some(&self.platform.branch_url(branch)));
        if document.branch_note.as_deref() == Some(note.as_str()) {
            return Ok(());
        }
        document.set_branch_note(note);
        self.platform
            .update_comment(self.entity, comment_id, &document.render())
            .await
    }

    /// Rewrites the comment into its terminal success or error form.
    ///
    /// Run-critical: errors propagate, including [`HeraldError::CommentMissing`]
    /// when the comment was deleted mid-run. The caller decides how loudly
    /// a missing comment should fail.
    pub async fn finalize(
        &self,
        comment_id: u64,
        update: &FinalizeUpdate,
    ) -> Result<(), HeraldError> {
        let current = self.platform.get_comment(self.entity, comment_id).await?;
        let mut document = CommentDocument::parse(&current.body);
        document.mark_finalized(update.outcome);
        if update.outcome == RunOutcome::Error {
            if let Some(message) = update
                .error_message
                .as_deref()
                .filter(|message| !message.is_empty())
            {
                document.set_error(message);
            }
        }
        match update.kept_branch.as_deref() {
            Some(branch) => {
                let branch_url = self.platform.branch_url(branch);
                if document.branch_note.is_none() {
                    document.set_branch_note(branch_note_line(branch, Some(&branch_url)));
                }
                document.ensure_links(
                    &branch_url,
                    &self
                        .platform
                        .new_change_request_url(&update.base_branch, branch),
                    self.platform.provider().change_request_noun(),
                );
            }
            // No surviving branch means cleanup deleted it as empty (or
            // none was ever created); drop the note whatever the outcome
            // so the comment never links a branch that no longer exists.
            None => {
                document.branch_note = None;
            }
        }
        document.set_footer(&update.footer);
        self.platform
            .update_comment(self.entity, comment_id, &document.render())
            .await?;
        tracing::info!(
            comment_id,
            outcome = match update.outcome {
                RunOutcome::Success => "success",
                RunOutcome::Error => "error",
            },
            "finalized tracking comment"
        );
        Ok(())
    }
}
