//! Trigger detection: decides whether a CI event is addressed to the bot.
//!
//! Checks run in fixed precedence: direct prompt, trigger phrase in the
//! entity body, trigger phrase in a comment, assignee match. Phrase
//! matching is a case-insensitive substring test. Each sub-check that
//! needs an upstream fetch degrades to "no match" on upstream errors so a
//! flaky read never aborts evaluation; transport failures still propagate.

use herald_core::model::EntityKind;
use herald_core::platform::{EntityHandle, Platform};
use herald_core::HeraldError;

use crate::context::RunContext;

/// Which rule, if any, admitted the run. Not finding a trigger is a
/// decision, not an error: the caller skips the run and exits cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// An explicit prompt was supplied; no detection ran.
    DirectPrompt,
    /// The phrase appeared in the entity title or description.
    PhraseInBody,
    /// The phrase appeared in a discussion comment.
    PhraseInComment { comment_id: u64 },
    /// The configured trigger user is assigned to the entity.
    AssigneeMatch,
    NotTriggered,
}

impl TriggerDecision {
    pub fn triggered(self) -> bool {
        !matches!(self, Self::NotTriggered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectPrompt => "direct prompt",
            Self::PhraseInBody => "phrase in body",
            Self::PhraseInComment { .. } => "phrase in comment",
            Self::AssigneeMatch => "assignee match",
            Self::NotTriggered => "not triggered",
        }
    }
}

/// Case-insensitive, unanchored substring match. `@claude` therefore also
/// matches inside `@claude-bot`; anchoring is left to operators who pick
/// distinctive phrases.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text.to_lowercase().contains(&phrase.to_lowercase())
}

pub async fn evaluate_trigger(
    platform: &dyn Platform,
    context: &RunContext,
) -> Result<TriggerDecision, HeraldError> {
    if context.options.direct_prompt.is_some() {
        tracing::info!("direct prompt supplied; skipping trigger detection");
        return Ok(TriggerDecision::DirectPrompt);
    }
    let Some(entity) = context.entity else {
        return Ok(TriggerDecision::NotTriggered);
    };

    if let Some(phrase) = non_empty(context.options.trigger_phrase.as_deref()) {
        return evaluate_phrase(platform, entity, phrase).await;
    }
    if let Some(assignee) = non_empty(context.options.assignee_trigger.as_deref()) {
        return evaluate_assignee(platform, entity, assignee).await;
    }
    Ok(TriggerDecision::NotTriggered)
}

async fn evaluate_phrase(
    platform: &dyn Platform,
    entity: EntityHandle,
    phrase: &str,
) -> Result<TriggerDecision, HeraldError> {
    if let Some(preview) = fetch_degradable(
        "entity preview",
        platform.entity_preview(entity).await,
    )? {
        if contains_phrase(&preview.title, phrase)
            || contains_phrase(&preview.description, phrase)
        {
            return Ok(TriggerDecision::PhraseInBody);
        }
    }

    if let Some(comments) = fetch_degradable(
        "entity comments",
        platform.list_entity_comments(entity).await,
    )? {
        for comment in &comments {
            if contains_phrase(&comment.body, phrase) {
                return Ok(TriggerDecision::PhraseInComment {
                    comment_id: comment.id,
                });
            }
        }
    }

    tracing::info!(
        entity = entity.kind.as_str(),
        number = entity.number,
        phrase,
        "trigger phrase not found in body or comments"
    );
    Ok(TriggerDecision::NotTriggered)
}

async fn evaluate_assignee(
    platform: &dyn Platform,
    entity: EntityHandle,
    assignee_trigger: &str,
) -> Result<TriggerDecision, HeraldError> {
    let wanted = assignee_trigger.trim_start_matches('@');
    let Some(preview) = fetch_degradable(
        "entity preview",
        platform.entity_preview(entity).await,
    )?
    else {
        return Ok(TriggerDecision::NotTriggered);
    };

    let matched = match entity.kind {
        EntityKind::MergeRequest => preview.assignee.as_deref() == Some(wanted),
        EntityKind::Issue => preview.assignees.iter().any(|name| name == wanted),
    };
    if matched {
        Ok(TriggerDecision::AssigneeMatch)
    } else {
        tracing::info!(
            entity = entity.kind.as_str(),
            number = entity.number,
            assignee_trigger = wanted,
            "trigger assignee not present on entity"
        );
        Ok(TriggerDecision::NotTriggered)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

/// Collapses one sub-check fetch: upstream rejections count as "nothing
/// found" for that check, connectivity loss aborts the evaluation.
fn fetch_degradable<T>(
    operation: &str,
    result: Result<T, HeraldError>,
) -> Result<Option<T>, HeraldError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_transport() => Err(error),
        Err(error) => {
            tracing::warn!(operation, error = %error, "trigger sub-check degraded to no-match");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_phrase, TriggerDecision};

    #[test]
    fn unit_phrase_match_is_case_insensitive() {
        assert!(contains_phrase("Hey @CLAUDE please look", "@claude"));
        assert!(contains_phrase("hey @claude", "@Claude"));
        assert!(!contains_phrase("hey claude", "@claude"));
    }

    #[test]
    fn unit_phrase_match_is_unanchored_substring() {
        assert!(contains_phrase("ping @claude-bot", "@claude"));
        assert!(contains_phrase("prefix@claude", "@claude"));
    }

    #[test]
    fn unit_empty_phrase_never_matches() {
        assert!(!contains_phrase("anything", ""));
    }

    #[test]
    fn unit_decision_reports_triggered_state() {
        assert!(TriggerDecision::DirectPrompt.triggered());
        assert!(TriggerDecision::PhraseInComment { comment_id: 1 }.triggered());
        assert!(!TriggerDecision::NotTriggered.triggered());
    }
}
