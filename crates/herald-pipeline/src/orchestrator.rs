//! Run orchestration: the prepare and finalize stages, plus the combined
//! single-process run.
//!
//! Prepare gates the event, posts the tracking comment, resolves branches,
//! writes the task spec, and records everything finalize needs in the
//! handoff file. Finalize reads that file back, cleans up an unused
//! working branch, and rewrites the tracking comment into its terminal
//! state. A prepare failure still writes the handoff record, carrying the
//! failure text, so a later finalize stage can tell "assistant failed"
//! apart from "pipeline never started".

use std::path::PathBuf;
use std::sync::Arc;

use herald_core::comment::{RunFooter, RunOutcome};
use herald_core::handoff::{HandoffRecord, RunMetrics, HANDOFF_SCHEMA_VERSION};
use herald_core::model::RunData;
use herald_core::platform::Platform;
use herald_core::HeraldError;

use crate::access::{assert_human_actor, has_write_access};
use crate::branch::{cleanup_if_empty, setup_branch};
use crate::context::RunContext;
use crate::prompt::{render_task_spec, write_task_spec};
use crate::runner::{AssistantRunner, RunnerRequest};
use crate::tracker::{FinalizeUpdate, TrackingComment};
use crate::trigger::{evaluate_trigger, TriggerDecision};

/// Filesystem locations shared by the prepare and finalize invocations.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub handoff_file: PathBuf,
    pub scratch_dir: PathBuf,
}

/// What prepare produced. `triggered == false` means the event was not
/// addressed to the bot and the run should stop successfully.
#[derive(Debug, Clone)]
pub struct PrepareReport {
    pub triggered: bool,
    pub decision: TriggerDecision,
    pub comment_id: Option<u64>,
    pub plan: Option<herald_core::model::BranchPlan>,
    pub prompt_path: Option<PathBuf>,
}

impl PrepareReport {
    fn skipped(decision: TriggerDecision) -> Self {
        Self {
            triggered: false,
            decision,
            comment_id: None,
            plan: None,
            prompt_path: None,
        }
    }
}

/// Outcome report handed to the finalize stage by the caller. A recorded
/// prepare failure overrides `failed`; metrics fall back to whatever the
/// handoff record carries.
#[derive(Debug, Clone, Default)]
pub struct FinalizeRequest {
    pub failed: bool,
    pub error_message: Option<String>,
    pub metrics: Option<RunMetrics>,
}

/// End-to-end result of a combined run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub triggered: bool,
    pub outcome: Option<RunOutcome>,
    pub error_message: Option<String>,
    pub metrics: Option<RunMetrics>,
}

/// State prepare has already committed when a later step fails, consumed
/// by the failure bookkeeping path.
#[derive(Debug, Clone, Copy, Default)]
struct PrepareProgress {
    triggered: bool,
    comment_id: Option<u64>,
}

pub struct Pipeline {
    platform: Arc<dyn Platform>,
    context: RunContext,
    ambient_credential: bool,
    paths: PipelinePaths,
}

impl Pipeline {
    pub fn new(
        platform: Arc<dyn Platform>,
        context: RunContext,
        ambient_credential: bool,
        paths: PipelinePaths,
    ) -> Self {
        Self {
            platform,
            context,
            ambient_credential,
            paths,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Runs the prepare stage. On failure the handoff record is written
    /// with the failure text before the error propagates, and a tracking
    /// comment that already exists is moved to its error state rather
    /// than left pending.
    pub async fn prepare(&self) -> Result<PrepareReport, HeraldError> {
        let mut progress = PrepareProgress::default();
        match self.prepare_inner(&mut progress).await {
            Ok(report) => Ok(report),
            Err(error) => {
                self.record_prepare_failure(progress, &error).await;
                Err(error)
            }
        }
    }

    async fn prepare_inner(
        &self,
        progress: &mut PrepareProgress,
    ) -> Result<PrepareReport, HeraldError> {
        let context = &self.context;
        tracing::info!(
            provider = ?context.provider,
            repository = context.repository.slug(),
            actor = context.actor_username,
            "starting prepare"
        );

        let granted =
            has_write_access(&*self.platform, &context.actor_username, self.ambient_credential)
                .await?;
        if !granted {
            return Err(HeraldError::Authorization {
                actor: context.actor_username.clone(),
            });
        }
        assert_human_actor(&*self.platform, &context.actor_username).await?;

        let decision = evaluate_trigger(&*self.platform, context).await?;
        if !decision.triggered() {
            let record = self.record_skeleton(false, None);
            record.save(&self.paths.handoff_file)?;
            tracing::info!("no trigger detected; run skipped");
            return Ok(PrepareReport::skipped(decision));
        }
        progress.triggered = true;
        tracing::info!(trigger = decision.as_str(), "run triggered");

        if let Some(entity) = context.entity {
            let tracker = TrackingComment::new(&*self.platform, entity);
            progress.comment_id = Some(tracker.create().await?);
        }

        let run_data: Option<RunData> = match context.entity {
            Some(entity) => Some(self.platform.fetch_run_data(entity).await?),
            None => None,
        };

        let plan = setup_branch(
            &*self.platform,
            context,
            run_data.as_ref().map(|data| &data.entity),
        )
        .await?;
        if let (Some(comment_id), Some(branch), Some(entity)) = (
            progress.comment_id,
            plan.claude_branch.as_deref(),
            context.entity,
        ) {
            TrackingComment::new(&*self.platform, entity)
                .announce_branch(comment_id, branch)
                .await;
        }

        let spec = render_task_spec(context, run_data.as_ref(), &plan, progress.comment_id);
        let prompt_path = write_task_spec(&self.paths.scratch_dir, &spec)?;

        let mut record = self.record_skeleton(true, progress.comment_id);
        record.base_branch = plan.base_branch.clone();
        record.current_branch = plan.current_branch.clone();
        record.claude_branch = plan.claude_branch.clone();
        record.save(&self.paths.handoff_file)?;

        tracing::info!(
            comment_id = ?progress.comment_id,
            base = plan.base_branch,
            branch = plan.current_branch,
            "prepare complete"
        );
        Ok(PrepareReport {
            triggered: true,
            decision,
            comment_id: progress.comment_id,
            plan: Some(plan),
            prompt_path: Some(prompt_path),
        })
    }

    /// Best-effort failure bookkeeping: the handoff record always gets the
    /// failure text; a comment that was already posted is finalized into
    /// its error state so it never stays pending.
    async fn record_prepare_failure(&self, progress: PrepareProgress, error: &HeraldError) {
        let mut record = self.record_skeleton(progress.triggered, progress.comment_id);
        record.prepare_error = Some(error.to_string());
        if let Err(save_error) = record.save(&self.paths.handoff_file) {
            tracing::warn!(error = %save_error, "failed to write prepare failure to handoff file");
        }

        let Some(comment_id) = progress.comment_id else {
            return;
        };
        let Some(entity) = self.context.entity else {
            return;
        };
        let tracker = TrackingComment::new(&*self.platform, entity);
        let update = FinalizeUpdate {
            outcome: RunOutcome::Error,
            error_message: Some(error.to_string()),
            kept_branch: None,
            base_branch: record.base_branch.clone(),
            footer: RunFooter {
                job_url: self.context.job_url.clone(),
                actor: non_empty(&self.context.actor_username),
                duration_ms: None,
                api_duration_ms: None,
                cost_usd: None,
            },
        };
        if let Err(update_error) = tracker.finalize(comment_id, &update).await {
            tracing::warn!(
                comment_id,
                error = %update_error,
                "could not move tracking comment to error state"
            );
        }
    }

    fn record_skeleton(&self, triggered: bool, comment_id: Option<u64>) -> HandoffRecord {
        let context = &self.context;
        HandoffRecord {
            schema_version: HANDOFF_SCHEMA_VERSION,
            provider: context.provider,
            triggered,
            comment_id,
            entity_kind: context.entity.map(|entity| entity.kind),
            entity_number: context.entity.map(|entity| entity.number).unwrap_or(0),
            base_branch: context.repository.default_branch.clone(),
            current_branch: context.ambient_branch.clone(),
            claude_branch: None,
            job_url: context.job_url.clone(),
            trigger_username: context.actor_username.clone(),
            started_unix_ms: now_unix_ms(),
            prepare_error: None,
            metrics: None,
        }
    }

    /// Runs the finalize stage from the recorded handoff.
    ///
    /// Branch cleanup and a vanished tracking comment degrade to warnings;
    /// any other comment-update failure propagates because a run that
    /// cannot report its outcome must not look successful.
    pub async fn finalize(&self, request: FinalizeRequest) -> Result<(), HeraldError> {
        let record = HandoffRecord::load(&self.paths.handoff_file)?;
        if record.provider != self.context.provider {
            tracing::warn!(
                recorded = ?record.provider,
                resolved = ?self.context.provider,
                "handoff record provider does not match the resolved context"
            );
        }
        if !record.triggered && record.prepare_error.is_none() {
            tracing::info!("run was not triggered; nothing to finalize");
            return Ok(());
        }

        let (outcome, error_message) = match &record.prepare_error {
            Some(prepare_error) => (RunOutcome::Error, Some(prepare_error.clone())),
            None if request.failed => (
                RunOutcome::Error,
                request
                    .error_message
                    .clone()
                    .or_else(|| Some("assistant run failed".to_string())),
            ),
            None => (RunOutcome::Success, None),
        };

        let mut kept_branch = None;
        if let Some(branch) = record.claude_branch.as_deref() {
            let cleanup = cleanup_if_empty(&*self.platform, branch, &record.base_branch).await;
            if !cleanup.should_delete {
                kept_branch = Some(branch.to_string());
            }
        }

        let metrics = request.metrics.or_else(|| record.metrics.clone());
        let footer = RunFooter {
            job_url: record.job_url.clone(),
            actor: non_empty(&record.trigger_username),
            duration_ms: metrics
                .as_ref()
                .map(|metrics| metrics.duration_ms)
                .filter(|ms| *ms > 0)
                .or_else(|| elapsed_since(record.started_unix_ms)),
            api_duration_ms: metrics.as_ref().and_then(|metrics| metrics.api_duration_ms),
            cost_usd: metrics.as_ref().and_then(|metrics| metrics.cost_usd),
        };

        match (record.comment_id, record.entity()) {
            (Some(comment_id), Some(entity)) => {
                let tracker = TrackingComment::new(&*self.platform, entity);
                let update = FinalizeUpdate {
                    outcome,
                    error_message,
                    kept_branch,
                    base_branch: record.base_branch.clone(),
                    footer,
                };
                match tracker.finalize(comment_id, &update).await {
                    Ok(()) => {}
                    Err(HeraldError::CommentMissing { comment_id }) => {
                        tracing::warn!(
                            comment_id,
                            "tracking comment disappeared before finalize; outcome not reported"
                        );
                    }
                    Err(error) => return Err(error),
                }
            }
            _ => {
                tracing::info!(
                    outcome = outcome_name(outcome),
                    error = error_message.as_deref().unwrap_or(""),
                    "no tracking comment recorded; finalize done"
                );
            }
        }
        Ok(())
    }

    /// Prepare, execute the assistant, and finalize in one process. The
    /// assistant's own failure is reflected into the tracking comment and
    /// the summary rather than propagated, so the pipeline still reaches
    /// its terminal state.
    pub async fn run(&self, runner: &dyn AssistantRunner) -> Result<RunSummary, HeraldError> {
        let report = self.prepare().await?;
        if !report.triggered {
            return Ok(RunSummary {
                triggered: false,
                outcome: None,
                error_message: None,
                metrics: None,
            });
        }
        let plan = report
            .plan
            .as_ref()
            .ok_or_else(|| HeraldError::Handoff("prepare produced no branch plan".to_string()))?;
        let prompt_path = report
            .prompt_path
            .as_deref()
            .ok_or_else(|| HeraldError::Handoff("prepare produced no task spec".to_string()))?;

        let result = runner
            .execute(RunnerRequest {
                prompt_path,
                working_branch: &plan.current_branch,
                comment_id: report.comment_id,
                allowed_tools: &self.context.options.allowed_tools,
            })
            .await;
        let (outcome, error_message, metrics) = match result {
            Ok(metrics) => (RunOutcome::Success, None, Some(metrics)),
            Err(error) => {
                tracing::warn!(error = %error, "assistant run failed");
                (RunOutcome::Error, Some(error.to_string()), None)
            }
        };

        self.finalize(FinalizeRequest {
            failed: outcome == RunOutcome::Error,
            error_message: error_message.clone(),
            metrics: metrics.clone(),
        })
        .await?;

        Ok(RunSummary {
            triggered: true,
            outcome: Some(outcome),
            error_message,
            metrics,
        })
    }
}

fn outcome_name(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Success => "success",
        RunOutcome::Error => "error",
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn now_unix_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn elapsed_since(started_unix_ms: u64) -> Option<u64> {
    if started_unix_ms == 0 {
        return None;
    }
    let now = now_unix_ms();
    (now > started_unix_ms).then(|| now - started_unix_ms)
}
