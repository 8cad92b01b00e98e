use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use herald_core::RunMetrics;
use herald_pipeline::{ClaudeCliRunnerConfig, FinalizeRequest, PipelinePaths, TriggerOptions};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "herald",
    about = "CI-invoked pipeline that hands issue and merge request work to the Claude coding assistant",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "HERALD_PROVIDER",
        help = "Platform override: github or gitlab. Detected from CI marker variables when unset."
    )]
    pub provider: Option<String>,

    #[arg(
        long,
        env = "TRIGGER_PHRASE",
        default_value = "@claude",
        help = "Phrase that triggers a run when found in the entity body or a comment. Pass an empty string to disable phrase matching."
    )]
    pub trigger_phrase: String,

    #[arg(
        long,
        env = "ASSIGNEE_TRIGGER",
        help = "Username whose assignment to the entity triggers a run. Checked only when phrase matching is disabled."
    )]
    pub assignee_trigger: Option<String>,

    #[arg(
        long,
        env = "BASE_BRANCH",
        help = "Base branch for issue working branches. Defaults to the repository default branch."
    )]
    pub base_branch: Option<String>,

    #[arg(
        long,
        env = "DIRECT_PROMPT",
        help = "Explicit instructions for the assistant; bypasses trigger detection entirely."
    )]
    pub direct_prompt: Option<String>,

    #[arg(
        long,
        env = "CLAUDE_ALLOWED_TOOLS",
        value_delimiter = ',',
        help = "Comma-separated tool allowlist forwarded to the assistant."
    )]
    pub allowed_tools: Vec<String>,

    #[arg(
        long,
        env = "HERALD_HANDOFF_FILE",
        default_value = ".herald/handoff.json",
        help = "Path of the JSON record the prepare stage writes and the finalize stage reads."
    )]
    pub handoff_file: PathBuf,

    #[arg(
        long,
        env = "HERALD_SCRATCH_DIR",
        default_value = ".herald",
        help = "Directory for run-scoped files such as the rendered task spec."
    )]
    pub scratch_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve context, run the permission and trigger gates, create the
    /// tracking comment and working branch, and write the task spec plus
    /// handoff record.
    Prepare,
    /// Report the assistant run's outcome: clean up an empty working
    /// branch and move the tracking comment to its final state.
    Finalize(FinalizeArgs),
    /// Prepare, execute the assistant, and finalize in one process.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct FinalizeArgs {
    #[arg(
        long,
        env = "HERALD_RUN_FAILED",
        help = "Mark the assistant run as failed."
    )]
    pub failed: bool,

    #[arg(
        long,
        env = "HERALD_ERROR_MESSAGE",
        help = "Failure text for the tracking comment's error block."
    )]
    pub error_message: Option<String>,

    #[arg(
        long,
        help = "Wall-clock duration of the assistant run in milliseconds."
    )]
    pub duration_ms: Option<u64>,

    #[arg(long, help = "API time of the assistant run in milliseconds.")]
    pub api_duration_ms: Option<u64>,

    #[arg(long, help = "Cost of the assistant run in USD.")]
    pub cost_usd: Option<f64>,
}

impl FinalizeArgs {
    /// Collapses the flags into the finalize input. Metrics are reported
    /// only when a duration was given; the remaining metric flags refine
    /// it.
    pub fn to_request(&self) -> FinalizeRequest {
        let metrics = self.duration_ms.map(|duration_ms| RunMetrics {
            duration_ms,
            api_duration_ms: self.api_duration_ms,
            cost_usd: self.cost_usd,
        });
        FinalizeRequest {
            failed: self.failed,
            error_message: self.error_message.clone(),
            metrics,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(
        long,
        env = "CLAUDE_EXECUTABLE",
        default_value = "claude",
        help = "Assistant executable to invoke."
    )]
    pub claude_executable: String,

    #[arg(
        long,
        env = "CLAUDE_TIMEOUT_MS",
        default_value_t = 1_800_000,
        value_parser = parse_positive_u64,
        help = "Assistant run timeout in milliseconds."
    )]
    pub timeout_ms: u64,

    #[arg(
        long = "claude-arg",
        allow_hyphen_values = true,
        help = "Extra argument appended to the assistant invocation; repeatable."
    )]
    pub claude_args: Vec<String>,
}

impl RunArgs {
    pub fn runner_config(&self) -> ClaudeCliRunnerConfig {
        ClaudeCliRunnerConfig {
            executable: self.claude_executable.clone(),
            extra_args: self.claude_args.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

impl Cli {
    /// Trigger knobs as the pipeline consumes them: blank strings mean
    /// "unset", so an operator can disable the default phrase by passing
    /// an empty value.
    pub fn trigger_options(&self) -> TriggerOptions {
        TriggerOptions {
            trigger_phrase: non_empty(&self.trigger_phrase),
            assignee_trigger: self.assignee_trigger.as_deref().and_then(non_empty),
            base_branch: self.base_branch.as_deref().and_then(non_empty),
            direct_prompt: self
                .direct_prompt
                .clone()
                .filter(|prompt| !prompt.trim().is_empty()),
            allowed_tools: self
                .allowed_tools
                .iter()
                .map(|tool| tool.trim().to_string())
                .filter(|tool| !tool.is_empty())
                .collect(),
        }
    }

    pub fn paths(&self) -> PipelinePaths {
        PipelinePaths {
            handoff_file: self.handoff_file.clone(),
            scratch_dir: self.scratch_dir.clone(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
