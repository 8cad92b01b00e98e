//! Assistant runner: executes the coding assistant CLI against the task
//! spec and reports timings and cost back for the comment footer.
//!
//! The runner is a trait so orchestration tests can substitute a scripted
//! implementation; production uses [`ClaudeCliRunner`], which shells out
//! to the `claude` CLI in non-interactive JSON mode.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use herald_core::handoff::RunMetrics;
use herald_core::retry::truncate_for_error;
use herald_core::HeraldError;

const FAILURE_SUMMARY_MAX_CHARS: usize = 240;

/// Everything one assistant invocation needs from the prepared run.
#[derive(Debug, Clone, Copy)]
pub struct RunnerRequest<'a> {
    pub prompt_path: &'a Path,
    /// Branch the assistant must commit to.
    pub working_branch: &'a str,
    /// Tracking comment the assistant may post progress into.
    pub comment_id: Option<u64>,
    pub allowed_tools: &'a [String],
}

#[async_trait]
pub trait AssistantRunner: Send + Sync {
    async fn execute(&self, request: RunnerRequest<'_>) -> Result<RunMetrics, HeraldError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeCliRunnerConfig {
    pub executable: String,
    pub extra_args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for ClaudeCliRunnerConfig {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            extra_args: Vec::new(),
            timeout_ms: 1_800_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeCliRunner {
    config: ClaudeCliRunnerConfig,
}

impl ClaudeCliRunner {
    pub fn new(config: ClaudeCliRunnerConfig) -> Result<Self, HeraldError> {
        if config.executable.trim().is_empty() {
            return Err(HeraldError::Runner(
                "assistant executable is empty".to_string(),
            ));
        }
        if config.timeout_ms == 0 {
            return Err(HeraldError::Runner(
                "assistant timeout must be greater than 0ms".to_string(),
            ));
        }
        Ok(Self { config })
    }
}

/// Result envelope the CLI prints in `--output-format json` mode.
#[derive(Debug, Deserialize)]
struct CliResultEnvelope {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default)]
    duration_api_ms: Option<u64>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
}

#[async_trait]
impl AssistantRunner for ClaudeCliRunner {
    async fn execute(&self, request: RunnerRequest<'_>) -> Result<RunMetrics, HeraldError> {
        let prompt = std::fs::read_to_string(request.prompt_path).map_err(|error| {
            HeraldError::Runner(format!(
                "failed to read task spec {}: {error}",
                request.prompt_path.display()
            ))
        })?;

        let mut command = Command::new(&self.config.executable);
        command.kill_on_drop(true);
        command.arg("-p");
        command.arg(prompt);
        command.arg("--output-format");
        command.arg("json");
        if !request.allowed_tools.is_empty() {
            command.arg("--allowedTools");
            command.arg(request.allowed_tools.join(","));
        }
        command.args(&self.config.extra_args);
        command.env("HERALD_WORKING_BRANCH", request.working_branch);
        if let Some(comment_id) = request.comment_id {
            command.env("HERALD_COMMENT_ID", comment_id.to_string());
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let started = Instant::now();
        let child = spawn_with_text_file_busy_retry(&mut command, &self.config.executable).await?;
        let output = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            HeraldError::Runner(format!(
                "assistant timed out after {}ms",
                self.config.timeout_ms
            ))
        })?
        .map_err(|error| HeraldError::Runner(format!("assistant process failed: {error}")))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let summary = summarize_process_failure(&stderr, &stdout);
            return Err(HeraldError::Runner(format!(
                "assistant exited with status {status}: {summary}"
            )));
        }

        parse_result_envelope(&stdout, elapsed_ms)
    }
}

/// Interprets the CLI stdout. Non-JSON output is treated as a successful
/// plain-text run with only the measured wall time for metrics, matching
/// older CLI builds that print bare text.
fn parse_result_envelope(stdout: &str, elapsed_ms: u64) -> Result<RunMetrics, HeraldError> {
    let trimmed = stdout.trim();
    let Ok(envelope) = serde_json::from_str::<CliResultEnvelope>(trimmed) else {
        tracing::debug!("assistant stdout was not a json envelope; using measured duration");
        return Ok(RunMetrics {
            duration_ms: elapsed_ms,
            api_duration_ms: None,
            cost_usd: None,
        });
    };
    if envelope.is_error {
        let message = envelope
            .result
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or("assistant reported an error with no message");
        return Err(HeraldError::Runner(truncate_for_error(
            message,
            FAILURE_SUMMARY_MAX_CHARS,
        )));
    }
    Ok(RunMetrics {
        duration_ms: envelope.duration_ms.unwrap_or(elapsed_ms),
        api_duration_ms: envelope.duration_api_ms,
        cost_usd: envelope.total_cost_usd,
    })
}

async fn spawn_with_text_file_busy_retry(
    command: &mut Command,
    executable: &str,
) -> Result<tokio::process::Child, HeraldError> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    for attempt in 0..=MAX_TEXT_FILE_BUSY_RETRIES {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error) => {
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES
                {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    continue;
                }
                return Err(HeraldError::Runner(format!(
                    "failed to spawn assistant '{executable}': {error}"
                )));
            }
        }
    }
    Err(HeraldError::Runner(format!(
        "failed to spawn assistant '{executable}': unknown error"
    )))
}

fn summarize_process_failure(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return truncate_for_error(stderr, FAILURE_SUMMARY_MAX_CHARS);
    }
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return truncate_for_error(stdout, FAILURE_SUMMARY_MAX_CHARS);
    }
    "no error output".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use tempfile::tempdir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let script = dir.join("mock-claude.sh");
        let content = format!("#!/bin/sh\nset -eu\n{body}\n");
        std::fs::write(&script, content).expect("write script");
        let mut perms = std::fs::metadata(&script)
            .expect("script metadata")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod script");
        script
    }

    fn write_prompt(dir: &Path) -> PathBuf {
        let path = dir.join("task-spec.md");
        std::fs::write(&path, "# Coding task\nfix the cache\n").expect("write prompt");
        path
    }

    fn request<'a>(prompt_path: &'a Path, tools: &'a [String]) -> RunnerRequest<'a> {
        RunnerRequest {
            prompt_path,
            working_branch: "claude-issue-789",
            comment_id: Some(42),
            allowed_tools: tools,
        }
    }

    #[test]
    fn unit_runner_config_rejects_blank_executable_and_zero_timeout() {
        let blank = ClaudeCliRunner::new(ClaudeCliRunnerConfig {
            executable: "  ".to_string(),
            ..ClaudeCliRunnerConfig::default()
        });
        assert!(blank.is_err());

        let zero = ClaudeCliRunner::new(ClaudeCliRunnerConfig {
            timeout_ms: 0,
            ..ClaudeCliRunnerConfig::default()
        });
        assert!(zero.is_err());
    }

    #[test]
    fn unit_result_envelope_parses_metrics() {
        let stdout = r#"{"type":"result","is_error":false,"result":"done","duration_ms":30500,"duration_api_ms":2100,"total_cost_usd":0.0142}"#;
        let metrics = parse_result_envelope(stdout, 99).unwrap();
        assert_eq!(metrics.duration_ms, 30_500);
        assert_eq!(metrics.api_duration_ms, Some(2_100));
        assert_eq!(metrics.cost_usd, Some(0.0142));
    }

    #[test]
    fn unit_result_envelope_surfaces_error_payload() {
        let stdout = r#"{"type":"result","is_error":true,"result":"credit exhausted"}"#;
        let error = parse_result_envelope(stdout, 99).unwrap_err();
        assert!(error.to_string().contains("credit exhausted"));
    }

    #[test]
    fn unit_plain_stdout_falls_back_to_measured_duration() {
        let metrics = parse_result_envelope("all done", 1_234).unwrap();
        assert_eq!(metrics.duration_ms, 1_234);
        assert_eq!(metrics.cost_usd, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn integration_runner_passes_prompt_tools_and_env_to_cli() {
        let dir = tempdir().expect("tempdir");
        let prompt_path = write_prompt(dir.path());
        let script = write_script(
            dir.path(),
            r#"
if [ "$1" != "-p" ]; then
  echo "expected -p argument" >&2
  exit 11
fi
case "$2" in
  *"fix the cache"*) ;;
  *) echo "prompt text missing" >&2; exit 12;;
esac
shift 2
fmt=""
tools=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output-format) shift; fmt="$1";;
    --allowedTools) shift; tools="$1";;
  esac
  shift
done
if [ "$fmt" != "json" ]; then
  echo "expected json output format" >&2
  exit 13
fi
if [ "$tools" != "Edit,Bash" ]; then
  echo "expected tool allowlist" >&2
  exit 14
fi
if [ "$HERALD_WORKING_BRANCH" != "claude-issue-789" ]; then
  echo "expected working branch env" >&2
  exit 15
fi
if [ "$HERALD_COMMENT_ID" != "42" ]; then
  echo "expected comment id env" >&2
  exit 16
fi
printf '{"type":"result","is_error":false,"result":"patched","duration_ms":30500,"duration_api_ms":2100,"total_cost_usd":0.0142}'
"#,
        );
        let runner = ClaudeCliRunner::new(ClaudeCliRunnerConfig {
            executable: script.display().to_string(),
            extra_args: vec![],
            timeout_ms: 30_000,
        })
        .expect("build runner");

        let tools = vec!["Edit".to_string(), "Bash".to_string()];
        let metrics = runner
            .execute(request(&prompt_path, &tools))
            .await
            .expect("run");
        assert_eq!(metrics.duration_ms, 30_500);
        assert_eq!(metrics.cost_usd, Some(0.0142));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regression_runner_reports_non_zero_exit_with_stderr() {
        let dir = tempdir().expect("tempdir");
        let prompt_path = write_prompt(dir.path());
        let script = write_script(
            dir.path(),
            r#"
echo "claude auth failed" >&2
exit 42
"#,
        );
        let runner = ClaudeCliRunner::new(ClaudeCliRunnerConfig {
            executable: script.display().to_string(),
            extra_args: vec![],
            timeout_ms: 30_000,
        })
        .expect("build runner");

        let error = runner
            .execute(request(&prompt_path, &[]))
            .await
            .expect_err("expected failure");
        assert!(error.to_string().contains("status 42"));
        assert!(error.to_string().contains("claude auth failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regression_runner_times_out_on_hung_cli() {
        let dir = tempdir().expect("tempdir");
        let prompt_path = write_prompt(dir.path());
        let script = write_script(dir.path(), "sleep 5");
        let runner = ClaudeCliRunner::new(ClaudeCliRunnerConfig {
            executable: script.display().to_string(),
            extra_args: vec![],
            timeout_ms: 200,
        })
        .expect("build runner");

        let error = runner
            .execute(request(&prompt_path, &[]))
            .await
            .expect_err("expected timeout");
        assert!(error.to_string().contains("timed out after 200ms"));
    }

    #[tokio::test]
    async fn regression_runner_fails_cleanly_on_missing_prompt_file() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("absent.md");
        let runner = ClaudeCliRunner::new(ClaudeCliRunnerConfig::default()).expect("build runner");
        let error = runner
            .execute(request(&missing, &[]))
            .await
            .expect_err("expected failure");
        assert!(error.to_string().contains("absent.md"));
    }
}
