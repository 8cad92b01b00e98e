//! Whole-workspace delegation flow: the pipeline crate driving the GitHub
//! adapter over a mocked API while a stand-in assistant CLI is really
//! spawned as a subprocess. Everything between the CI entrypoint and the
//! two external systems (platform API, assistant executable) runs for real.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

use herald_core::comment::{branch_note_line, CommentDocument};
use herald_core::model::Repository;
use herald_core::platform::{EntityHandle, ProviderKind};
use herald_core::{HandoffRecord, RunOutcome};
use herald_github::{GithubPlatform, GithubPlatformConfig};
use herald_pipeline::{
    ClaudeCliRunner, ClaudeCliRunnerConfig, Pipeline, PipelinePaths, RunContext, TriggerOptions,
};

fn repository() -> Repository {
    Repository {
        owner: "acme".to_string(),
        name: "widgets".to_string(),
        default_branch: "main".to_string(),
    }
}

fn platform(server: &MockServer) -> Arc<GithubPlatform> {
    let mut config = GithubPlatformConfig::new(repository(), "test-token");
    config.api_base = server.base_url();
    config.web_base = "https://github.example.test".to_string();
    config.retry_max_attempts = 1;
    config.retry_base_delay_ms = 1;
    Arc::new(GithubPlatform::new(config).expect("platform"))
}

fn context(server: &MockServer) -> RunContext {
    RunContext {
        provider: ProviderKind::Github,
        repository: repository(),
        project_id: 1234,
        entity: Some(EntityHandle::issue(789)),
        actor_username: "alice".to_string(),
        ambient_branch: "main".to_string(),
        job_url: Some("https://ci.example.test/jobs/11".to_string()),
        api_base: server.base_url(),
        web_base: "https://github.example.test".to_string(),
        options: TriggerOptions {
            trigger_phrase: Some("@claude".to_string()),
            ..TriggerOptions::default()
        },
    }
}

fn paths(dir: &TempDir) -> PipelinePaths {
    PipelinePaths {
        handoff_file: dir.path().join("handoff.json"),
        scratch_dir: dir.path().join("scratch"),
    }
}

fn write_assistant_script(dir: &Path, body: &str) -> PathBuf {
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

fn runner_for(script: &Path) -> ClaudeCliRunner {
    ClaudeCliRunner::new(ClaudeCliRunnerConfig {
        executable: script.display().to_string(),
        extra_args: Vec::new(),
        timeout_ms: 30_000,
    })
    .expect("runner")
}

/// Body the comment GET serves; the mock is stateless, so each test
/// scripts the state finalize should find the comment in.
fn pending_body() -> String {
    CommentDocument::pending("issue").render()
}

fn announced_body() -> String {
    let mut document = CommentDocument::pending("issue");
    document.set_branch_note(branch_note_line(
        "claude-issue-789",
        Some("https://github.example.test/acme/widgets/tree/claude-issue-789"),
    ));
    document.render()
}

/// Registers every endpoint the prepare stage touches for issue #789.
/// Call counts on these are pinned elsewhere; the tests here assert on
/// the finalize-stage mocks they register themselves.
fn mock_prepare_endpoints(server: &MockServer, comment_body: String) {
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/collaborators/alice/permission");
        then.status(200)
            .json_body(json!({ "permission": "write", "role_name": "write" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/users/alice");
        then.status(200)
            .json_body(json!({ "login": "alice", "name": "Alice", "type": "User" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/issues/789");
        then.status(200).json_body(json!({
            "number": 789,
            "title": "Widget cache never expires",
            "body": "Stale entries pile up. @claude please take a look.",
            "user": { "login": "alice", "type": "User" },
            "created_at": "2026-03-01T09:00:00Z",
            "state": "open",
            "assignees": []
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues/789/comments");
        then.status(200).json_body(json!([]));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/issues/789/comments")
            .body_includes("Claude is working on this");
        then.status(201).json_body(json!({ "id": 4242 }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/git/ref/heads/claude-issue-789");
        then.status(404).json_body(json!({ "message": "Not Found" }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/git/ref/heads/main");
        then.status(200)
            .json_body(json!({ "object": { "sha": "abc1234def" } }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/git/refs")
            .body_includes("refs/heads/claude-issue-789");
        then.status(201).json_body(json!({
            "ref": "refs/heads/claude-issue-789",
            "object": { "sha": "abc1234def" }
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues/comments/4242");
        then.status(200).json_body(json!({
            "id": 4242,
            "body": comment_body,
            "user": { "login": "herald-bot", "type": "Bot" },
            "created_at": "2026-03-01T10:00:00Z"
        }));
    });
    server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/comments/4242")
            .body_includes("Claude is working on this")
            .body_includes("Working branch");
        then.status(200).json_body(json!({ "id": 4242 }));
    });
}

#[tokio::test]
async fn integration_issue_run_with_live_cli_lands_metrics_in_the_comment() {
    let server = MockServer::start();
    mock_prepare_endpoints(&server, pending_body());
    let compare_get = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/compare/main...claude-issue-789");
        then.status(200).json_body(json!({
            "commits": [{
                "sha": "fedcba9876543210",
                "commit": {
                    "message": "Add cache TTL",
                    "author": { "name": "Claude", "email": "claude@example.test" }
                }
            }],
            "files": [{
                "filename": "src/cache.rs",
                "status": "modified",
                "additions": 5,
                "deletions": 1
            }]
        }));
    });
    let final_patch = server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/comments/4242")
            .body_includes("Claude finished this run")
            .body_includes("View branch")
            .body_includes("duration `30.5s`")
            .body_includes("api `2.1s`")
            .body_includes("cost `$0.0142`");
        then.status(200).json_body(json!({ "id": 4242 }));
    });

    let dir = TempDir::new().expect("tempdir");
    let script = write_assistant_script(
        dir.path(),
        r#"
case "${2-}" in
  *"Widget cache never expires"*) ;;
  *) echo "task brief missing issue title" >&2; exit 21;;
esac
if [ "${HERALD_WORKING_BRANCH-}" != "claude-issue-789" ]; then
  echo "unexpected working branch" >&2
  exit 22
fi
if [ "${HERALD_COMMENT_ID-}" != "4242" ]; then
  echo "unexpected comment id" >&2
  exit 23
fi
printf '{"type":"result","is_error":false,"result":"patched","duration_ms":30500,"duration_api_ms":2100,"total_cost_usd":0.0142}'
"#,
    );
    let pipeline = Pipeline::new(platform(&server), context(&server), false, paths(&dir));

    let summary = pipeline.run(&runner_for(&script)).await.expect("run");
    assert!(summary.triggered);
    assert_eq!(summary.outcome, Some(RunOutcome::Success));
    let metrics = summary.metrics.expect("metrics");
    assert_eq!(metrics.duration_ms, 30_500);
    assert_eq!(metrics.cost_usd, Some(0.0142));

    compare_get.assert_calls(1);
    final_patch.assert_calls(1);

    let record = HandoffRecord::load(&dir.path().join("handoff.json")).expect("record");
    assert_eq!(record.provider, ProviderKind::Github);
    assert_eq!(record.entity(), Some(EntityHandle::issue(789)));
    assert_eq!(record.claude_branch.as_deref(), Some("claude-issue-789"));
}

#[tokio::test]
async fn regression_failing_cli_reaches_the_error_state_and_drops_the_empty_branch() {
    let server = MockServer::start();
    // The comment GET serves the announced state: finalize must strip the
    // branch note once cleanup deletes the empty branch.
    mock_prepare_endpoints(&server, announced_body());
    let compare_get = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/compare/main...claude-issue-789");
        then.status(200)
            .json_body(json!({ "commits": [], "files": [] }));
    });
    let branch_delete = server.mock(|when, then| {
        when.method(DELETE)
            .path("/repos/acme/widgets/git/refs/heads/claude-issue-789");
        then.status(204);
    });
    let final_patch = server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/comments/4242")
            .body_includes("Claude run failed")
            .body_includes("model quota exhausted")
            .body_excludes("Working branch");
        then.status(200).json_body(json!({ "id": 4242 }));
    });

    let dir = TempDir::new().expect("tempdir");
    let script = write_assistant_script(
        dir.path(),
        r#"
echo "model quota exhausted" >&2
exit 7
"#,
    );
    let pipeline = Pipeline::new(platform(&server), context(&server), false, paths(&dir));

    let summary = pipeline
        .run(&runner_for(&script))
        .await
        .expect("a failed assistant still finalizes");
    assert!(summary.triggered);
    assert_eq!(summary.outcome, Some(RunOutcome::Error));
    let message = summary.error_message.expect("error message");
    assert!(message.contains("status 7"));
    assert!(message.contains("model quota exhausted"));
    assert!(summary.metrics.is_none());

    compare_get.assert_calls(1);
    branch_delete.assert_calls(1);
    final_patch.assert_calls(1);
}
