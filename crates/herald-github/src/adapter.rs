use async_trait::async_trait;
use herald_core::model::{
    Actor, BranchComparison, ChangeType, Comment, Commit, CommitAuthor, Entity, EntityKind,
    EntityState, FileChange, Issue, MergeRequest, Repository, Review, ReviewComment, RunData,
};
use herald_core::platform::{
    AccessLevel, ActorProfile, EntityHandle, EntityPreview, OptionalFetch, Platform, ProviderKind,
};
use herald_core::retry::{DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS};
use herald_core::HeraldError;

use crate::api::{
    GithubApiClient, GithubComment, GithubCommit, GithubFile, GithubReview, GithubReviewComment,
    GithubUser, RepoRef,
};

#[derive(Debug, Clone)]
pub struct GithubPlatformConfig {
    pub api_base: String,
    pub web_base: String,
    pub token: String,
    pub repository: Repository,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl GithubPlatformConfig {
    pub fn new(repository: Repository, token: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            web_base: "https://github.com".to_string(),
            token: token.into(),
            repository,
            request_timeout_ms: 30_000,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

pub struct GithubPlatform {
    client: GithubApiClient,
    repository: Repository,
    web_base: String,
}

impl GithubPlatform {
    pub fn new(config: GithubPlatformConfig) -> Result<Self, HeraldError> {
        let client = GithubApiClient::new(
            config.api_base,
            config.token,
            RepoRef {
                owner: config.repository.owner.clone(),
                name: config.repository.name.clone(),
            },
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;
        Ok(Self {
            client,
            repository: config.repository,
            web_base: config.web_base.trim_end_matches('/').to_string(),
        })
    }

    fn repo_web_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.web_base, self.repository.owner, self.repository.name
        )
    }

    async fn fetch_issue_data(&self, number: u64) -> Result<Entity, HeraldError> {
        let (issue_result, comments_result) = tokio::join!(
            self.client.fetch_issue(number),
            self.client.list_issue_comments(number),
        );
        let issue = issue_result?;
        let comments =
            OptionalFetch::from_result("list issue comments", comments_result).into_value();
        Ok(Entity::Issue(Issue {
            number: issue.number,
            title: issue.title,
            description: issue.body.unwrap_or_default(),
            author: actor_from_user(issue.user.as_ref()),
            created_at: issue.created_at,
            state: issue_state(&issue.state),
            comments: comments.into_iter().map(comment_from).collect(),
        }))
    }

    async fn fetch_merge_request_data(&self, number: u64) -> Result<Entity, HeraldError> {
        let (
            pull_result,
            commits_result,
            files_result,
            comments_result,
            reviews_result,
            review_comments_result,
        ) = tokio::join!(
            self.client.fetch_pull_request(number),
            self.client.list_pull_commits(number),
            self.client.list_pull_files(number),
            self.client.list_issue_comments(number),
            self.client.list_pull_reviews(number),
            self.client.list_review_comments(number),
        );
        let pull = pull_result?;
        let commits =
            OptionalFetch::from_result("list pull request commits", commits_result).into_value();
        let files =
            OptionalFetch::from_result("list pull request files", files_result).into_value();
        let comments =
            OptionalFetch::from_result("list pull request comments", comments_result).into_value();
        let reviews =
            OptionalFetch::from_result("list pull request reviews", reviews_result).into_value();
        let review_comments =
            OptionalFetch::from_result("list review comments", review_comments_result)
                .into_value();

        Ok(Entity::MergeRequest(MergeRequest {
            number: pull.number,
            title: pull.title,
            description: pull.body.unwrap_or_default(),
            author: actor_from_user(pull.user.as_ref()),
            source_branch: pull.head.branch,
            target_branch: pull.base.branch,
            head_sha: pull.head.sha,
            created_at: pull.created_at,
            additions: pull.additions,
            deletions: pull.deletions,
            state: pull_state(&pull.state, pull.merged_at.as_ref()),
            commits: commits.into_iter().map(commit_from).collect(),
            files: files.into_iter().map(file_from).collect(),
            comments: comments.into_iter().map(comment_from).collect(),
            reviews: reviews
                .into_iter()
                .map(|review| review_with_comments(review, &review_comments))
                .collect(),
        }))
    }
}

#[async_trait]
impl Platform for GithubPlatform {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Github
    }

    async fn fetch_run_data(&self, entity: EntityHandle) -> Result<RunData, HeraldError> {
        let entity = match entity.kind {
            EntityKind::Issue => self.fetch_issue_data(entity.number).await?,
            EntityKind::MergeRequest => self.fetch_merge_request_data(entity.number).await?,
        };
        Ok(RunData {
            repository: self.repository.clone(),
            entity,
        })
    }

    async fn entity_preview(&self, entity: EntityHandle) -> Result<EntityPreview, HeraldError> {
        match entity.kind {
            EntityKind::Issue => {
                let issue = self.client.fetch_issue(entity.number).await?;
                Ok(EntityPreview {
                    title: issue.title,
                    description: issue.body.unwrap_or_default(),
                    assignee: issue.assignee.map(|user| user.login),
                    assignees: issue.assignees.into_iter().map(|user| user.login).collect(),
                })
            }
            EntityKind::MergeRequest => {
                let pull = self.client.fetch_pull_request(entity.number).await?;
                Ok(EntityPreview {
                    title: pull.title,
                    description: pull.body.unwrap_or_default(),
                    assignee: pull.assignee.map(|user| user.login),
                    assignees: pull.assignees.into_iter().map(|user| user.login).collect(),
                })
            }
        }
    }

    async fn list_entity_comments(
        &self,
        entity: EntityHandle,
    ) -> Result<Vec<Comment>, HeraldError> {
        // Pull request conversation comments live on the issues endpoint.
        let comments = self.client.list_issue_comments(entity.number).await?;
        Ok(comments.into_iter().map(comment_from).collect())
    }

    async fn actor_access_level(
        &self,
        username: &str,
    ) -> Result<Option<AccessLevel>, HeraldError> {
        let permission = self.client.collaborator_permission(username).await?;
        Ok(permission.map(|permission| {
            let role = permission
                .role_name
                .unwrap_or(permission.permission);
            access_level_from_role(&role)
        }))
    }

    async fn actor_profile(&self, username: &str) -> Result<ActorProfile, HeraldError> {
        let user = self.client.fetch_user(username).await?;
        Ok(ActorProfile {
            username: if user.login.trim().is_empty() {
                username.to_string()
            } else {
                user.login
            },
            display_name: user.name.filter(|name| !name.trim().is_empty()),
            is_bot: Some(user.user_type.eq_ignore_ascii_case("bot")),
        })
    }

    async fn create_comment(&self, entity: EntityHandle, body: &str) -> Result<u64, HeraldError> {
        self.client.create_issue_comment(entity.number, body).await
    }

    async fn get_comment(
        &self,
        _entity: EntityHandle,
        comment_id: u64,
    ) -> Result<Comment, HeraldError> {
        match self.client.fetch_issue_comment(comment_id).await? {
            Some(comment) => Ok(comment_from(comment)),
            None => Err(HeraldError::CommentMissing { comment_id }),
        }
    }

    async fn update_comment(
        &self,
        _entity: EntityHandle,
        comment_id: u64,
        body: &str,
    ) -> Result<(), HeraldError> {
        self.client.update_issue_comment(comment_id, body).await
    }

    async fn default_branch(&self) -> Result<String, HeraldError> {
        let repo = self.client.fetch_repository().await?;
        if repo.default_branch.trim().is_empty() {
            Ok("main".to_string())
        } else {
            Ok(repo.default_branch)
        }
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, HeraldError> {
        Ok(self.client.branch_ref(name).await?.is_some())
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<(), HeraldError> {
        let base = self.client.branch_ref(from).await?.ok_or_else(|| {
            HeraldError::UpstreamApi {
                operation: "resolve base branch".to_string(),
                status: 404,
                message: format!("branch {from} not found"),
            }
        })?;
        self.client.create_branch_ref(name, &base.object.sha).await
    }

    async fn delete_branch(&self, name: &str) -> Result<(), HeraldError> {
        self.client.delete_branch_ref(name).await
    }

    async fn compare_branches(
        &self,
        base: &str,
        head: &str,
    ) -> Result<BranchComparison, HeraldError> {
        let comparison = self.client.compare(base, head).await?;
        Ok(BranchComparison {
            commits: comparison.commits.into_iter().map(commit_from).collect(),
            files: comparison.files.into_iter().map(file_from).collect(),
        })
    }

    fn branch_url(&self, name: &str) -> String {
        format!("{}/tree/{}", self.repo_web_url(), name)
    }

    fn new_change_request_url(&self, base: &str, head: &str) -> String {
        format!(
            "{}/compare/{base}...{head}?quick_pull=1",
            self.repo_web_url()
        )
    }
}

fn actor_from_user(user: Option<&GithubUser>) -> Actor {
    match user {
        Some(user) => Actor::from_parts(Some(user.login.clone()), user.name.clone()),
        None => Actor::unknown(),
    }
}

fn issue_state(state: &str) -> EntityState {
    if state.eq_ignore_ascii_case("closed") {
        EntityState::Closed
    } else {
        EntityState::Open
    }
}

fn pull_state(state: &str, merged_at: Option<&String>) -> EntityState {
    if merged_at.is_some() {
        EntityState::Merged
    } else if state.eq_ignore_ascii_case("closed") {
        EntityState::Closed
    } else {
        EntityState::Open
    }
}

fn comment_from(comment: GithubComment) -> Comment {
    Comment {
        id: comment.id,
        body: comment.body.unwrap_or_default(),
        author: actor_from_user(comment.user.as_ref()),
        created_at: comment.created_at,
    }
}

fn commit_from(commit: GithubCommit) -> Commit {
    let author = commit
        .commit
        .author
        .map(|identity| CommitAuthor::from_parts(identity.name, identity.email))
        .unwrap_or_else(CommitAuthor::unknown);
    Commit {
        sha: commit.sha,
        message: commit.commit.message,
        author,
    }
}

fn file_from(file: GithubFile) -> FileChange {
    FileChange {
        path: file.filename,
        additions: file.additions,
        deletions: file.deletions,
        change_type: change_type_from_status(&file.status),
    }
}

fn change_type_from_status(status: &str) -> ChangeType {
    match status.to_ascii_lowercase().as_str() {
        "added" => ChangeType::Added,
        "removed" => ChangeType::Removed,
        "renamed" => ChangeType::Renamed,
        _ => ChangeType::Modified,
    }
}

fn review_with_comments(review: GithubReview, all_comments: &[GithubReviewComment]) -> Review {
    let comments = all_comments
        .iter()
        .filter(|comment| comment.pull_request_review_id == Some(review.id))
        .map(|comment| ReviewComment {
            path: comment.path.clone(),
            line: comment.line.or(comment.original_line),
            body: comment.body.clone().unwrap_or_default(),
            author: actor_from_user(comment.user.as_ref()),
        })
        .collect();
    Review {
        id: review.id,
        author: actor_from_user(review.user.as_ref()),
        body: review.body.unwrap_or_default(),
        state: review.state,
        submitted_at: review.submitted_at.unwrap_or_default(),
        comments,
    }
}

/// Maps GitHub role names onto the shared ordinal scale. `role_name` is
/// preferred when present; the coarser `permission` field uses the same
/// vocabulary minus `maintain`/`triage`.
fn access_level_from_role(role: &str) -> AccessLevel {
    match role.to_ascii_lowercase().as_str() {
        "admin" => AccessLevel::OWNER,
        "maintain" => AccessLevel::MAINTAINER,
        "write" | "push" => AccessLevel::DEVELOPER,
        "triage" => AccessLevel::REPORTER,
        "read" | "pull" => AccessLevel::REPORTER,
        _ => AccessLevel::GUEST,
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use herald_core::model::{EntityState, Repository, UNKNOWN_DISPLAY_NAME, UNKNOWN_USERNAME};
    use herald_core::platform::{AccessLevel, EntityHandle, Platform};
    use herald_core::HeraldError;

    use super::{access_level_from_role, GithubPlatform, GithubPlatformConfig};

    fn test_platform(server: &MockServer) -> GithubPlatform {
        let mut config = GithubPlatformConfig::new(
            Repository {
                owner: "acme".to_string(),
                name: "widgets".to_string(),
                default_branch: "main".to_string(),
            },
            "test-token",
        );
        config.api_base = server.base_url();
        config.web_base = "https://github.example.test".to_string();
        config.retry_max_attempts = 1;
        config.retry_base_delay_ms = 1;
        GithubPlatform::new(config).expect("platform")
    }

    #[test]
    fn unit_role_mapping_covers_github_role_names() {
        assert_eq!(access_level_from_role("admin"), AccessLevel::OWNER);
        assert_eq!(access_level_from_role("maintain"), AccessLevel::MAINTAINER);
        assert_eq!(access_level_from_role("write"), AccessLevel::DEVELOPER);
        assert_eq!(access_level_from_role("triage"), AccessLevel::REPORTER);
        assert_eq!(access_level_from_role("read"), AccessLevel::REPORTER);
        assert_eq!(access_level_from_role("none"), AccessLevel::GUEST);
        assert_eq!(access_level_from_role("mystery"), AccessLevel::GUEST);
    }

    #[tokio::test]
    async fn functional_issue_run_data_normalizes_missing_author_to_unknown() {
        let server = MockServer::start();
        let _issue_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/issues/789");
            then.status(200).json_body(json!({
                "number": 789,
                "title": "Fix the widget",
                "body": null,
                "user": null,
                "created_at": "2026-02-01T10:00:00Z",
                "state": "open"
            }));
        });
        let _comments_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/issues/789/comments");
            then.status(200).json_body(json!([]));
        });

        let platform = test_platform(&server);
        let run_data = platform
            .fetch_run_data(EntityHandle::issue(789))
            .await
            .expect("run data");
        let issue = run_data.entity.as_issue().expect("issue entity");
        assert_eq!(issue.author.username, UNKNOWN_USERNAME);
        assert_eq!(issue.author.display_name, UNKNOWN_DISPLAY_NAME);
        assert_eq!(issue.description, "");
        assert_eq!(issue.state, EntityState::Open);
    }

    #[tokio::test]
    async fn functional_pull_request_run_data_degrades_optional_sections() {
        let server = MockServer::start();
        let _pull_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/55");
            then.status(200).json_body(json!({
                "number": 55,
                "title": "Refactor pipeline",
                "body": "cleanup",
                "user": { "login": "alice", "name": "Alice" },
                "created_at": "2026-02-02T09:00:00Z",
                "state": "open",
                "merged_at": null,
                "head": { "ref": "feature/pipeline", "sha": "abc123" },
                "base": { "ref": "main", "sha": "def456" },
                "additions": 120,
                "deletions": 30
            }));
        });
        for path in [
            "/repos/acme/widgets/pulls/55/commits",
            "/repos/acme/widgets/pulls/55/files",
            "/repos/acme/widgets/issues/55/comments",
            "/repos/acme/widgets/pulls/55/reviews",
            "/repos/acme/widgets/pulls/55/comments",
        ] {
            server.mock(|when, then| {
                when.method(GET).path(path);
                then.status(500).body("upstream exploded");
            });
        }

        let platform = test_platform(&server);
        let run_data = platform
            .fetch_run_data(EntityHandle::merge_request(55))
            .await
            .expect("run data");
        let merge_request = run_data.entity.as_merge_request().expect("merge request");
        assert_eq!(merge_request.source_branch, "feature/pipeline");
        assert_eq!(merge_request.target_branch, "main");
        assert_eq!(merge_request.additions, 120);
        assert_eq!(merge_request.deletions, 30);
        assert!(merge_request.commits.is_empty());
        assert!(merge_request.files.is_empty());
        assert!(merge_request.comments.is_empty());
        assert!(merge_request.reviews.is_empty());
    }

    #[tokio::test]
    async fn functional_merged_pull_request_maps_to_merged_state() {
        let server = MockServer::start();
        let _pull_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/56");
            then.status(200).json_body(json!({
                "number": 56,
                "title": "Done",
                "body": "",
                "user": { "login": "alice" },
                "created_at": "2026-02-02T09:00:00Z",
                "state": "closed",
                "merged_at": "2026-02-03T09:00:00Z",
                "head": { "ref": "feature/done", "sha": "abc123" },
                "base": { "ref": "main", "sha": "def456" }
            }));
        });
        for path in [
            "/repos/acme/widgets/pulls/56/commits",
            "/repos/acme/widgets/pulls/56/files",
            "/repos/acme/widgets/issues/56/comments",
            "/repos/acme/widgets/pulls/56/reviews",
            "/repos/acme/widgets/pulls/56/comments",
        ] {
            server.mock(|when, then| {
                when.method(GET).path(path);
                then.status(200).json_body(json!([]));
            });
        }

        let platform = test_platform(&server);
        let run_data = platform
            .fetch_run_data(EntityHandle::merge_request(56))
            .await
            .expect("run data");
        let merge_request = run_data.entity.as_merge_request().expect("merge request");
        assert_eq!(merge_request.state, EntityState::Merged);
    }

    #[tokio::test]
    async fn functional_review_comments_attach_to_their_review() {
        let server = MockServer::start();
        let _pull_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/57");
            then.status(200).json_body(json!({
                "number": 57,
                "title": "Review me",
                "body": "",
                "user": { "login": "alice" },
                "created_at": "2026-02-02T09:00:00Z",
                "state": "open",
                "head": { "ref": "feature/review", "sha": "abc123" },
                "base": { "ref": "main", "sha": "def456" }
            }));
        });
        for path in [
            "/repos/acme/widgets/pulls/57/commits",
            "/repos/acme/widgets/pulls/57/files",
            "/repos/acme/widgets/issues/57/comments",
        ] {
            server.mock(|when, then| {
                when.method(GET).path(path);
                then.status(200).json_body(json!([]));
            });
        }
        let _reviews_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/57/reviews");
            then.status(200).json_body(json!([
                {
                    "id": 900,
                    "user": { "login": "bob" },
                    "body": "needs work",
                    "state": "CHANGES_REQUESTED",
                    "submitted_at": "2026-02-02T10:00:00Z"
                }
            ]));
        });
        let _review_comments_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/57/comments");
            then.status(200).json_body(json!([
                {
                    "path": "src/lib.rs",
                    "line": 14,
                    "body": "rename this",
                    "user": { "login": "bob" },
                    "pull_request_review_id": 900
                },
                {
                    "path": "src/other.rs",
                    "line": 3,
                    "body": "stray comment",
                    "user": { "login": "carol" },
                    "pull_request_review_id": 901
                }
            ]));
        });

        let platform = test_platform(&server);
        let run_data = platform
            .fetch_run_data(EntityHandle::merge_request(57))
            .await
            .expect("run data");
        let merge_request = run_data.entity.as_merge_request().expect("merge request");
        assert_eq!(merge_request.reviews.len(), 1);
        let review = &merge_request.reviews[0];
        assert_eq!(review.comments.len(), 1);
        assert_eq!(review.comments[0].path, "src/lib.rs");
        assert_eq!(review.comments[0].line, Some(14));
    }

    #[tokio::test]
    async fn functional_access_level_prefers_role_name_over_permission() {
        let server = MockServer::start();
        let _permission_get = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/collaborators/bob/permission");
            then.status(200).json_body(json!({
                "permission": "write",
                "role_name": "maintain"
            }));
        });

        let platform = test_platform(&server);
        let level = platform
            .actor_access_level("bob")
            .await
            .expect("lookup")
            .expect("member");
        assert_eq!(level, AccessLevel::MAINTAINER);
    }

    #[tokio::test]
    async fn functional_get_comment_maps_missing_comment() {
        let server = MockServer::start();
        let _comment_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/issues/comments/4242");
            then.status(404).json_body(json!({ "message": "Not Found" }));
        });

        let platform = test_platform(&server);
        let error = platform
            .get_comment(EntityHandle::issue(7), 4242)
            .await
            .unwrap_err();
        match error {
            HeraldError::CommentMissing { comment_id } => assert_eq!(comment_id, 4242),
            other => panic!("expected comment-missing error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn functional_create_branch_resolves_base_sha_first() {
        let server = MockServer::start();
        let _base_ref_get = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/git/ref/heads/main");
            then.status(200).json_body(json!({
                "ref": "refs/heads/main",
                "object": { "sha": "def456" }
            }));
        });
        let ref_post = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/widgets/git/refs")
                .body_includes("refs/heads/claude-issue-789")
                .body_includes("def456");
            then.status(201).json_body(json!({
                "ref": "refs/heads/claude-issue-789",
                "object": { "sha": "def456" }
            }));
        });

        let platform = test_platform(&server);
        platform
            .create_branch("claude-issue-789", "main")
            .await
            .expect("create branch");
        ref_post.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_bot_profile_detection_uses_account_type() {
        let server = MockServer::start();
        let _user_get = server.mock(|when, then| {
            when.method(GET).path("/users/deploy-bot");
            then.status(200).json_body(json!({
                "login": "deploy-bot",
                "name": null,
                "type": "Bot"
            }));
        });

        let platform = test_platform(&server);
        let profile = platform.actor_profile("deploy-bot").await.expect("profile");
        assert_eq!(profile.is_bot, Some(true));
        assert_eq!(profile.username, "deploy-bot");
        assert_eq!(profile.display_name, None);
    }

    #[tokio::test]
    async fn functional_branch_urls_point_at_the_web_host() {
        let server = MockServer::start();
        let platform = test_platform(&server);
        assert_eq!(
            platform.branch_url("claude-issue-789"),
            "https://github.example.test/acme/widgets/tree/claude-issue-789"
        );
        assert_eq!(
            platform.new_change_request_url("main", "claude-issue-789"),
            "https://github.example.test/acme/widgets/compare/main...claude-issue-789?quick_pull=1"
        );
    }
}
