use async_trait::async_trait;
use herald_core::diff::{count_diff_lines, sum_file_changes};
use herald_core::model::{
    Actor, BranchComparison, ChangeType, Comment, Commit, CommitAuthor, Entity, EntityKind,
    EntityState, FileChange, Issue, MergeRequest, Repository, RunData,
};
use herald_core::platform::{
    AccessLevel, ActorProfile, EntityHandle, EntityPreview, OptionalFetch, Platform, ProviderKind,
};
use herald_core::retry::{DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS};
use herald_core::HeraldError;

use crate::api::{GitlabApiClient, GitlabAuth, GitlabCommit, GitlabDiff, GitlabNote, GitlabUser};

#[derive(Debug, Clone)]
pub struct GitlabPlatformConfig {
    pub api_base: String,
    pub web_base: String,
    pub auth: GitlabAuth,
    pub project_id: u64,
    pub repository: Repository,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl GitlabPlatformConfig {
    pub fn new(repository: Repository, project_id: u64, auth: GitlabAuth) -> Self {
        Self {
            api_base: "https://gitlab.com/api/v4".to_string(),
            web_base: "https://gitlab.com".to_string(),
            auth,
            project_id,
            repository,
            request_timeout_ms: 30_000,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

pub struct GitlabPlatform {
    client: GitlabApiClient,
    repository: Repository,
    web_base: String,
}

impl GitlabPlatform {
    pub fn new(config: GitlabPlatformConfig) -> Result<Self, HeraldError> {
        let client = GitlabApiClient::new(
            config.api_base,
            config.auth,
            config.project_id,
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

    fn project_web_url(&self) -> String {
        format!("{}/{}", self.web_base, self.repository.slug())
    }

    async fn fetch_issue_data(&self, iid: u64) -> Result<Entity, HeraldError> {
        let (issue_result, notes_result) = tokio::join!(
            self.client.fetch_issue(iid),
            self.client.list_issue_notes(iid),
        );
        let issue = issue_result?;
        let notes = OptionalFetch::from_result("list issue notes", notes_result).into_value();
        Ok(Entity::Issue(Issue {
            number: issue.iid,
            title: issue.title,
            description: issue.description.unwrap_or_default(),
            author: actor_from_user(issue.author.as_ref()),
            created_at: issue.created_at,
            state: issue_state(&issue.state),
            comments: human_comments(notes),
        }))
    }

    async fn fetch_merge_request_data(&self, iid: u64) -> Result<Entity, HeraldError> {
        let (merge_request_result, commits_result, diffs_result, notes_result) = tokio::join!(
            self.client.fetch_merge_request(iid),
            self.client.list_merge_request_commits(iid),
            self.client.list_merge_request_diffs(iid),
            self.client.list_merge_request_notes(iid),
        );
        let merge_request = merge_request_result?;
        let commits =
            OptionalFetch::from_result("list merge request commits", commits_result).into_value();
        let diffs =
            OptionalFetch::from_result("list merge request diffs", diffs_result).into_value();
        let notes =
            OptionalFetch::from_result("list merge request notes", notes_result).into_value();

        let files: Vec<FileChange> = diffs.iter().map(file_from_diff).collect();
        let (additions, deletions) = sum_file_changes(&files);
        Ok(Entity::MergeRequest(MergeRequest {
            number: merge_request.iid,
            title: merge_request.title,
            description: merge_request.description.unwrap_or_default(),
            author: actor_from_user(merge_request.author.as_ref()),
            source_branch: merge_request.source_branch,
            target_branch: merge_request.target_branch,
            head_sha: merge_request.sha,
            created_at: merge_request.created_at,
            additions,
            deletions,
            state: merge_request_state(&merge_request.state),
            commits: commits.into_iter().map(commit_from).collect(),
            files,
            comments: human_comments(notes),
            // GitLab surfaces no review objects through this API; an empty
            // list is the valid value, not a degradation.
            reviews: Vec::new(),
        }))
    }
}

#[async_trait]
impl Platform for GitlabPlatform {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gitlab
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
                    description: issue.description.unwrap_or_default(),
                    assignee: issue.assignee.map(|user| user.username),
                    assignees: issue
                        .assignees
                        .into_iter()
                        .map(|user| user.username)
                        .collect(),
                })
            }
            EntityKind::MergeRequest => {
                let merge_request = self.client.fetch_merge_request(entity.number).await?;
                Ok(EntityPreview {
                    title: merge_request.title,
                    description: merge_request.description.unwrap_or_default(),
                    assignee: merge_request.assignee.map(|user| user.username),
                    assignees: merge_request
                        .assignees
                        .into_iter()
                        .map(|user| user.username)
                        .collect(),
                })
            }
        }
    }

    async fn list_entity_comments(
        &self,
        entity: EntityHandle,
    ) -> Result<Vec<Comment>, HeraldError> {
        let notes = match entity.kind {
            EntityKind::Issue => self.client.list_issue_notes(entity.number).await?,
            EntityKind::MergeRequest => {
                self.client.list_merge_request_notes(entity.number).await?
            }
        };
        Ok(human_comments(notes))
    }

    async fn actor_access_level(
        &self,
        username: &str,
    ) -> Result<Option<AccessLevel>, HeraldError> {
        let Some(user) = self.client.find_user(username).await? else {
            return Ok(None);
        };
        let member = self.client.project_member(user.id).await?;
        Ok(member.map(|member| AccessLevel(member.access_level)))
    }

    async fn actor_profile(&self, username: &str) -> Result<ActorProfile, HeraldError> {
        let user = self.client.find_user(username).await?.ok_or_else(|| {
            HeraldError::UpstreamApi {
                operation: "fetch user profile".to_string(),
                status: 404,
                message: format!("user {username} not found"),
            }
        })?;
        Ok(ActorProfile {
            username: if user.username.trim().is_empty() {
                username.to_string()
            } else {
                user.username
            },
            display_name: user.name.filter(|name| !name.trim().is_empty()),
            is_bot: user.bot,
        })
    }

    async fn create_comment(&self, entity: EntityHandle, body: &str) -> Result<u64, HeraldError> {
        self.client
            .create_note(note_noun(entity.kind), entity.number, body)
            .await
    }

    async fn get_comment(
        &self,
        entity: EntityHandle,
        comment_id: u64,
    ) -> Result<Comment, HeraldError> {
        let note = self
            .client
            .fetch_note(note_noun(entity.kind), entity.number, comment_id)
            .await?;
        match note {
            Some(note) => Ok(note_to_comment(note)),
            None => Err(HeraldError::CommentMissing { comment_id }),
        }
    }

    async fn update_comment(
        &self,
        entity: EntityHandle,
        comment_id: u64,
        body: &str,
    ) -> Result<(), HeraldError> {
        self.client
            .update_note(note_noun(entity.kind), entity.number, comment_id, body)
            .await
    }

    async fn default_branch(&self) -> Result<String, HeraldError> {
        let project = self.client.fetch_project().await?;
        Ok(project
            .default_branch
            .filter(|branch| !branch.trim().is_empty())
            .unwrap_or_else(|| "main".to_string()))
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, HeraldError> {
        Ok(self.client.fetch_branch(name).await?.is_some())
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<(), HeraldError> {
        self.client.create_branch(name, from).await
    }

    async fn delete_branch(&self, name: &str) -> Result<(), HeraldError> {
        self.client.delete_branch(name).await
    }

    async fn compare_branches(
        &self,
        base: &str,
        head: &str,
    ) -> Result<BranchComparison, HeraldError> {
        let comparison = self.client.compare(base, head).await?;
        Ok(BranchComparison {
            commits: comparison.commits.into_iter().map(commit_from).collect(),
            files: comparison.diffs.iter().map(file_from_diff).collect(),
        })
    }

    fn branch_url(&self, name: &str) -> String {
        format!("{}/-/tree/{}", self.project_web_url(), name)
    }

    fn new_change_request_url(&self, base: &str, head: &str) -> String {
        format!(
            "{}/-/merge_requests/new?merge_request%5Bsource_branch%5D={head}&merge_request%5Btarget_branch%5D={base}",
            self.project_web_url()
        )
    }
}

fn actor_from_user(user: Option<&GitlabUser>) -> Actor {
    match user {
        Some(user) => Actor::from_parts(Some(user.username.clone()), user.name.clone()),
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

fn merge_request_state(state: &str) -> EntityState {
    if state.eq_ignore_ascii_case("merged") {
        EntityState::Merged
    } else if state.eq_ignore_ascii_case("closed") {
        EntityState::Closed
    } else {
        EntityState::Open
    }
}

/// System notes (state changes, branch pushes) are platform chatter, not
/// discussion; only human notes become canonical comments.
fn human_comments(notes: Vec<GitlabNote>) -> Vec<Comment> {
    notes
        .into_iter()
        .filter(|note| !note.system)
        .map(note_to_comment)
        .collect()
}

fn note_to_comment(note: GitlabNote) -> Comment {
    Comment {
        id: note.id,
        body: note.body,
        author: actor_from_user(note.author.as_ref()),
        created_at: note.created_at,
    }
}

fn commit_from(commit: GitlabCommit) -> Commit {
    Commit {
        sha: commit.id,
        message: commit.message,
        author: CommitAuthor::from_parts(commit.author_name, commit.author_email),
    }
}

fn file_from_diff(diff: &GitlabDiff) -> FileChange {
    let (additions, deletions) = count_diff_lines(&diff.diff);
    let path = if diff.new_path.is_empty() {
        diff.old_path.clone()
    } else {
        diff.new_path.clone()
    };
    FileChange {
        path,
        additions,
        deletions,
        change_type: change_type_from_flags(diff),
    }
}

fn change_type_from_flags(diff: &GitlabDiff) -> ChangeType {
    if diff.new_file {
        ChangeType::Added
    } else if diff.deleted_file {
        ChangeType::Removed
    } else if diff.renamed_file {
        ChangeType::Renamed
    } else {
        ChangeType::Modified
    }
}

fn note_noun(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Issue => "issues",
        EntityKind::MergeRequest => "merge_requests",
    }
}
