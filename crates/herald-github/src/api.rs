use std::time::Duration;

use herald_core::retry::{
    is_retryable_transport_error, parse_retry_after_ms, retry_delay, should_retry_status,
    truncate_for_error,
};
use herald_core::HeraldError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub(crate) struct RepoRef {
    pub(crate) owner: String,
    pub(crate) name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubUser {
    #[serde(default)]
    pub(crate) login: String,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(rename = "type", default)]
    pub(crate) user_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubIssue {
    pub(crate) number: u64,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) body: Option<String>,
    #[serde(default)]
    pub(crate) user: Option<GithubUser>,
    #[serde(default)]
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) assignee: Option<GithubUser>,
    #[serde(default)]
    pub(crate) assignees: Vec<GithubUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubBranchTip {
    #[serde(rename = "ref", default)]
    pub(crate) branch: String,
    #[serde(default)]
    pub(crate) sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubPullRequest {
    pub(crate) number: u64,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) body: Option<String>,
    #[serde(default)]
    pub(crate) user: Option<GithubUser>,
    #[serde(default)]
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) merged_at: Option<String>,
    pub(crate) head: GithubBranchTip,
    pub(crate) base: GithubBranchTip,
    #[serde(default)]
    pub(crate) additions: u64,
    #[serde(default)]
    pub(crate) deletions: u64,
    #[serde(default)]
    pub(crate) assignee: Option<GithubUser>,
    #[serde(default)]
    pub(crate) assignees: Vec<GithubUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubComment {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) body: Option<String>,
    #[serde(default)]
    pub(crate) user: Option<GithubUser>,
    #[serde(default)]
    pub(crate) created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubCommitIdentity {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubCommitDetail {
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) author: Option<GithubCommitIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubCommit {
    #[serde(default)]
    pub(crate) sha: String,
    pub(crate) commit: GithubCommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubFile {
    #[serde(default)]
    pub(crate) filename: String,
    #[serde(default)]
    pub(crate) additions: u64,
    #[serde(default)]
    pub(crate) deletions: u64,
    #[serde(default)]
    pub(crate) status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubReview {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) user: Option<GithubUser>,
    #[serde(default)]
    pub(crate) body: Option<String>,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) submitted_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubReviewComment {
    #[serde(default)]
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) line: Option<u64>,
    #[serde(default)]
    pub(crate) original_line: Option<u64>,
    #[serde(default)]
    pub(crate) body: Option<String>,
    #[serde(default)]
    pub(crate) user: Option<GithubUser>,
    #[serde(default)]
    pub(crate) pull_request_review_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubPermission {
    #[serde(default)]
    pub(crate) permission: String,
    #[serde(default)]
    pub(crate) role_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubRepo {
    #[serde(default)]
    pub(crate) default_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubRefObject {
    #[serde(default)]
    pub(crate) sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubBranchRef {
    pub(crate) object: GithubRefObject,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GithubComparison {
    #[serde(default)]
    pub(crate) commits: Vec<GithubCommit>,
    #[serde(default)]
    pub(crate) files: Vec<GithubFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubCommentCreateResponse {
    id: u64,
}

/// Collapses a 404 into `None`; every other error propagates.
fn missing_to_none<T>(result: Result<T, HeraldError>) -> Result<Option<T>, HeraldError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.status() == Some(404) => Ok(None),
        Err(error) => Err(error),
    }
}

#[derive(Clone)]
pub(crate) struct GithubApiClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubApiClient {
    pub(crate) fn new(
        api_base: String,
        token: String,
        repo: RepoRef,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self, HeraldError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("herald-bot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .map_err(|_| HeraldError::configuration("invalid github authorization header"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                HeraldError::configuration(format!("failed to create github api client: {error}"))
            })?;
        Ok(Self {
            http: client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.repo.owner, self.repo.name, tail
        )
    }

    pub(crate) async fn fetch_repository(&self) -> Result<GithubRepo, HeraldError> {
        let url = format!(
            "{}/repos/{}/{}",
            self.api_base, self.repo.owner, self.repo.name
        );
        self.request_json("fetch repository", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn fetch_issue(&self, number: u64) -> Result<GithubIssue, HeraldError> {
        let url = self.repo_url(&format!("issues/{number}"));
        self.request_json("fetch issue", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn fetch_pull_request(
        &self,
        number: u64,
    ) -> Result<GithubPullRequest, HeraldError> {
        let url = self.repo_url(&format!("pulls/{number}"));
        self.request_json("fetch pull request", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn list_issue_comments(
        &self,
        number: u64,
    ) -> Result<Vec<GithubComment>, HeraldError> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        self.paginate("list issue comments", &url, &[("sort", "created"), ("direction", "asc")])
            .await
    }

    pub(crate) async fn list_pull_commits(
        &self,
        number: u64,
    ) -> Result<Vec<GithubCommit>, HeraldError> {
        let url = self.repo_url(&format!("pulls/{number}/commits"));
        self.paginate("list pull request commits", &url, &[]).await
    }

    pub(crate) async fn list_pull_files(
        &self,
        number: u64,
    ) -> Result<Vec<GithubFile>, HeraldError> {
        let url = self.repo_url(&format!("pulls/{number}/files"));
        self.paginate("list pull request files", &url, &[]).await
    }

    pub(crate) async fn list_pull_reviews(
        &self,
        number: u64,
    ) -> Result<Vec<GithubReview>, HeraldError> {
        let url = self.repo_url(&format!("pulls/{number}/reviews"));
        self.paginate("list pull request reviews", &url, &[]).await
    }

    pub(crate) async fn list_review_comments(
        &self,
        number: u64,
    ) -> Result<Vec<GithubReviewComment>, HeraldError> {
        let url = self.repo_url(&format!("pulls/{number}/comments"));
        self.paginate("list review comments", &url, &[]).await
    }

    pub(crate) async fn collaborator_permission(
        &self,
        username: &str,
    ) -> Result<Option<GithubPermission>, HeraldError> {
        let url = self.repo_url(&format!("collaborators/{username}/permission"));
        missing_to_none(
            self.request_json("fetch collaborator permission", || self.http.get(url.clone()))
                .await,
        )
    }

    pub(crate) async fn fetch_user(&self, username: &str) -> Result<GithubUser, HeraldError> {
        let url = format!("{}/users/{username}", self.api_base);
        self.request_json("fetch user profile", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn create_issue_comment(
        &self,
        number: u64,
        body: &str,
    ) -> Result<u64, HeraldError> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        let payload = json!({ "body": body });
        let created: GithubCommentCreateResponse = self
            .request_json("create comment", || {
                self.http.post(url.clone()).json(&payload)
            })
            .await?;
        Ok(created.id)
    }

    pub(crate) async fn fetch_issue_comment(
        &self,
        comment_id: u64,
    ) -> Result<Option<GithubComment>, HeraldError> {
        let url = self.repo_url(&format!("issues/comments/{comment_id}"));
        missing_to_none(
            self.request_json("fetch comment", || self.http.get(url.clone()))
                .await,
        )
    }

    pub(crate) async fn update_issue_comment(
        &self,
        comment_id: u64,
        body: &str,
    ) -> Result<(), HeraldError> {
        let url = self.repo_url(&format!("issues/comments/{comment_id}"));
        let payload = json!({ "body": body });
        self.request_unit("update comment", || {
            self.http.patch(url.clone()).json(&payload)
        })
        .await
    }

    pub(crate) async fn branch_ref(
        &self,
        branch: &str,
    ) -> Result<Option<GithubBranchRef>, HeraldError> {
        let url = self.repo_url(&format!("git/ref/heads/{branch}"));
        missing_to_none(
            self.request_json("fetch branch ref", || self.http.get(url.clone()))
                .await,
        )
    }

    pub(crate) async fn create_branch_ref(
        &self,
        branch: &str,
        sha: &str,
    ) -> Result<(), HeraldError> {
        let url = self.repo_url("git/refs");
        let payload = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        self.request_unit("create branch", || {
            self.http.post(url.clone()).json(&payload)
        })
        .await
    }

    pub(crate) async fn delete_branch_ref(&self, branch: &str) -> Result<(), HeraldError> {
        let url = self.repo_url(&format!("git/refs/heads/{branch}"));
        let result = self
            .request_unit("delete branch", || self.http.delete(url.clone()))
            .await;
        // A ref that is already gone counts as deleted.
        missing_to_none(result).map(|_| ())
    }

    pub(crate) async fn compare(
        &self,
        base: &str,
        head: &str,
    ) -> Result<GithubComparison, HeraldError> {
        let url = self.repo_url(&format!("compare/{base}...{head}"));
        self.request_json("compare branches", || self.http.get(url.clone()))
            .await
    }

    async fn paginate<T>(
        &self,
        operation: &str,
        url: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<Vec<T>, HeraldError>
    where
        T: DeserializeOwned,
    {
        let per_page = PAGE_SIZE.to_string();
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: Vec<T> = self
                .request_json(operation, || {
                    self.http.get(url.to_string()).query(extra_query).query(&[
                        ("per_page", per_page.as_str()),
                        ("page", page_value.as_str()),
                    ])
                })
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T, HeraldError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.execute(operation, request_builder).await?;
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|error| {
            HeraldError::UpstreamApi {
                operation: operation.to_string(),
                status,
                message: format!("failed to decode response body: {error}"),
            }
        })
    }

    async fn request_unit<F>(&self, operation: &str, request_builder: F) -> Result<(), HeraldError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        self.execute(operation, request_builder).await.map(|_| ())
    }

    async fn execute<F>(
        &self,
        operation: &str,
        mut request_builder: F,
    ) -> Result<reqwest::Response, HeraldError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header("x-herald-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && should_retry_status(status.as_u16()) {
                        tracing::warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retryable upstream status; backing off"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    if status.as_u16() == 401 {
                        return Err(HeraldError::Authentication {
                            status: status.as_u16(),
                            message: truncate_for_error(&body, 800),
                        });
                    }
                    return Err(HeraldError::UpstreamApi {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        message: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tracing::warn!(operation, error = %error, attempt, "transport error; retrying");
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(HeraldError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}
