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

/// Which authentication header the client sends. CI job tokens use a
/// different header than personal or project tokens.
#[derive(Debug, Clone)]
pub enum GitlabAuth {
    PrivateToken(String),
    JobToken(String),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabUser {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) username: String,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) bot: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabProject {
    #[serde(default)]
    pub(crate) default_branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabIssue {
    pub(crate) iid: u64,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) author: Option<GitlabUser>,
    #[serde(default)]
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) assignee: Option<GitlabUser>,
    #[serde(default)]
    pub(crate) assignees: Vec<GitlabUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabMergeRequest {
    pub(crate) iid: u64,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) author: Option<GitlabUser>,
    #[serde(default)]
    pub(crate) source_branch: String,
    #[serde(default)]
    pub(crate) target_branch: String,
    #[serde(default)]
    pub(crate) sha: String,
    #[serde(default)]
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) assignee: Option<GitlabUser>,
    #[serde(default)]
    pub(crate) assignees: Vec<GitlabUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabNote {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) body: String,
    #[serde(default)]
    pub(crate) author: Option<GitlabUser>,
    #[serde(default)]
    pub(crate) created_at: String,
    #[serde(default)]
    pub(crate) system: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabMember {
    #[serde(default)]
    pub(crate) access_level: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabCommit {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) author_name: Option<String>,
    #[serde(default)]
    pub(crate) author_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabDiff {
    #[serde(default)]
    pub(crate) old_path: String,
    #[serde(default)]
    pub(crate) new_path: String,
    #[serde(default)]
    pub(crate) diff: String,
    #[serde(default)]
    pub(crate) new_file: bool,
    #[serde(default)]
    pub(crate) renamed_file: bool,
    #[serde(default)]
    pub(crate) deleted_file: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabBranch {
    #[serde(default)]
    pub(crate) name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GitlabComparison {
    #[serde(default)]
    pub(crate) commits: Vec<GitlabCommit>,
    #[serde(default)]
    pub(crate) diffs: Vec<GitlabDiff>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitlabNoteCreateResponse {
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
pub(crate) struct GitlabApiClient {
    http: reqwest::Client,
    api_base: String,
    project_id: u64,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GitlabApiClient {
    pub(crate) fn new(
        api_base: String,
        auth: GitlabAuth,
        project_id: u64,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self, HeraldError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("herald-bot"),
        );
        let (header_name, token) = match &auth {
            GitlabAuth::PrivateToken(token) => ("PRIVATE-TOKEN", token),
            GitlabAuth::JobToken(token) => ("JOB-TOKEN", token),
        };
        headers.insert(
            header_name,
            reqwest::header::HeaderValue::from_str(token.trim())
                .map_err(|_| HeraldError::configuration("invalid gitlab token header"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                HeraldError::configuration(format!("failed to create gitlab api client: {error}"))
            })?;
        Ok(Self {
            http: client,
            api_base: api_base.trim_end_matches('/').to_string(),
            project_id,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    fn project_url(&self, tail: &str) -> String {
        format!("{}/projects/{}/{}", self.api_base, self.project_id, tail)
    }

    pub(crate) async fn fetch_project(&self) -> Result<GitlabProject, HeraldError> {
        let url = format!("{}/projects/{}", self.api_base, self.project_id);
        self.request_json("fetch project", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn fetch_issue(&self, iid: u64) -> Result<GitlabIssue, HeraldError> {
        let url = self.project_url(&format!("issues/{iid}"));
        self.request_json("fetch issue", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn fetch_merge_request(
        &self,
        iid: u64,
    ) -> Result<GitlabMergeRequest, HeraldError> {
        let url = self.project_url(&format!("merge_requests/{iid}"));
        self.request_json("fetch merge request", || self.http.get(url.clone()))
            .await
    }

    pub(crate) async fn list_issue_notes(&self, iid: u64) -> Result<Vec<GitlabNote>, HeraldError> {
        let url = self.project_url(&format!("issues/{iid}/notes"));
        self.paginate("list issue notes", &url).await
    }

    pub(crate) async fn list_merge_request_notes(
        &self,
        iid: u64,
    ) -> Result<Vec<GitlabNote>, HeraldError> {
        let url = self.project_url(&format!("merge_requests/{iid}/notes"));
        self.paginate("list merge request notes", &url).await
    }

    pub(crate) async fn list_merge_request_commits(
        &self,
        iid: u64,
    ) -> Result<Vec<GitlabCommit>, HeraldError> {
        let url = self.project_url(&format!("merge_requests/{iid}/commits"));
        self.paginate("list merge request commits", &url).await
    }

    pub(crate) async fn list_merge_request_diffs(
        &self,
        iid: u64,
    ) -> Result<Vec<GitlabDiff>, HeraldError> {
        let url = self.project_url(&format!("merge_requests/{iid}/diffs"));
        self.paginate("list merge request diffs", &url).await
    }

    pub(crate) async fn find_user(&self, username: &str) -> Result<Option<GitlabUser>, HeraldError> {
        let url = format!("{}/users", self.api_base);
        let username_value = username.to_string();
        let users: Vec<GitlabUser> = self
            .request_json("find user", || {
                self.http
                    .get(url.clone())
                    .query(&[("username", username_value.as_str())])
            })
            .await?;
        Ok(users.into_iter().next())
    }

    pub(crate) async fn project_member(
        &self,
        user_id: u64,
    ) -> Result<Option<GitlabMember>, HeraldError> {
        let url = self.project_url(&format!("members/all/{user_id}"));
        missing_to_none(
            self.request_json("fetch project member", || self.http.get(url.clone()))
                .await,
        )
    }

    pub(crate) async fn create_note(
        &self,
        noun: &str,
        iid: u64,
        body: &str,
    ) -> Result<u64, HeraldError> {
        let url = self.project_url(&format!("{noun}/{iid}/notes"));
        let payload = json!({ "body": body });
        let created: GitlabNoteCreateResponse = self
            .request_json("create note", || self.http.post(url.clone()).json(&payload))
            .await?;
        Ok(created.id)
    }

    pub(crate) async fn fetch_note(
        &self,
        noun: &str,
        iid: u64,
        note_id: u64,
    ) -> Result<Option<GitlabNote>, HeraldError> {
        let url = self.project_url(&format!("{noun}/{iid}/notes/{note_id}"));
        missing_to_none(
            self.request_json("fetch note", || self.http.get(url.clone()))
                .await,
        )
    }

    pub(crate) async fn update_note(
        &self,
        noun: &str,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<(), HeraldError> {
        let url = self.project_url(&format!("{noun}/{iid}/notes/{note_id}"));
        let payload = json!({ "body": body });
        self.request_unit("update note", || self.http.put(url.clone()).json(&payload))
            .await
    }

    pub(crate) async fn fetch_branch(
        &self,
        branch: &str,
    ) -> Result<Option<GitlabBranch>, HeraldError> {
        let url = self.project_url(&format!("repository/branches/{branch}"));
        missing_to_none(
            self.request_json("fetch branch", || self.http.get(url.clone()))
                .await,
        )
    }

    pub(crate) async fn create_branch(&self, branch: &str, from: &str) -> Result<(), HeraldError> {
        let url = self.project_url("repository/branches");
        let branch_value = branch.to_string();
        let ref_value = from.to_string();
        self.request_unit("create branch", || {
            self.http.post(url.clone()).query(&[
                ("branch", branch_value.as_str()),
                ("ref", ref_value.as_str()),
            ])
        })
        .await
    }

    pub(crate) async fn delete_branch(&self, branch: &str) -> Result<(), HeraldError> {
        let url = self.project_url(&format!("repository/branches/{branch}"));
        let result = self
            .request_unit("delete branch", || self.http.delete(url.clone()))
            .await;
        // A branch that is already gone counts as deleted.
        missing_to_none(result).map(|_| ())
    }

    pub(crate) async fn compare(
        &self,
        from: &str,
        to: &str,
    ) -> Result<GitlabComparison, HeraldError> {
        let url = self.project_url("repository/compare");
        let from_value = from.to_string();
        let to_value = to.to_string();
        self.request_json("compare branches", || {
            self.http
                .get(url.clone())
                .query(&[("from", from_value.as_str()), ("to", to_value.as_str())])
        })
        .await
    }

    async fn paginate<T>(&self, operation: &str, url: &str) -> Result<Vec<T>, HeraldError>
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
                    self.http.get(url.to_string()).query(&[
                        ("sort", "asc"),
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
