//! Run context resolution from ambient CI signals.
//!
//! Each provider publishes the facts of a run through environment
//! variables. This module reads them through an [`EnvSource`] snapshot so
//! resolution stays a pure function of its inputs, picks the credential by
//! the documented precedence, and hands back a [`RunContext`] plus the
//! [`Platform`] adapter the rest of the pipeline talks through.

use std::collections::HashMap;
use std::sync::Arc;

use herald_core::model::Repository;
use herald_core::platform::{EntityHandle, Platform, ProviderKind};
use herald_core::HeraldError;
use herald_github::{GithubPlatform, GithubPlatformConfig};
use herald_gitlab::{GitlabAuth, GitlabPlatform, GitlabPlatformConfig};

const FALLBACK_DEFAULT_BRANCH: &str = "main";

/// Snapshot of environment variables taken once at startup. Values are
/// trimmed on read and blank values count as unset, which is how CI
/// systems express "not applicable" for templated variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn require(&self, key: &str, describes: &str) -> Result<&str, HeraldError> {
        self.get(key).ok_or_else(|| {
            HeraldError::configuration(format!("missing required signal {key} ({describes})"))
        })
    }
}

/// Operator-supplied knobs that shape trigger evaluation and branch
/// selection. Collected by the CLI layer, carried here so the resolver
/// output is the complete input set for a run.
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    /// Phrase searched for in entity bodies and comments, e.g. `@claude`.
    pub trigger_phrase: Option<String>,
    /// Username whose assignment counts as a trigger.
    pub assignee_trigger: Option<String>,
    /// Base branch override for issue-derived working branches.
    pub base_branch: Option<String>,
    /// Explicit instructions that bypass trigger detection entirely.
    pub direct_prompt: Option<String>,
    /// Tool allowlist forwarded to the assistant runner.
    pub allowed_tools: Vec<String>,
}

/// Everything the pipeline knows about the run before talking to the
/// platform: where it is running, what it targets, and who asked.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub provider: ProviderKind,
    pub repository: Repository,
    /// Numeric project/repository id the platform assigned.
    pub project_id: u64,
    /// Target issue or merge request. `None` only for direct-prompt runs.
    pub entity: Option<EntityHandle>,
    /// Username that triggered the run, empty when no signal named one.
    pub actor_username: String,
    /// Branch the CI job checked out.
    pub ambient_branch: String,
    /// Link back to the CI job for the comment footer.
    pub job_url: Option<String>,
    pub api_base: String,
    pub web_base: String,
    pub options: TriggerOptions,
}

impl RunContext {
    /// Human label for the target entity, in the provider's terminology.
    pub fn entity_label(&self) -> &'static str {
        match self.entity.map(|entity| entity.kind) {
            Some(herald_core::model::EntityKind::MergeRequest) => {
                self.provider.change_request_noun()
            }
            _ => "issue",
        }
    }
}

/// Where the API credential came from. Ambient job credentials are scoped
/// to the project by the CI system itself, which is what justifies the
/// permission-gate fallback in [`crate::access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Dedicated bot token configured for this tool.
    Override,
    /// Credential the CI system injects into every job.
    Ambient,
    /// Personal or group access token.
    Personal,
    /// Project-scoped access token.
    ProjectScoped,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

impl Credential {
    pub fn is_ambient(&self) -> bool {
        self.source == CredentialSource::Ambient
    }
}

/// Picks the provider, preferring an explicit override and falling back
/// to the marker variables each CI system defines.
pub fn detect_provider(
    env: &EnvSource,
    explicit: Option<&str>,
) -> Result<ProviderKind, HeraldError> {
    if let Some(name) = explicit {
        return ProviderKind::parse(name).ok_or_else(|| {
            HeraldError::configuration(format!(
                "unknown provider {name:?}; expected \"github\" or \"gitlab\""
            ))
        });
    }
    if env.get("GITLAB_CI").is_some() {
        return Ok(ProviderKind::Gitlab);
    }
    if env.get("GITHUB_ACTIONS").is_some() {
        return Ok(ProviderKind::Github);
    }
    Err(HeraldError::configuration(
        "cannot detect platform: set HERALD_PROVIDER, or run under GitLab CI or GitHub Actions",
    ))
}

/// Resolves the API credential for `provider` by fixed precedence. The
/// dedicated bot token always wins; the ambient job credential outranks
/// personal and project tokens so unconfigured installations work out of
/// the box with the narrowest scope.
pub fn resolve_credential(
    provider: ProviderKind,
    env: &EnvSource,
) -> Result<Credential, HeraldError> {
    let ladder: [(&str, CredentialSource); 4] = match provider {
        ProviderKind::Gitlab => [
            ("CLAUDE_GITLAB_TOKEN", CredentialSource::Override),
            ("CI_JOB_TOKEN", CredentialSource::Ambient),
            ("GITLAB_TOKEN", CredentialSource::Personal),
            ("GITLAB_PROJECT_TOKEN", CredentialSource::ProjectScoped),
        ],
        ProviderKind::Github => [
            ("CLAUDE_GITHUB_TOKEN", CredentialSource::Override),
            ("GITHUB_TOKEN", CredentialSource::Ambient),
            ("GH_TOKEN", CredentialSource::Personal),
            ("GITHUB_PROJECT_TOKEN", CredentialSource::ProjectScoped),
        ],
    };
    for (name, source) in ladder {
        if let Some(token) = env.get(name) {
            tracing::debug!(credential = name, "resolved api credential");
            return Ok(Credential {
                token: token.to_string(),
                source,
            });
        }
    }
    let names: Vec<&str> = ladder.iter().map(|(name, _)| *name).collect();
    Err(HeraldError::configuration(format!(
        "no api credential found; set one of {}",
        names.join(", ")
    )))
}

/// Builds the [`RunContext`] for one run from the provider's ambient
/// signals. Fails with a configuration error naming the specific missing
/// or malformed signal.
pub fn resolve_context(
    provider: ProviderKind,
    env: &EnvSource,
    options: TriggerOptions,
) -> Result<RunContext, HeraldError> {
    match provider {
        ProviderKind::Gitlab => resolve_gitlab_context(env, options),
        ProviderKind::Github => resolve_github_context(env, options),
    }
}

fn resolve_gitlab_context(
    env: &EnvSource,
    options: TriggerOptions,
) -> Result<RunContext, HeraldError> {
    let project_path = env.require("CI_PROJECT_PATH", "gitlab project path")?;
    let repository = parse_project_path(project_path, "CI_PROJECT_PATH")?;
    let project_id = parse_positive(env.require("CI_PROJECT_ID", "numeric project id")?)
        .ok_or_else(|| bad_number("CI_PROJECT_ID", env.get("CI_PROJECT_ID")))?;
    let default_branch = env
        .get("CI_DEFAULT_BRANCH")
        .unwrap_or(FALLBACK_DEFAULT_BRANCH);
    let ambient_branch = env.require("CI_COMMIT_REF_NAME", "checked-out branch")?;

    let entity = resolve_entity(env, "CI_MERGE_REQUEST_IID", "ISSUE_IID")?;
    if entity.is_none() && options.direct_prompt.is_none() {
        return Err(HeraldError::configuration(
            "no target: set CI_MERGE_REQUEST_IID or ISSUE_IID, or supply a direct prompt",
        ));
    }

    let actor_username = first_present(
        env,
        &["GITLAB_USER_LOGIN", "CI_COMMIT_AUTHOR", "TRIGGER_USERNAME"],
    )
    .map(normalize_author_signal)
    .unwrap_or_default();

    let web_base = env
        .get("CI_SERVER_URL")
        .unwrap_or("https://gitlab.com")
        .trim_end_matches('/')
        .to_string();
    let api_base = env
        .get("CI_API_V4_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("{web_base}/api/v4"));

    Ok(RunContext {
        provider: ProviderKind::Gitlab,
        repository: Repository {
            owner: repository.0,
            name: repository.1,
            default_branch: default_branch.to_string(),
        },
        project_id,
        entity,
        actor_username,
        ambient_branch: ambient_branch.to_string(),
        job_url: env.get("CI_JOB_URL").map(str::to_string),
        api_base,
        web_base,
        options,
    })
}

fn resolve_github_context(
    env: &EnvSource,
    options: TriggerOptions,
) -> Result<RunContext, HeraldError> {
    let repo_path = env.require("GITHUB_REPOSITORY", "owner/name repository path")?;
    let repository = parse_project_path(repo_path, "GITHUB_REPOSITORY")?;
    let project_id = parse_positive(env.require("GITHUB_REPOSITORY_ID", "numeric repository id")?)
        .ok_or_else(|| bad_number("GITHUB_REPOSITORY_ID", env.get("GITHUB_REPOSITORY_ID")))?;
    let default_branch = env
        .get("DEFAULT_BRANCH")
        .unwrap_or(FALLBACK_DEFAULT_BRANCH);
    let ambient_branch = env.require("GITHUB_REF_NAME", "checked-out branch")?;

    let entity = resolve_entity(env, "PR_NUMBER", "ISSUE_NUMBER")?;
    if entity.is_none() && options.direct_prompt.is_none() {
        return Err(HeraldError::configuration(
            "no target: set PR_NUMBER or ISSUE_NUMBER, or supply a direct prompt",
        ));
    }

    let actor_username = first_present(
        env,
        &["GITHUB_ACTOR", "GITHUB_TRIGGERING_ACTOR", "TRIGGER_USERNAME"],
    )
    .map(str::to_string)
    .unwrap_or_default();

    let web_base = env
        .get("GITHUB_SERVER_URL")
        .unwrap_or("https://github.com")
        .trim_end_matches('/')
        .to_string();
    let api_base = env
        .get("GITHUB_API_URL")
        .unwrap_or("https://api.github.com")
        .trim_end_matches('/')
        .to_string();
    let job_url = env
        .get("GITHUB_RUN_ID")
        .map(|run_id| format!("{web_base}/{repo_path}/actions/runs/{run_id}"));

    Ok(RunContext {
        provider: ProviderKind::Github,
        repository: Repository {
            owner: repository.0,
            name: repository.1,
            default_branch: default_branch.to_string(),
        },
        project_id,
        entity,
        actor_username,
        ambient_branch: ambient_branch.to_string(),
        job_url,
        api_base,
        web_base,
        options,
    })
}

/// Constructs the platform adapter matching the resolved context. The
/// ambient GitLab job credential authenticates with a different header
/// than access tokens, so the credential source picks the auth mode.
pub fn build_platform(
    context: &RunContext,
    credential: &Credential,
) -> Result<Arc<dyn Platform>, HeraldError> {
    match context.provider {
        ProviderKind::Github => {
            let mut config =
                GithubPlatformConfig::new(context.repository.clone(), credential.token.clone());
            config.api_base = context.api_base.clone();
            config.web_base = context.web_base.clone();
            Ok(Arc::new(GithubPlatform::new(config)?))
        }
        ProviderKind::Gitlab => {
            let auth = if credential.is_ambient() {
                GitlabAuth::JobToken(credential.token.clone())
            } else {
                GitlabAuth::PrivateToken(credential.token.clone())
            };
            let mut config =
                GitlabPlatformConfig::new(context.repository.clone(), context.project_id, auth);
            config.api_base = context.api_base.clone();
            config.web_base = context.web_base.clone();
            Ok(Arc::new(GitlabPlatform::new(config)?))
        }
    }
}

/// Splits a project path on the last separator so nested GitLab groups
/// stay intact in the owner part.
fn parse_project_path(path: &str, signal: &str) -> Result<(String, String), HeraldError> {
    match path.rsplit_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(HeraldError::configuration(format!(
            "{signal} must look like owner/name, got {path:?}"
        ))),
    }
}

/// Reads the entity number, letting a merge-request signal win over an
/// issue signal when a pipeline carries both.
fn resolve_entity(
    env: &EnvSource,
    mr_signal: &str,
    issue_signal: &str,
) -> Result<Option<EntityHandle>, HeraldError> {
    let mr_number = env
        .get(mr_signal)
        .map(|raw| parse_positive(raw).ok_or_else(|| bad_number(mr_signal, Some(raw))))
        .transpose()?;
    let issue_number = env
        .get(issue_signal)
        .map(|raw| parse_positive(raw).ok_or_else(|| bad_number(issue_signal, Some(raw))))
        .transpose()?;

    match (mr_number, issue_number) {
        (Some(mr), Some(issue)) => {
            tracing::warn!(
                merge_request = mr,
                issue = issue,
                "both {mr_signal} and {issue_signal} are set; using the merge request"
            );
            Ok(Some(EntityHandle::merge_request(mr)))
        }
        (Some(mr), None) => Ok(Some(EntityHandle::merge_request(mr))),
        (None, Some(issue)) => Ok(Some(EntityHandle::issue(issue))),
        (None, None) => Ok(None),
    }
}

fn first_present<'a>(env: &'a EnvSource, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| env.get(key))
}

/// `CI_COMMIT_AUTHOR` arrives as `Name <email>`; the name part is the
/// closest thing to a username that signal carries.
fn normalize_author_signal(raw: &str) -> String {
    match raw.split_once('<') {
        Some((name, _)) => name.trim().to_string(),
        None => raw.trim().to_string(),
    }
}

fn parse_positive(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|value| *value > 0)
}

fn bad_number(signal: &str, raw: Option<&str>) -> HeraldError {
    HeraldError::configuration(format!(
        "{signal} must be a positive integer, got {:?}",
        raw.unwrap_or_default()
    ))
}
