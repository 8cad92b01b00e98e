//! Capability interface both platform adapters implement.
//!
//! The pipeline only ever talks to `dyn Platform`; the adapter crates
//! translate these calls into their REST APIs and normalize the results
//! into the canonical model. Exactly two implementations exist, both
//! selected by the pipeline's provider factory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HeraldError;
use crate::model::{BranchComparison, Comment, EntityKind, RunData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Tag naming which upstream platform a run talks to.
pub enum ProviderKind {
    Github,
    Gitlab,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "github" => Some(Self::Github),
            "gitlab" => Some(Self::Gitlab),
            _ => None,
        }
    }

    /// The platform's own name for a change request; used verbatim in
    /// user-facing comment text.
    pub fn change_request_noun(self) -> &'static str {
        match self {
            Self::Github => "pull request",
            Self::Gitlab => "merge request",
        }
    }
}

/// Role ordinal on the shared scale both adapters map onto. The scale is
/// GitLab's native access levels; the GitHub adapter maps its role names
/// onto the same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessLevel(pub u8);

impl AccessLevel {
    pub const GUEST: Self = Self(10);
    pub const REPORTER: Self = Self(20);
    pub const DEVELOPER: Self = Self(30);
    pub const MAINTAINER: Self = Self(40);
    pub const OWNER: Self = Self(50);

    /// True at or above the standard contributor role.
    pub fn can_write(self) -> bool {
        self >= Self::DEVELOPER
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorProfile {
    pub username: String,
    pub display_name: Option<String>,
    /// `None` when the platform does not expose a bot flag for this user.
    pub is_bot: Option<bool>,
}

/// Identity of the issue or merge request a run operates on. This is the
/// lightweight handle stages pass around; the full normalized entity only
/// exists after the data fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityHandle {
    pub kind: EntityKind,
    pub number: u64,
}

impl EntityHandle {
    pub fn issue(number: u64) -> Self {
        Self {
            kind: EntityKind::Issue,
            number,
        }
    }

    pub fn merge_request(number: u64) -> Self {
        Self {
            kind: EntityKind::MergeRequest,
            number,
        }
    }
}

/// Just enough of an entity for trigger evaluation: title, body, and
/// assignee identity, fetched without the full normalization pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityPreview {
    pub title: String,
    pub description: String,
    /// The single assignee field merge requests carry.
    pub assignee: Option<String>,
    /// The assignee list issues carry.
    pub assignees: Vec<String>,
}

/// Tri-state outcome for an optional sub-fetch: either real data, or a
/// documented default recorded together with why it degraded. Required
/// fetches never pass through this type; their failures stay `Err`.
#[derive(Debug, Clone)]
pub enum OptionalFetch<T> {
    Fetched(T),
    Degraded { reason: String },
}

impl<T: Default> OptionalFetch<T> {
    /// Collapses a sub-fetch result, logging the degradation once.
    pub fn from_result(operation: &str, result: Result<T, HeraldError>) -> Self {
        match result {
            Ok(value) => Self::Fetched(value),
            Err(error) => {
                tracing::warn!(operation, error = %error, "optional fetch degraded to default");
                Self::Degraded {
                    reason: error.to_string(),
                }
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Fetched(value) => value,
            Self::Degraded { .. } => T::default(),
        }
    }
}

#[async_trait]
/// Capability contract between the pipeline and one platform.
///
/// Read methods are side-effect free. Errors use the shared taxonomy:
/// 401 maps to `Authentication`, other non-2xx to `UpstreamApi`, and
/// never-reached-the-platform to `Transport`.
pub trait Platform: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Fetches and normalizes the run's full data set. The primary entity
    /// fetch is required; comment/commit/diff/review sub-fetches degrade
    /// independently to empty lists.
    async fn fetch_run_data(&self, entity: EntityHandle) -> Result<RunData, HeraldError>;

    /// Fetches the entity's title/description/assignees for trigger checks.
    async fn entity_preview(&self, entity: EntityHandle) -> Result<EntityPreview, HeraldError>;

    /// Lists the entity's human discussion comments.
    async fn list_entity_comments(&self, entity: EntityHandle)
        -> Result<Vec<Comment>, HeraldError>;

    /// Resolves the actor's role in the repository. `Ok(None)` means the
    /// platform reported no membership (e.g. a 404 on the member lookup).
    async fn actor_access_level(&self, username: &str)
        -> Result<Option<AccessLevel>, HeraldError>;

    async fn actor_profile(&self, username: &str) -> Result<ActorProfile, HeraldError>;

    async fn create_comment(&self, entity: EntityHandle, body: &str) -> Result<u64, HeraldError>;

    /// Reads one comment back. A missing comment surfaces as
    /// `CommentMissing`, not a bare 404.
    async fn get_comment(
        &self,
        entity: EntityHandle,
        comment_id: u64,
    ) -> Result<Comment, HeraldError>;

    async fn update_comment(
        &self,
        entity: EntityHandle,
        comment_id: u64,
        body: &str,
    ) -> Result<(), HeraldError>;

    async fn default_branch(&self) -> Result<String, HeraldError>;

    async fn branch_exists(&self, name: &str) -> Result<bool, HeraldError>;

    async fn create_branch(&self, name: &str, from: &str) -> Result<(), HeraldError>;

    async fn delete_branch(&self, name: &str) -> Result<(), HeraldError>;

    /// Compares `head` against `base`, returning the commits and file
    /// changes unique to `head`.
    async fn compare_branches(
        &self,
        base: &str,
        head: &str,
    ) -> Result<BranchComparison, HeraldError>;

    /// Web URL for viewing a branch.
    fn branch_url(&self, name: &str) -> String;

    /// Web URL that pre-fills a new change request from `head` into `base`.
    fn new_change_request_url(&self, base: &str, head: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::{AccessLevel, EntityHandle, OptionalFetch, ProviderKind};
    use crate::error::HeraldError;
    use crate::model::EntityKind;

    #[test]
    fn unit_provider_kind_parse_accepts_case_variants() {
        assert_eq!(ProviderKind::parse("github"), Some(ProviderKind::Github));
        assert_eq!(ProviderKind::parse(" GitLab "), Some(ProviderKind::Gitlab));
        assert_eq!(ProviderKind::parse("bitbucket"), None);
    }

    #[test]
    fn unit_change_request_noun_matches_platform_terminology() {
        assert_eq!(ProviderKind::Github.change_request_noun(), "pull request");
        assert_eq!(ProviderKind::Gitlab.change_request_noun(), "merge request");
    }

    #[test]
    fn unit_access_level_write_threshold_is_developer() {
        assert!(!AccessLevel::GUEST.can_write());
        assert!(!AccessLevel::REPORTER.can_write());
        assert!(AccessLevel::DEVELOPER.can_write());
        assert!(AccessLevel::MAINTAINER.can_write());
        assert!(AccessLevel::OWNER.can_write());
    }

    #[test]
    fn unit_entity_handle_constructors_tag_the_kind() {
        assert_eq!(EntityHandle::issue(3).kind, EntityKind::Issue);
        assert_eq!(
            EntityHandle::merge_request(9).kind,
            EntityKind::MergeRequest
        );
    }

    #[test]
    fn functional_optional_fetch_degrades_with_reason_and_default() {
        let fetched: OptionalFetch<Vec<u64>> = OptionalFetch::from_result("commits", Ok(vec![1]));
        assert!(!fetched.is_degraded());
        assert_eq!(fetched.into_value(), vec![1]);

        let degraded: OptionalFetch<Vec<u64>> = OptionalFetch::from_result(
            "commits",
            Err(HeraldError::UpstreamApi {
                operation: "list commits".to_string(),
                status: 500,
                message: "boom".to_string(),
            }),
        );
        assert!(degraded.is_degraded());
        assert!(degraded.into_value().is_empty());
    }
}
