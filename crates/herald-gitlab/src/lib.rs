//! GitLab adapter: REST client plus the [`herald_core::Platform`]
//! implementation that normalizes GitLab payloads into the canonical
//! model.

mod adapter;
mod api;

pub use adapter::{GitlabPlatform, GitlabPlatformConfig};
pub use api::GitlabAuth;
