//! GitHub adapter: REST client plus the [`herald_core::Platform`]
//! implementation that normalizes GitHub payloads into the canonical
//! model.

mod adapter;
mod api;

pub use adapter::{GithubPlatform, GithubPlatformConfig};
