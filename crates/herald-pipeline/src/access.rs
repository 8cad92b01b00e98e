//! Write-permission gate and human-actor check.
//!
//! Both gates run before any comment is posted. The permission gate
//! resolves the actor's repository role and compares it against the write
//! threshold; when the role cannot be resolved at all, trust falls back to
//! the credential: an ambient job credential was issued by the CI system
//! for this project, so holding one stands in for membership. Every grant
//! path emits its own audit line so logs show which rule admitted the run.

use herald_core::platform::Platform;
use herald_core::HeraldError;

/// Decides whether `username` may drive a run against this repository.
///
/// `ambient_credential` is true when the API credential is the CI-issued
/// job credential rather than a configured token. Membership lookups that
/// fail upstream degrade into the same fallback as "no membership"; only
/// transport-level failures propagate.
pub async fn has_write_access(
    platform: &dyn Platform,
    username: &str,
    ambient_credential: bool,
) -> Result<bool, HeraldError> {
    if username.trim().is_empty() {
        return Ok(ambient_fallback(username, ambient_credential, "no actor signal"));
    }
    match platform.actor_access_level(username).await {
        Ok(Some(level)) => {
            if level.can_write() {
                tracing::info!(
                    actor = username,
                    access_level = level.0,
                    "write access verified by role lookup"
                );
                Ok(true)
            } else {
                tracing::warn!(
                    actor = username,
                    access_level = level.0,
                    "write access denied: role below write threshold"
                );
                Ok(false)
            }
        }
        Ok(None) => Ok(ambient_fallback(
            username,
            ambient_credential,
            "no project membership",
        )),
        Err(error) if matches!(error, HeraldError::UpstreamApi { .. }) => {
            tracing::warn!(actor = username, error = %error, "membership lookup failed");
            Ok(ambient_fallback(
                username,
                ambient_credential,
                "membership lookup failed",
            ))
        }
        Err(error) => Err(error),
    }
}

fn ambient_fallback(username: &str, ambient_credential: bool, reason: &str) -> bool {
    if ambient_credential {
        tracing::info!(
            actor = username,
            reason,
            "write access granted by ambient job credential"
        );
        true
    } else {
        tracing::warn!(
            actor = username,
            reason,
            "write access denied: cannot verify membership and credential is not ambient"
        );
        false
    }
}

/// Rejects runs triggered by platform-flagged bot accounts.
///
/// Only a positive bot flag rejects. A missing flag, an unknown actor, or
/// a failed profile lookup degrades to a warning so transient lookup
/// problems never block a legitimate run.
pub async fn assert_human_actor(
    platform: &dyn Platform,
    username: &str,
) -> Result<(), HeraldError> {
    if username.trim().is_empty() {
        tracing::warn!("no actor signal; skipping bot-actor check");
        return Ok(());
    }
    match platform.actor_profile(username).await {
        Ok(profile) if profile.is_bot == Some(true) => Err(HeraldError::BotActor {
            username: username.to_string(),
        }),
        Ok(_) => Ok(()),
        Err(error) => {
            tracing::warn!(
                actor = username,
                error = %error,
                "could not verify actor profile; proceeding"
            );
            Ok(())
        }
    }
}
