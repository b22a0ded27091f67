//! Deployment identifier resolution
//!
//! Turns an arbitrary, unpredictable branch name into a stable token that is
//! safe to embed in resource names (`[A-Za-z0-9-]` only) and identical across
//! both pipelines for the same change. Resolution is a strict fallback ladder:
//! the platform-supplied change id wins, then the authoritative proposal
//! lookup, then a `pr<digits>` marker in the branch name, then the trailing
//! digit group, and finally a sanitized branch name suffixed with a slice of
//! the commit hash.
//!
//! The ladder is deterministic: identical `(branch, commit, change id, lookup
//! result)` inputs always produce the same identifier and derivation method.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::clients::LookupClient;
use crate::{Error, Result};

/// Marker token adjacent to the proposal number, e.g. `pr-212`, `PR_7`, `pr9`
static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpr[-_]?(\d+)").expect("marker regex is valid"));

/// Trailing run of digits, e.g. `bugfix-123`
static TRAILING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)$").expect("trailing regex is valid"));

/// Runs of characters that are not resource-name safe
static UNSAFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("charset regex is valid"));

/// Characters of the commit hash appended by the hash fallback
const COMMIT_SLICE_LEN: usize = 7;

/// The branch-change event that triggered a run. Immutable once built.
#[derive(Debug, Clone)]
pub struct BranchEvent {
    pub branch: String,
    pub commit: Option<String>,
    pub change_id: Option<String>,
}

impl BranchEvent {
    pub fn new(branch: &str, commit: Option<&str>, change_id: Option<&str>) -> Self {
        Self {
            branch: branch.to_string(),
            commit: commit.map(String::from),
            change_id: change_id.map(String::from),
        }
    }
}

/// How an identifier was derived, in ladder order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DerivationMethod {
    PlatformChangeId,
    ApiLookup,
    PatternMatch,
    TrailingNumber,
    HashFallback,
}

impl fmt::Display for DerivationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DerivationMethod::PlatformChangeId => "platform-change-id",
            DerivationMethod::ApiLookup => "api-lookup",
            DerivationMethod::PatternMatch => "pattern-match",
            DerivationMethod::TrailingNumber => "trailing-number",
            DerivationMethod::HashFallback => "hash-fallback",
        };
        write!(f, "{name}")
    }
}

/// A resolved, resource-name-safe deployment identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentIdentifier {
    token: String,
    method: DerivationMethod,
}

impl DeploymentIdentifier {
    fn new(token: String, method: DerivationMethod) -> Self {
        debug_assert!(
            !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'),
            "identifier token must be non-empty and [A-Za-z0-9-]"
        );
        Self { token, method }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn method(&self) -> DerivationMethod {
        self.method
    }
}

impl fmt::Display for DeploymentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Resolve the deployment identifier for a branch event.
///
/// First success wins; the steps never merge. A lookup transport failure is
/// fatal rather than silently skipped: falling through on an outage would let
/// the two pipelines derive different identifiers for the same change.
pub async fn resolve(
    event: &BranchEvent,
    lookup: &dyn LookupClient,
) -> Result<DeploymentIdentifier> {
    // 1. Platform-supplied change id, verbatim (modulo the charset invariant).
    if let Some(change_id) = event.change_id.as_deref() {
        let token = sanitize(change_id);
        if !token.is_empty() {
            return Ok(DeploymentIdentifier::new(
                token,
                DerivationMethod::PlatformChangeId,
            ));
        }
        tracing::warn!(
            "Platform change id {:?} sanitized to nothing, falling back to branch resolution",
            change_id
        );
    }

    let branch = event.branch.trim();
    if branch.is_empty() {
        return Err(Error::Resolution("branch name is empty".to_string()));
    }
    if branch == "HEAD" {
        return Err(Error::Resolution(
            "branch is a detached HEAD; discover the real branch before resolving".to_string(),
        ));
    }

    // 2. Authoritative lookup for an open proposal with this head.
    let proposals = lookup.open_proposals(branch).await?;
    if let Some(proposal) = proposals.first() {
        return Ok(DeploymentIdentifier::new(
            proposal.number.to_string(),
            DerivationMethod::ApiLookup,
        ));
    }

    // 3. Marker token: digits adjacent to `pr`, not any other digit group.
    if let Some(captures) = MARKER_RE.captures(branch) {
        return Ok(DeploymentIdentifier::new(
            captures[1].to_string(),
            DerivationMethod::PatternMatch,
        ));
    }

    // 4. Trailing digit group.
    if let Some(captures) = TRAILING_RE.captures(branch) {
        return Ok(DeploymentIdentifier::new(
            captures[1].to_string(),
            DerivationMethod::TrailingNumber,
        ));
    }

    // 5. Sanitized branch name plus a commit slice, unique per push even for
    //    identically-named branches.
    let base = sanitize(branch);
    let suffix = commit_slice(event, branch);
    let token = match (base.is_empty(), suffix.is_empty()) {
        (false, false) => format!("{base}-{suffix}"),
        (false, true) => base,
        (true, false) => suffix,
        (true, true) => {
            return Err(Error::Resolution(format!(
                "branch {branch:?} yields no usable identifier"
            )))
        }
    };

    Ok(DeploymentIdentifier::new(
        token,
        DerivationMethod::HashFallback,
    ))
}

/// Replace every non-alphanumeric run with a single hyphen and trim the edges
fn sanitize(raw: &str) -> String {
    UNSAFE_RE
        .replace_all(raw, "-")
        .trim_matches('-')
        .to_string()
}

/// First characters of the commit hash, or a digest of the branch name when no
/// commit is available (shallow checkouts)
fn commit_slice(event: &BranchEvent, branch: &str) -> String {
    let commit = event
        .commit
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(sanitize)
        .filter(|c| !c.is_empty());

    match commit {
        Some(hash) => hash.chars().take(COMMIT_SLICE_LEN).collect(),
        None => {
            let digest = Sha256::digest(branch.as_bytes());
            format!("{digest:x}")[..COMMIT_SLICE_LEN].to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockLookupClient, Proposal};

    fn event(branch: &str, commit: Option<&str>, change_id: Option<&str>) -> BranchEvent {
        BranchEvent::new(branch, commit, change_id)
    }

    fn charset_ok(token: &str) -> bool {
        !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    }

    #[tokio::test]
    async fn test_platform_change_id_wins_over_pattern() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("feature/pr-212", None, Some("77")), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "77");
        assert_eq!(id.method(), DerivationMethod::PlatformChangeId);
        // The ladder never reached the lookup step.
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_lookup_wins_over_digitless_branch() {
        let lookup = MockLookupClient::new().returns(vec![Proposal { number: 45 }]);
        let id = resolve(&event("release/x", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "45");
        assert_eq!(id.method(), DerivationMethod::ApiLookup);
    }

    #[tokio::test]
    async fn test_lookup_first_result_used() {
        let lookup = MockLookupClient::new()
            .returns(vec![Proposal { number: 9 }, Proposal { number: 8 }]);
        let id = resolve(&event("release/x", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "9");
    }

    #[tokio::test]
    async fn test_lookup_transport_failure_is_fatal() {
        let lookup = MockLookupClient::new().fails("connection refused");
        let result = resolve(&event("release/x", None, None), &lookup).await;
        assert!(matches!(result, Err(Error::Lookup(_))));
    }

    #[tokio::test]
    async fn test_pattern_match_marker_digits() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("feature/pr-212", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "212");
        assert_eq!(id.method(), DerivationMethod::PatternMatch);
    }

    #[tokio::test]
    async fn test_pattern_match_is_case_insensitive() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("hotfix/PR_7-login", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "7");
        assert_eq!(id.method(), DerivationMethod::PatternMatch);
    }

    #[tokio::test]
    async fn test_marker_digits_beat_trailing_digits() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("pr-99-build-123", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "99");
        assert_eq!(id.method(), DerivationMethod::PatternMatch);
    }

    #[tokio::test]
    async fn test_trailing_number_without_marker() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("bugfix-123", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "123");
        assert_eq!(id.method(), DerivationMethod::TrailingNumber);
    }

    #[tokio::test]
    async fn test_trailing_group_not_first_group() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("v2-hotfix-789", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "789");
        assert_eq!(id.method(), DerivationMethod::TrailingNumber);
    }

    #[tokio::test]
    async fn test_hash_fallback_appends_commit_slice() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("my-custom-branch", Some("abc1234def"), None), &lookup)
            .await
            .unwrap();
        assert_eq!(id.as_str(), "my-custom-branch-abc1234");
        assert_eq!(id.method(), DerivationMethod::HashFallback);
    }

    #[tokio::test]
    async fn test_hash_fallback_without_commit_is_deterministic() {
        let lookup = MockLookupClient::new();
        let first = resolve(&event("my-custom-branch", None, None), &lookup)
            .await
            .unwrap();
        let second = resolve(&event("my-custom-branch", None, None), &lookup)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.method(), DerivationMethod::HashFallback);
        assert!(charset_ok(first.as_str()));
        assert!(first.as_str().starts_with("my-custom-branch-"));
    }

    #[tokio::test]
    async fn test_charset_invariant_for_hostile_branch_names() {
        let lookup = MockLookupClient::new();
        for branch in [
            "feat/añ__weird!!name",
            "UPPER/lower.dots",
            "--edges--",
            "slashes///everywhere",
        ] {
            let id = resolve(&event(branch, Some("deadbeef"), None), &lookup)
                .await
                .unwrap();
            assert!(charset_ok(id.as_str()), "bad token for {branch}: {id}");
        }
    }

    #[tokio::test]
    async fn test_determinism_across_repeated_calls() {
        for _ in 0..3 {
            let lookup = MockLookupClient::new();
            let id = resolve(&event("feature/pr-212", Some("abc1234"), None), &lookup)
                .await
                .unwrap();
            assert_eq!(id.as_str(), "212");
            assert_eq!(id.method(), DerivationMethod::PatternMatch);
        }
    }

    #[tokio::test]
    async fn test_empty_branch_is_fatal() {
        let lookup = MockLookupClient::new();
        let result = resolve(&event("  ", None, None), &lookup).await;
        assert!(matches!(result, Err(Error::Resolution(_))));
    }

    #[tokio::test]
    async fn test_detached_head_is_fatal() {
        let lookup = MockLookupClient::new();
        let result = resolve(&event("HEAD", None, None), &lookup).await;
        assert!(matches!(result, Err(Error::Resolution(_))));
    }

    #[tokio::test]
    async fn test_empty_branch_with_change_id_still_resolves() {
        let lookup = MockLookupClient::new();
        let id = resolve(&event("", None, Some("31")), &lookup).await.unwrap();
        assert_eq!(id.as_str(), "31");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("feature/pr-212"), "feature-pr-212");
        assert_eq!(sanitize("a..b__c"), "a-b-c");
        assert_eq!(sanitize("--x--"), "x");
        assert_eq!(sanitize("!!!"), "");
    }
}
