//! Runtime configuration.
//!
//! A [`Config`] is built once at startup and passed by reference to whatever
//! needs it. Nothing in this crate reads configuration from globals.

use std::time::Duration;

/// Public review host for COS changes.
pub const DEFAULT_GERRIT_HOST: &str = "https://cos-review.googlesource.com";
/// Review host holding CLs mirrored into COS from upstream.
pub const DEFAULT_FALLBACK_GERRIT_HOST: &str = "https://chromium-review.googlesource.com";
/// Gitiles host serving the manifest repository.
pub const DEFAULT_GITILES_HOST: &str = "cos.googlesource.com";
/// Repository holding one manifest snapshot per build tag.
pub const DEFAULT_MANIFEST_REPO: &str = "cos/manifest-snapshots";
/// Prefix of mirrored repositories when a CL was found on the fallback host.
pub const DEFAULT_FALLBACK_REPO_PREFIX: &str = "mirrors/cros/";
/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hosts, repositories and limits used by the changelog and find-build operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Primary Gerrit host, with scheme.
    pub gerrit_host: String,
    /// Gerrit host retried when the primary does not know the CL.
    pub fallback_gerrit_host: String,
    /// Gitiles host of the manifest repository. Scheme optional.
    pub gitiles_host: String,
    /// Manifest snapshot repository.
    pub manifest_repo: String,
    /// Prefix added to project names when querying via the fallback host.
    pub fallback_repo_prefix: String,
    /// Comparison tool linked when neither build exists.
    pub comparison_url: Option<String>,
    /// Timeout applied to every individual request.
    pub request_timeout: Duration,
    /// Commits per repository in a changelog. `None` fetches everything.
    pub query_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gerrit_host: DEFAULT_GERRIT_HOST.to_string(),
            fallback_gerrit_host: DEFAULT_FALLBACK_GERRIT_HOST.to_string(),
            gitiles_host: DEFAULT_GITILES_HOST.to_string(),
            manifest_repo: DEFAULT_MANIFEST_REPO.to_string(),
            fallback_repo_prefix: DEFAULT_FALLBACK_REPO_PREFIX.to_string(),
            comparison_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            query_size: None,
        }
    }
}

impl Config {
    /// Builds a configuration from `CHANGELOG_*` environment variables,
    /// falling back to the defaults for anything unset.
    ///
    /// Recognised variables: `CHANGELOG_GERRIT_HOST`,
    /// `CHANGELOG_FALLBACK_GERRIT_HOST`, `CHANGELOG_GITILES_HOST`,
    /// `CHANGELOG_MANIFEST_REPO`, `CHANGELOG_FALLBACK_REPO_PREFIX`,
    /// `CHANGELOG_COMPARISON_URL` and `CHANGELOG_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CHANGELOG_GERRIT_HOST") {
            config.gerrit_host = v;
        }
        if let Some(v) = get("CHANGELOG_FALLBACK_GERRIT_HOST") {
            config.fallback_gerrit_host = v;
        }
        if let Some(v) = get("CHANGELOG_GITILES_HOST") {
            config.gitiles_host = v;
        }
        if let Some(v) = get("CHANGELOG_MANIFEST_REPO") {
            config.manifest_repo = v;
        }
        if let Some(v) = lookup("CHANGELOG_FALLBACK_REPO_PREFIX") {
            // An empty prefix is meaningful here.
            config.fallback_repo_prefix = v;
        }
        config.comparison_url = get("CHANGELOG_COMPARISON_URL");
        match get("CHANGELOG_REQUEST_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
            Some(_) => tracing::warn!("ignoring invalid CHANGELOG_REQUEST_TIMEOUT_SECS"),
            None => {}
        }
        config
    }
}
