//! Build-to-build changelogs.
//!
//! A changelog between two builds is computed from their manifest snapshots:
//! for every repository pinned by one build, list the commits not reachable
//! from the revision the other build pins.
//!
//! ## Example
//!
//! ```no_run
//! use changelog_lib::{Config, changelog::changelog};
//!
//! # async fn example() -> Result<(), changelog_lib::ChangelogError> {
//! let config = Config::default();
//! let http = reqwest::Client::new();
//! let result = changelog(&http, "15000.0.0", "cos-dev-89-15001-0-0", &config, None).await?;
//! for (path, log) in &result.additions {
//!     println!("{path}: {} new commits", log.commits.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{Instrument, instrument};

use crate::commit::{Commit, parse_commit_log};
use crate::commits::fetch_commits;
use crate::config::Config;
use crate::error::ChangelogError;
use crate::gitiles::GitilesClient;
use crate::manifest::{self, RepoMap, RepoRef};
use crate::task::with_deadline;

/// `cos-[channel-]<milestone>-<build>`, e.g. `cos-rc-85-13310-1034-0`.
static IMAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^cos-(dev-|beta-|stable-|rc-)?\d+-([\d-]+)$").unwrap()
});

/// Converts an image name into its build number. Anything else is returned
/// unchanged.
///
/// ```
/// use changelog_lib::changelog::resolve_image_name;
///
/// assert_eq!(resolve_image_name("cos-rc-85-13310-1034-0"), "13310.1034.0");
/// assert_eq!(resolve_image_name("cos-85-13310-1034-0"), "13310.1034.0");
/// assert_eq!(resolve_image_name("13310.1034.0"), "13310.1034.0");
/// ```
pub fn resolve_image_name(input: &str) -> String {
    match IMAGE_NAME_RE.captures(input).and_then(|c| c.get(2)) {
        Some(build) => {
            let build_number = build.as_str().replacen('-', ".", 3);
            tracing::debug!(input, %build_number, "resolved image name");
            build_number
        }
        None => input.to_string(),
    }
}

/// Commits of one repository between two builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoLog {
    /// Newest first, as Gitiles returns them.
    pub commits: Vec<Commit>,
    pub instance_url: String,
    pub repo_name: String,
    /// Empty when the repository is absent from the other build.
    pub source_sha: String,
    pub target_sha: String,
    /// The commit list was cut at the requested query size.
    pub has_more_commits: bool,
}

/// Repository path to its log.
///
/// Repositories sharing a checkout path within one manifest are keyed
/// `path:name` instead, so none of them is lost.
pub type RepoLogs = HashMap<String, RepoLog>;

/// Result of [`changelog`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changelog {
    /// Commits in the target build but not the source build.
    pub additions: RepoLogs,
    /// Commits in the source build but not the target build.
    pub removals: RepoLogs,
}

/// Computes the changelog between `source` and `target`.
///
/// Both may be build numbers (`15000.0.0`) or image names
/// (`cos-dev-89-15000-0-0`). Manifests are read from `config.manifest_repo` on
/// `config.gitiles_host`; each repository log holds at most
/// `config.query_size` commits.
///
/// ## Errors
///
/// - [`ChangelogError::BothBuildsNotFound`] when neither build exists
/// - [`ChangelogError::BuildNotFound`] when one of them does not
/// - [`ChangelogError::PermissionDenied`] when a repository is not readable
/// - [`ChangelogError::Internal`] for anything else, including an expired
///   `deadline`
#[instrument(skip(http, config, deadline), fields(manifest_repo = %config.manifest_repo))]
pub async fn changelog(
    http: &reqwest::Client,
    source: &str,
    target: &str,
    config: &Config,
    deadline: Option<tokio::time::Instant>,
) -> Result<Changelog, ChangelogError> {
    with_deadline(deadline, "changelog", build_changelog(http, source, target, config)).await
}

async fn build_changelog(
    http: &reqwest::Client,
    source: &str,
    target: &str,
    config: &Config,
) -> Result<Changelog, ChangelogError> {
    let started = Instant::now();
    let source_build = resolve_image_name(source);
    let target_build = resolve_image_name(target);
    tracing::info!(%source_build, %target_build, "retrieving changelog");

    let manifest_client =
        GitilesClient::new(http.clone(), &config.gitiles_host, config.request_timeout);
    let (source_repos, target_repos) = tokio::join!(
        manifest::resolve(&manifest_client, &config.manifest_repo, source, &source_build),
        manifest::resolve(&manifest_client, &config.manifest_repo, target, &target_build),
    );
    let (source_repos, target_repos) = match (source_repos, target_repos) {
        (Ok(s), Ok(t)) => (s, t),
        (
            Err(ChangelogError::BuildNotFound { .. }),
            Err(ChangelogError::BuildNotFound { .. }),
        ) => {
            return Err(ChangelogError::BothBuildsNotFound {
                source_input: source.to_string(),
                target_input: target.to_string(),
                source_build,
                target_build,
                comparison_url: config.comparison_url.clone(),
            });
        }
        (Err(err), _) | (_, Err(err)) => return Err(err),
    };

    let mut clients: HashMap<String, GitilesClient> = HashMap::new();
    clients.insert(config.gitiles_host.clone(), manifest_client);
    for repo in source_repos.values().chain(target_repos.values()) {
        clients
            .entry(repo.instance_url.clone())
            .or_insert_with(|| {
                tracing::debug!(instance_url = %repo.instance_url, "creating Gitiles client");
                GitilesClient::new(http.clone(), &repo.instance_url, config.request_timeout)
            });
    }

    let (additions, removals) = tokio::join!(
        diff(&clients, &target_repos, &source_repos, config.query_size),
        diff(&clients, &source_repos, &target_repos, config.query_size),
    );
    let changelog = Changelog {
        additions: additions?,
        removals: removals?,
    };

    tracing::info!(
        additions = changelog.additions.len(),
        removals = changelog.removals.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "changelog complete"
    );
    Ok(changelog)
}

/// Key of a repository in [`RepoLogs`]: its path, or `path:name` when other
/// repositories in the same manifest share that path.
fn log_key(repo: &RepoRef, shared_paths: &HashSet<&str>) -> String {
    if shared_paths.contains(repo.path.as_str()) {
        format!("{}:{}", repo.path, repo.repo_name)
    } else {
        repo.path.clone()
    }
}

/// Paths checked out by more than one repository of `repos`.
fn shared_paths(repos: &RepoMap) -> HashSet<&str> {
    let mut seen = HashSet::new();
    repos
        .values()
        .filter(|repo| !seen.insert(repo.path.as_str()))
        .map(|repo| repo.path.as_str())
        .collect()
}

/// Lists, per repository in `new`, the commits not reachable from the revision
/// `old` pins. Repositories without such commits are left out.
async fn diff(
    clients: &HashMap<String, GitilesClient>,
    new: &RepoMap,
    old: &RepoMap,
    query_size: Option<usize>,
) -> Result<RepoLogs, ChangelogError> {
    let mut tasks = JoinSet::new();
    for (key, repo) in new {
        let client = clients
            .get(&repo.instance_url)
            .cloned()
            .ok_or_else(|| ChangelogError::internal(format!("no client for {}", repo.instance_url)))?;
        // A repository missing from `old` is new: all of its history counts.
        let ancestor = old
            .get(key)
            .map(|r| r.committish.clone())
            .unwrap_or_default();
        let repo = repo.clone();
        tasks.spawn(
            async move {
                let result = fetch_commits(
                    &client,
                    &repo.repo_name,
                    &repo.committish,
                    &ancestor,
                    query_size,
                )
                .await;
                (repo, result)
            }
            .in_current_span(),
        );
    }

    let shared = shared_paths(new);
    let mut logs = RepoLogs::new();
    // Returning early drops `tasks`, which aborts the fetches still running.
    while let Some(joined) = tasks.join_next().await {
        let (repo, result) = joined
            .map_err(|err| ChangelogError::internal(format!("commit fetch task failed: {err}")))?;
        let (commits, has_more_commits) = match result {
            Ok(found) => found,
            Err(err) if err.is_not_found() => {
                tracing::debug!(repo = %repo.repo_name, committish = %repo.committish, "revision not found, skipping");
                continue;
            }
            Err(err) => {
                tracing::error!(repo = %repo.repo_name, %err, "failed to retrieve commits");
                return Err(ChangelogError::from_transport(err, || {
                    ChangelogError::internal("unexpected not-found")
                }));
            }
        };
        if commits.is_empty() {
            continue;
        }
        let source_sha = old
            .get(&repo.key())
            .map(|r| r.committish.clone())
            .unwrap_or_default();
        logs.insert(
            log_key(&repo, &shared),
            RepoLog {
                commits: parse_commit_log(&commits),
                instance_url: repo.instance_url,
                repo_name: repo.repo_name,
                source_sha,
                target_sha: repo.committish,
                has_more_commits,
            },
        );
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_image_name_channels() {
        assert_eq!(resolve_image_name("cos-dev-89-15000-0-0"), "15000.0.0");
        assert_eq!(resolve_image_name("cos-beta-89-16108-0-1"), "16108.0.1");
        assert_eq!(resolve_image_name("cos-stable-85-13310-1041-9"), "13310.1041.9");
        assert_eq!(resolve_image_name("cos-rc-85-13310-1034-0"), "13310.1034.0");
    }

    #[test]
    fn test_resolve_image_name_passthrough() {
        assert_eq!(resolve_image_name("13310.1034.0"), "13310.1034.0");
        assert_eq!(resolve_image_name("cos-arm64-dev-89-15000-0-0"), "cos-arm64-dev-89-15000-0-0");
        assert_eq!(resolve_image_name(""), "");
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_resolve_image_name_logs_conversion() {
        resolve_image_name("cos-dev-89-15000-0-0");
        assert!(logs_contain("resolved image name"));
        assert!(logs_contain("15000.0.0"));
    }

    #[test]
    fn test_repo_log_serializes_snake_case() {
        let log = RepoLog {
            commits: vec![],
            instance_url: "cos.googlesource.com".to_string(),
            repo_name: "cos/tools".to_string(),
            source_sha: String::new(),
            target_sha: "abc".to_string(),
            has_more_commits: false,
        };
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["repo_name"], "cos/tools");
        assert_eq!(json["has_more_commits"], false);
    }

    #[tokio::test]
    async fn test_diff_with_empty_manifest_is_empty() {
        let logs = diff(&HashMap::new(), &RepoMap::new(), &RepoMap::new(), None)
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    fn repo(name: &str, path: &str) -> RepoRef {
        RepoRef {
            repo_name: name.to_string(),
            path: path.to_string(),
            instance_url: "cos.googlesource.com".to_string(),
            committish: "abc".to_string(),
        }
    }

    #[test]
    fn test_shared_paths_are_keyed_by_name() {
        let repos: RepoMap = [repo("repo-a", "src/shared"), repo("repo-b", "src/shared"), repo("foo", "src/foo")]
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();
        let shared = shared_paths(&repos);
        assert_eq!(shared, HashSet::from(["src/shared"]));
        assert_eq!(log_key(&repo("repo-a", "src/shared"), &shared), "src/shared:repo-a");
        assert_eq!(log_key(&repo("repo-b", "src/shared"), &shared), "src/shared:repo-b");
        assert_eq!(log_key(&repo("foo", "src/foo"), &shared), "src/foo");
    }

    mod properties {
        use super::super::resolve_image_name;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn image_names_normalise_to_build_numbers(
                channel in prop::sample::select(vec!["", "dev-", "beta-", "stable-", "rc-"]),
                milestone in 1u32..200,
                a in 0u32..100_000,
                b in 0u32..10_000,
                c in 0u32..100,
            ) {
                let image = format!("cos-{channel}{milestone}-{a}-{b}-{c}");
                prop_assert_eq!(resolve_image_name(&image), format!("{a}.{b}.{c}"));
            }

            #[test]
            fn dotted_build_numbers_pass_through(a in 0u32..100_000, b in 0u32..10_000, c in 0u32..100) {
                let build = format!("{a}.{b}.{c}");
                prop_assert_eq!(resolve_image_name(&build), build.clone());
            }
        }
    }
}
