//! Locating the first build that contains a CL.
//!
//! The search works backwards from what Gerrit knows about the CL:
//!
//! 1. Look up the CL's project, branch, revision and submission time.
//! 2. List the manifest-snapshot history of the CL's release branch and pick
//!    the snapshots committed within a window after the submission.
//! 3. Download those snapshots concurrently and note which revision of the
//!    CL's repository each build pins.
//! 4. List the repository's commits between the oldest and newest pinned
//!    revisions, find the CL's revision, then walk towards newer commits until
//!    one is pinned by a build. That build is the answer.
//!
//! When the window holds no usable build the window is widened
//! exponentially and the search repeats.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{Instrument, instrument};

use crate::commit::GitCommit;
use crate::commits::fetch_commits;
use crate::config::Config;
use crate::error::{ChangelogError, ErrorKind};
use crate::gerrit::{ChangeInfo, GerritClient};
use crate::gitiles::GitilesClient;
use crate::manifest::{self, Manifest, ProjectMatch};
use crate::task::with_deadline;

/// Length of a full commit SHA; anything else is treated as a change number.
const FULL_SHA_LENGTH: usize = 40;
/// Initial search window, in days after submission.
const DEFAULT_SEARCH_DAYS: i64 = 5;
/// Factor the window grows by on every retry.
const SEARCH_RANGE_MULTIPLIER: i64 = 5;
/// Cap on the repository log when no build in the window pins an older revision.
const NO_SOURCE_CHANGELOG_SIZE: usize = 10_000;
const TAG_REF_PREFIX: &str = "refs/tags/";

/// Kernel repositories name branches `<release>-<product>-<version>`.
/// Branches that do not follow the pattern belong to `master`.
static RELEASE_RULES: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    [
        ("third_party/kernel", "(.*)-cos-.*"),
        ("chromiumos/third_party/kernel", "(.*)-chromeos-.*"),
        ("chromiumos/third_party/lakitu-kernel", "(.*)-lakitu-.*"),
    ]
    .into_iter()
    .map(|(project, pattern)| (project, Regex::new(pattern).unwrap()))
    .collect()
});
const DEFAULT_RELEASE: &str = "master";

static CROS_PROJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^(?:chromeos|chrome|chromiumos|chromium)?/(.*)").unwrap());

/// Where and what to search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Gerrit host holding the CL, with scheme.
    pub gerrit_host: String,
    /// Gitiles host of the manifest repository.
    pub gitiles_host: String,
    pub manifest_repo: String,
    /// Prefix mirrored repositories carry in the manifest. Empty for CLs
    /// reviewed on the primary host.
    pub repo_prefix: String,
    /// CL number or full commit SHA.
    pub cl: String,
    pub request_timeout: Duration,
    /// Give up once this instant passes.
    pub deadline: Option<tokio::time::Instant>,
}

impl BuildRequest {
    /// Request against the primary Gerrit host.
    pub fn new(config: &Config, cl: &str) -> Self {
        Self {
            gerrit_host: config.gerrit_host.clone(),
            gitiles_host: config.gitiles_host.clone(),
            manifest_repo: config.manifest_repo.clone(),
            repo_prefix: String::new(),
            cl: cl.to_string(),
            request_timeout: config.request_timeout,
            deadline: None,
        }
    }

    /// Request against the fallback Gerrit host, for CLs mirrored from upstream.
    pub fn fallback(config: &Config, cl: &str) -> Self {
        Self {
            gerrit_host: config.fallback_gerrit_host.clone(),
            repo_prefix: config.fallback_repo_prefix.clone(),
            ..Self::new(config, cl)
        }
    }

    pub fn with_deadline(mut self, deadline: Option<tokio::time::Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Result of [`find_build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResponse {
    pub build_number: String,
    pub cl_number: String,
}

/// What Gerrit knows about a CL, plus the current search window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClData {
    pub cl_number: String,
    /// Gerrit host the CL was found on.
    pub instance_url: String,
    /// Project name as matched against manifest project names.
    pub project: String,
    /// Manifest branch the CL's branch ships in.
    pub release: String,
    pub branch: String,
    pub revision: String,
    pub search_start: DateTime<Utc>,
    pub search_end: DateTime<Utc>,
}

/// Gerrit query selecting the CL.
pub fn query_string(cl: &str) -> String {
    if cl.len() == FULL_SHA_LENGTH {
        format!("commit:{cl}")
    } else {
        format!("change:{cl}")
    }
}

/// Manifest branch for a CL on `branch` of `project`.
pub fn release_for(project: &str, branch: &str) -> String {
    if branch == "main" {
        return DEFAULT_RELEASE.to_string();
    }
    match RELEASE_RULES.get(project) {
        Some(rule) => rule
            .captures(branch)
            .and_then(|c| c.get(1))
            .map_or_else(|| DEFAULT_RELEASE.to_string(), |m| m.as_str().to_string()),
        None => branch.to_string(),
    }
}

/// Drops a leading `chromeos/`, `chrome/`, `chromiumos/` or `chromium/`.
pub fn strip_project_prefix(project: &str) -> &str {
    CROS_PROJECT_RE
        .captures(project)
        .and_then(|c| c.get(1))
        .map_or(project, |m| m.as_str())
}

fn cl_data_from_change(
    change: ChangeInfo,
    instance_url: &str,
    repo_prefix: &str,
) -> Result<ClData, ChangelogError> {
    let cl_number = change.number.to_string();
    let Some(submitted) = change.submitted else {
        tracing::debug!(%cl_number, "CL is not submitted");
        return Err(ChangelogError::ClNotSubmitted {
            cl: cl_number,
            instance_url: instance_url.to_string(),
        });
    };
    let revision = change
        .current_revision
        .ok_or_else(|| ChangelogError::internal(format!("CL {cl_number} has no current revision")))?;

    let project = if repo_prefix.is_empty() {
        strip_project_prefix(&change.project).to_string()
    } else {
        format!("{repo_prefix}{}", change.project)
    };

    Ok(ClData {
        release: release_for(&change.project, &change.branch),
        cl_number,
        instance_url: instance_url.to_string(),
        project,
        branch: change.branch,
        revision,
        search_start: submitted,
        search_end: submitted + TimeDelta::days(DEFAULT_SEARCH_DAYS),
    })
}

/// Queries Gerrit for the CL and derives its search parameters.
pub async fn cl_data(
    gerrit: &GerritClient,
    cl: &str,
    repo_prefix: &str,
) -> Result<ClData, ChangelogError> {
    tracing::debug!(cl, host = gerrit.host(), "querying Gerrit");
    let not_found = || ChangelogError::ClNotFound { cl: cl.to_string() };
    let changes = gerrit
        .query_changes(&query_string(cl), 1)
        .await
        .map_err(|err| {
            tracing::warn!(cl, %err, "CL query failed");
            if err.status() == Some(400) {
                not_found()
            } else {
                ChangelogError::from_transport(err, not_found)
            }
        })?;
    let change = changes.into_iter().next().ok_or_else(not_found)?;
    tracing::debug!(
        cl,
        project = %change.project,
        branch = %change.branch,
        revision = ?change.current_revision,
        "found CL"
    );
    cl_data_from_change(change, gerrit.host(), repo_prefix)
}

/// Indices into the newest-first manifest history selecting the snapshots to
/// inspect, as an inclusive `newest..=oldest` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CandidateRange {
    pub newest: usize,
    pub oldest: usize,
    /// The window has not yet reached the newest snapshot.
    pub can_expand: bool,
}

/// Selects the snapshots around `[start, end]` from commit times sorted newest
/// first. The span includes the last snapshot before `start` and the first
/// one after `end`. Returns `None` when every snapshot predates `start`.
pub(crate) fn candidate_range(
    times: &[DateTime<Utc>],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<CandidateRange> {
    let last = times.len().checked_sub(1)?;
    if times[0] < start {
        return None;
    }
    let oldest = times.partition_point(|t| *t >= start).min(last);
    let newest = times
        .partition_point(|t| *t > end)
        .saturating_sub(1)
        .min(oldest);
    Some(CandidateRange {
        newest,
        oldest,
        can_expand: newest != 0,
    })
}

/// Maps each snapshot in `commits` to the build number tagging it.
pub(crate) fn candidate_builds(
    commits: &[GitCommit],
    tags: &HashMap<String, String>,
) -> Result<Vec<String>, ChangelogError> {
    // Sorted so that a commit with several tags always maps to the same one.
    let by_sha: HashMap<&str, &str> = tags
        .iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .rev()
        .map(|(tag, sha)| (sha.as_str(), tag.as_str()))
        .collect();

    commits
        .iter()
        .map(|commit| {
            let tag = by_sha.get(commit.id.as_str()).ok_or_else(|| {
                ChangelogError::internal(format!("no tag found for manifest commit {}", commit.id))
            })?;
            // Assumes every build tag lives directly under refs/tags/.
            if tag.len() <= TAG_REF_PREFIX.len() {
                return Err(ChangelogError::internal(format!(
                    "malformed tag {tag} for manifest commit {}",
                    commit.id
                )));
            }
            Ok(tag[TAG_REF_PREFIX.len()..].to_string())
        })
        .collect()
}

/// Revisions of the CL's repository pinned by the candidate builds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RepoData {
    /// Pinned revision to the oldest build pinning it.
    pub candidates: HashMap<String, String>,
    /// Revision pinned by the oldest readable build. Empty when that build
    /// does not include the repository.
    pub source_sha: String,
    /// Revision pinned by the newest build including the repository.
    pub target_sha: String,
    pub remote_url: String,
    /// Repository name as the manifest spells it.
    pub repo_name: String,
}

/// Folds per-build manifest lookups into [`RepoData`].
///
/// `results` holds `(index into builds, lookup)` for every build whose manifest
/// could be read; `builds` is newest first.
///
/// The target revision comes from the newest build that includes the
/// repository rather than the newest readable build. A newer build without
/// the repository pins no revision the CL could land in, so both choices find
/// the same build.
pub(crate) fn summarize_candidates(
    builds: &[String],
    results: &[(usize, Option<ProjectMatch>)],
) -> Option<RepoData> {
    let mut data = RepoData::default();
    let newest = results
        .iter()
        .filter_map(|(i, found)| found.as_ref().map(|f| (*i, f)))
        .min_by_key(|(i, _)| *i)?;
    data.target_sha = newest.1.revision.clone();
    data.remote_url = newest.1.remote_url.clone();
    data.repo_name = newest.1.repo_name.clone();

    if let Some((_, oldest)) = results.iter().max_by_key(|(i, _)| *i) {
        data.source_sha = oldest
            .as_ref()
            .map(|f| f.revision.clone())
            .unwrap_or_default();
    }

    let mut order: HashMap<&str, usize> = HashMap::new();
    for (i, found) in results {
        let Some(found) = found else { continue };
        let entry = order.entry(found.revision.as_str()).or_insert(*i);
        *entry = (*entry).max(*i);
    }
    data.candidates = order
        .into_iter()
        .map(|(sha, i)| (sha.to_string(), builds[i].clone()))
        .collect();
    Some(data)
}

/// Downloads each build's manifest concurrently and records the revision it
/// pins for the CL's repository. Unreadable manifests are skipped.
async fn repo_data(
    client: &GitilesClient,
    manifest_repo: &str,
    cl: &ClData,
    builds: &[String],
) -> Result<RepoData, ChangelogError> {
    tracing::debug!(count = builds.len(), "parsing candidate manifests");
    let mut tasks = JoinSet::new();
    for (i, build) in builds.iter().enumerate() {
        let client = client.clone();
        let manifest_repo = manifest_repo.to_string();
        let build = build.clone();
        let project = cl.project.clone();
        let branch = cl.branch.clone();
        tasks.spawn(
            async move {
                let lookup = manifest::download(&client, &manifest_repo, &build)
                    .await
                    .and_then(|content| Manifest::parse(&content))
                    .map(|m| m.find_project(&project, &branch));
                (i, lookup)
            }
            .in_current_span(),
        );
    }

    let mut results = Vec::with_capacity(builds.len());
    while let Some(joined) = tasks.join_next().await {
        let (i, lookup) = joined
            .map_err(|err| ChangelogError::internal(format!("manifest task failed: {err}")))?;
        match lookup {
            Ok(found) => results.push((i, found)),
            Err(err) => tracing::debug!(build = %builds[i], %err, "skipping unreadable manifest"),
        }
    }

    summarize_candidates(builds, &results).ok_or_else(|| {
        tracing::debug!(cl = %cl.cl_number, "no candidate build uses the repository");
        ChangelogError::ClNotUsed {
            cl: cl.cl_number.clone(),
            project: cl.project.clone(),
            release: cl.release.clone(),
            instance_url: cl.instance_url.clone(),
        }
    })
}

/// First build containing `revision`, scanning `log` (newest first) from the
/// revision towards newer commits.
pub(crate) fn first_build(
    log: &[GitCommit],
    revision: &str,
    candidates: &HashMap<String, String>,
) -> Option<String> {
    let landed = log.iter().rposition(|c| c.id == revision)?;
    log[..=landed]
        .iter()
        .rev()
        .find_map(|c| candidates.get(&c.id).cloned())
}

/// State shared by every iteration of one search.
struct Search<'a> {
    http: &'a reqwest::Client,
    request: &'a BuildRequest,
    manifest_client: GitilesClient,
    history: Vec<GitCommit>,
    times: Vec<DateTime<Utc>>,
    tags: HashMap<String, String>,
}

impl Search<'_> {
    /// Searches the current window. The flag tells whether the window can
    /// still be widened.
    async fn in_range(&self, cl: &ClData) -> (Result<String, ChangelogError>, bool) {
        tracing::debug!(start = %cl.search_start, end = %cl.search_end, "searching window");
        let Some(range) = candidate_range(&self.times, cl.search_start, cl.search_end) else {
            return (
                Err(ChangelogError::ClTooRecent {
                    cl: cl.cl_number.clone(),
                    instance_url: cl.instance_url.clone(),
                }),
                false,
            );
        };
        let result = self.build_in_range(cl, range).await;
        (result, range.can_expand)
    }

    async fn build_in_range(
        &self,
        cl: &ClData,
        range: CandidateRange,
    ) -> Result<String, ChangelogError> {
        let builds = candidate_builds(&self.history[range.newest..=range.oldest], &self.tags)?;
        let repo = repo_data(
            &self.manifest_client,
            &self.request.manifest_repo,
            cl,
            &builds,
        )
        .await?;

        let landing_not_found = || ChangelogError::ClLandingNotFound {
            cl: cl.cl_number.clone(),
            instance_url: cl.instance_url.clone(),
        };
        if repo.target_sha.is_empty() {
            return Err(landing_not_found());
        }

        let client = if repo.remote_url == self.request.gitiles_host {
            self.manifest_client.clone()
        } else {
            tracing::debug!(remote_url = %repo.remote_url, "repository lives on another host");
            GitilesClient::new(
                self.http.clone(),
                &repo.remote_url,
                self.request.request_timeout,
            )
        };
        let query_size = repo
            .source_sha
            .is_empty()
            .then_some(NO_SOURCE_CHANGELOG_SIZE);
        let (log, _) = fetch_commits(
            &client,
            &repo.repo_name,
            &repo.target_sha,
            &repo.source_sha,
            query_size,
        )
        .await
        .map_err(|err| {
            tracing::warn!(repo = %repo.repo_name, %err, "failed to retrieve repository log");
            ChangelogError::from_transport(err, || ChangelogError::ClNotUsed {
                cl: cl.cl_number.clone(),
                project: repo.repo_name.clone(),
                release: cl.release.clone(),
                instance_url: cl.instance_url.clone(),
            })
        })?;

        first_build(&log, &cl.revision, &repo.candidates).ok_or_else(landing_not_found)
    }
}

/// Searches windows of growing size until the build is found or the window
/// reaches the newest snapshot.
async fn find_build_exponential(
    http: &reqwest::Client,
    request: &BuildRequest,
    mut cl: ClData,
) -> Result<String, ChangelogError> {
    let manifest_client =
        GitilesClient::new(http.clone(), &request.gitiles_host, request.request_timeout);

    let branch = format!("refs/heads/{}", cl.release);
    let (history, _) = fetch_commits(&manifest_client, &request.manifest_repo, &branch, "", None)
        .await
        .map_err(|err| {
            tracing::warn!(%branch, %err, "failed to retrieve manifest history");
            ChangelogError::from_transport(err, || ChangelogError::ClInvalidRelease {
                cl: cl.cl_number.clone(),
                release: cl.release.clone(),
                instance_url: cl.instance_url.clone(),
            })
        })?;
    let times = history
        .iter()
        .map(|c| {
            c.commit_time().ok_or_else(|| {
                ChangelogError::internal(format!("manifest commit {} has no commit time", c.id))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let Some(&oldest) = times.last() else {
        return Err(ChangelogError::internal(format!("{branch} has no manifest snapshots")));
    };

    if oldest > cl.search_end {
        cl.search_start = oldest - TimeDelta::seconds(1);
        cl.search_end = cl.search_start + TimeDelta::days(DEFAULT_SEARCH_DAYS);
        tracing::debug!(
            start = %cl.search_start,
            end = %cl.search_end,
            "CL predates the first snapshot, moving window"
        );
    }

    let tags = manifest_client
        .refs(&request.manifest_repo, "refs/tags")
        .await
        .map_err(|err| {
            ChangelogError::from_transport(err, || {
                ChangelogError::internal(format!("{} has no tags", request.manifest_repo))
            })
        })?;

    let search = Search {
        http,
        request,
        manifest_client,
        history,
        times,
        tags,
    };

    let mut range_days = DEFAULT_SEARCH_DAYS;
    loop {
        match search.in_range(&cl).await {
            (Err(err), true) if err.retryable() => {
                range_days *= SEARCH_RANGE_MULTIPLIER;
                cl.search_start = cl.search_end - TimeDelta::days(DEFAULT_SEARCH_DAYS);
                cl.search_end = cl.search_end + TimeDelta::days(range_days);
                tracing::debug!(
                    start = %cl.search_start,
                    end = %cl.search_end,
                    reason = %err.header(),
                    "widening search window"
                );
            }
            (result, _) => return result,
        }
    }
}

/// Finds the first build containing the CL named by `request.cl`.
///
/// ## Errors
///
/// - [`ChangelogError::ClNotFound`] when the Gerrit host does not know the CL
/// - [`ChangelogError::ClNotSubmitted`] when it has not been submitted
/// - [`ChangelogError::ClInvalidRelease`] when its release branch has no
///   manifest history
/// - [`ChangelogError::ClTooRecent`], [`ChangelogError::ClNotUsed`] or
///   [`ChangelogError::ClLandingNotFound`] when no build could be located
#[instrument(skip(http, request), fields(cl = %request.cl, gerrit = %request.gerrit_host))]
pub async fn find_build(
    http: &reqwest::Client,
    request: &BuildRequest,
) -> Result<BuildResponse, ChangelogError> {
    with_deadline(request.deadline, "find build", locate_build(http, request)).await
}

async fn locate_build(
    http: &reqwest::Client,
    request: &BuildRequest,
) -> Result<BuildResponse, ChangelogError> {
    let started = Instant::now();
    tracing::info!("searching for first build containing CL");

    let gerrit = GerritClient::new(http.clone(), &request.gerrit_host, request.request_timeout);
    let cl = cl_data(&gerrit, &request.cl, &request.repo_prefix).await?;
    let cl_number = cl.cl_number.clone();
    let build_number = find_build_exponential(http, request, cl).await?;

    tracing::info!(
        %build_number,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "found first build"
    );
    Ok(BuildResponse {
        build_number,
        cl_number,
    })
}

/// Runs [`find_build`] against `primary`, retrying against `fallback` when the
/// primary host does not know the CL. The flag reports whether the fallback
/// answered.
pub async fn find_build_with_fallback(
    http: &reqwest::Client,
    primary: &BuildRequest,
    fallback: &BuildRequest,
) -> Result<(BuildResponse, bool), ChangelogError> {
    match find_build(http, primary).await {
        Err(err) if err.kind() == ErrorKind::ClNotFound => {
            tracing::debug!(cl = %primary.cl, fallback = %fallback.gerrit_host, "CL not found, using fallback");
            find_build(http, fallback).await.map(|found| (found, true))
        }
        result => result.map(|found| (found, false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 9, day, hour, 0, 0).unwrap()
    }

    fn commit(id: &str) -> GitCommit {
        GitCommit {
            id: id.to_string(),
            ..GitCommit::default()
        }
    }

    fn change(submitted: Option<DateTime<Utc>>) -> ChangeInfo {
        ChangeInfo {
            number: 1540,
            project: "chromiumos/third_party/kernel".to_string(),
            branch: "release-R85-13310.B-chromeos-5.4".to_string(),
            current_revision: Some("deadbeef".to_string()),
            submitted,
        }
    }

    #[test]
    fn test_query_string() {
        assert_eq!(query_string("3206"), "change:3206");
        assert_eq!(
            query_string("I7e549d7753cc7acec2b44bb5a305347a97719ab9"),
            "change:I7e549d7753cc7acec2b44bb5a305347a97719ab9"
        );
        let sha = "a".repeat(40);
        assert_eq!(query_string(&sha), format!("commit:{sha}"));
    }

    #[test]
    fn test_release_for() {
        assert_eq!(
            release_for("third_party/kernel", "release-R85-13310.B-cos-5.4"),
            "release-R85-13310.B"
        );
        assert_eq!(
            release_for("chromiumos/third_party/lakitu-kernel", "release-R77-12371.B-lakitu-4.19"),
            "release-R77-12371.B"
        );
        assert_eq!(release_for("third_party/kernel", "cos-5.4"), "master");
        assert_eq!(release_for("cos/tools", "release-R85"), "release-R85");
        assert_eq!(release_for("cos/tools", "main"), "master");
        assert_eq!(release_for("third_party/kernel", "main"), "master");
    }

    #[test]
    fn test_strip_project_prefix() {
        assert_eq!(strip_project_prefix("chromiumos/platform2"), "platform2");
        assert_eq!(strip_project_prefix("chromium/src"), "src");
        assert_eq!(strip_project_prefix("chromeos/overlays/x"), "overlays/x");
        assert_eq!(strip_project_prefix("third_party/kernel"), "third_party/kernel");
    }

    #[test]
    fn test_cl_data_from_change() {
        let data = cl_data_from_change(change(Some(at(1, 0))), "https://review", "").unwrap();
        assert_eq!(data.cl_number, "1540");
        assert_eq!(data.project, "third_party/kernel");
        assert_eq!(data.release, "release-R85-13310.B");
        assert_eq!(data.branch, "release-R85-13310.B-chromeos-5.4");
        assert_eq!(data.search_start, at(1, 0));
        assert_eq!(data.search_end, at(6, 0));
    }

    #[test]
    fn test_cl_data_with_repo_prefix_keeps_full_project() {
        let data =
            cl_data_from_change(change(Some(at(1, 0))), "https://review", "mirrors/cros/").unwrap();
        assert_eq!(data.project, "mirrors/cros/chromiumos/third_party/kernel");
    }

    #[test]
    fn test_cl_data_unsubmitted() {
        let err = cl_data_from_change(change(None), "https://review", "").unwrap_err();
        assert_eq!(
            err,
            ChangelogError::ClNotSubmitted {
                cl: "1540".to_string(),
                instance_url: "https://review".to_string()
            }
        );
    }

    #[test]
    fn test_candidate_range_inside_history() {
        // Snapshots on days 10, 8, 6, 4, 2 (newest first).
        let times = vec![at(10, 0), at(8, 0), at(6, 0), at(4, 0), at(2, 0)];
        let range = candidate_range(&times, at(5, 0), at(7, 0)).unwrap();
        assert_eq!(range.oldest, 3, "includes the snapshot before the window");
        assert_eq!(range.newest, 1, "includes the snapshot after the window");
        assert!(range.can_expand);
    }

    #[test]
    fn test_candidate_range_reaching_newest() {
        let times = vec![at(10, 0), at(8, 0), at(6, 0)];
        let range = candidate_range(&times, at(7, 0), at(20, 0)).unwrap();
        assert_eq!((range.newest, range.oldest), (0, 2));
        assert!(!range.can_expand);
    }

    #[test]
    fn test_candidate_range_before_history_clamps_to_oldest() {
        let times = vec![at(10, 0), at(8, 0)];
        let range = candidate_range(&times, at(1, 0), at(9, 0)).unwrap();
        assert_eq!((range.newest, range.oldest), (0, 1));
    }

    #[test]
    fn test_candidate_range_after_history() {
        let times = vec![at(10, 0), at(8, 0)];
        assert!(candidate_range(&times, at(11, 0), at(16, 0)).is_none());
        assert!(candidate_range(&[], at(11, 0), at(16, 0)).is_none());
    }

    #[test]
    fn test_candidate_builds() {
        let tags = HashMap::from([
            ("refs/tags/2.0.0".to_string(), "m2".to_string()),
            ("refs/tags/1.0.0".to_string(), "m1".to_string()),
        ]);
        let builds = candidate_builds(&[commit("m2"), commit("m1")], &tags).unwrap();
        assert_eq!(builds, vec!["2.0.0", "1.0.0"]);
    }

    #[test]
    fn test_candidate_builds_missing_or_malformed_tag() {
        let tags = HashMap::from([("refs/tags/".to_string(), "m1".to_string())]);
        assert!(matches!(
            candidate_builds(&[commit("m1")], &tags),
            Err(ChangelogError::Internal(_))
        ));
        assert!(matches!(
            candidate_builds(&[commit("m9")], &tags),
            Err(ChangelogError::Internal(_))
        ));
    }

    fn found(revision: &str) -> Option<ProjectMatch> {
        Some(ProjectMatch {
            repo_name: "cos/tools".to_string(),
            revision: revision.to_string(),
            remote_url: "cos.googlesource.com".to_string(),
        })
    }

    #[test]
    fn test_summarize_candidates() {
        let builds: Vec<String> = ["4.0.0", "3.0.0", "2.0.0", "1.0.0"]
            .iter()
            .map(|b| b.to_string())
            .collect();
        // 3.0.0 and 2.0.0 pin the same revision; 4.0.0 could not be read.
        let results = vec![
            (2, found("s2")),
            (1, found("s2")),
            (3, found("s1")),
        ];
        let data = summarize_candidates(&builds, &results).unwrap();
        assert_eq!(data.target_sha, "s2");
        assert_eq!(data.source_sha, "s1");
        assert_eq!(data.candidates["s2"], "2.0.0", "ties keep the older build");
        assert_eq!(data.candidates["s1"], "1.0.0");
        assert_eq!(data.remote_url, "cos.googlesource.com");
    }

    #[test]
    fn test_summarize_candidates_repo_missing_in_oldest() {
        let builds: Vec<String> = vec!["2.0.0".to_string(), "1.0.0".to_string()];
        let data = summarize_candidates(&builds, &[(0, found("s2")), (1, None)]).unwrap();
        assert_eq!(data.target_sha, "s2");
        assert_eq!(data.source_sha, "");
        assert_eq!(data.candidates.len(), 1);
    }

    #[test]
    fn test_summarize_candidates_unused() {
        let builds = vec!["1.0.0".to_string()];
        assert!(summarize_candidates(&builds, &[(0, None)]).is_none());
        assert!(summarize_candidates(&builds, &[]).is_none());
    }

    #[test]
    fn test_first_build_walks_towards_newer() {
        // Newest first: c4 is pinned by 2.0.0, c1 by 1.0.0.
        let log = vec![commit("c4"), commit("c3"), commit("cl"), commit("c1")];
        let candidates = HashMap::from([
            ("c4".to_string(), "2.0.0".to_string()),
            ("c1".to_string(), "1.0.0".to_string()),
        ]);
        assert_eq!(first_build(&log, "cl", &candidates).as_deref(), Some("2.0.0"));
    }

    #[test]
    fn test_first_build_pinned_revision_itself() {
        let log = vec![commit("c2"), commit("cl")];
        let candidates = HashMap::from([("cl".to_string(), "1.5.0".to_string())]);
        assert_eq!(first_build(&log, "cl", &candidates).as_deref(), Some("1.5.0"));
    }

    #[test]
    fn test_first_build_not_found() {
        let log = vec![commit("c2"), commit("cl")];
        let candidates = HashMap::from([("c9".to_string(), "9.0.0".to_string())]);
        assert!(first_build(&log, "cl", &candidates).is_none());
        assert!(first_build(&log, "missing", &candidates).is_none());
    }

    #[test]
    fn test_fallback_request_uses_fallback_host() {
        let config = Config::default();
        let request = BuildRequest::fallback(&config, "3206");
        assert_eq!(request.gerrit_host, config.fallback_gerrit_host);
        assert_eq!(request.repo_prefix, "mirrors/cros/");
        assert_eq!(request.gitiles_host, config.gitiles_host);
        assert!(BuildRequest::new(&config, "3206").repo_prefix.is_empty());
    }
}
