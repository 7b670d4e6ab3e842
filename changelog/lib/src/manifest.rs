//! Manifest snapshots.
//!
//! Every build is tagged in the manifest repository with a `snapshot.xml`
//! pinning each repository to a revision. This module downloads and parses
//! those snapshots into [`RepoRef`]s.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{ChangelogError, TransportError};
use crate::gitiles::GitilesClient;

/// File holding the manifest at every build tag.
pub const MANIFEST_FILE: &str = "snapshot.xml";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Deserialize)]
struct ManifestXml {
    #[serde(rename = "remote", default)]
    remotes: Vec<RemoteXml>,
    #[serde(rename = "default", default)]
    default: Option<DefaultXml>,
    #[serde(rename = "project", default)]
    projects: Vec<Project>,
}

#[derive(Debug, Deserialize)]
struct RemoteXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@fetch")]
    fetch: String,
}

#[derive(Debug, Deserialize)]
struct DefaultXml {
    #[serde(rename = "@remote", default)]
    remote: Option<String>,
}

/// A `<project>` element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@path", default)]
    pub path: Option<String>,
    #[serde(rename = "@revision", default)]
    pub revision: String,
    #[serde(rename = "@remote", default)]
    pub remote: Option<String>,
    #[serde(rename = "@upstream", default)]
    pub upstream: Option<String>,
    #[serde(rename = "@dest-branch", default)]
    pub dest_branch: Option<String>,
}

impl Project {
    /// Checkout path, defaulting to the project name as `repo` does.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    /// Branch the project tracks, without `refs/heads/`. Empty when unpinned.
    pub fn branch(&self) -> &str {
        let branch = self
            .upstream
            .as_deref()
            .filter(|b| !b.is_empty())
            .or(self.dest_branch.as_deref())
            .unwrap_or("");
        branch.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(branch)
    }
}

/// Identity of a repository within a manifest.
///
/// Neither the name nor the path is unique on its own: one upstream can be
/// checked out at several paths, and remotes can map different repositories
/// onto the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    pub name: String,
    pub path: String,
}

/// A repository pinned by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub repo_name: String,
    pub path: String,
    /// Gitiles host without scheme, e.g. `cos.googlesource.com`.
    pub instance_url: String,
    pub committish: String,
}

impl RepoRef {
    pub fn key(&self) -> RepoKey {
        RepoKey {
            name: self.repo_name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Repositories of one manifest.
pub type RepoMap = HashMap<RepoKey, RepoRef>;

/// A project matched by [`Manifest::find_project`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMatch {
    /// Full project name as it appears in the manifest.
    pub repo_name: String,
    pub revision: String,
    pub remote_url: String,
}

/// A parsed manifest snapshot.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Remote name to host. The default remote is stored under `""`.
    remotes: HashMap<String, String>,
    projects: Vec<Project>,
}

impl Manifest {
    /// Parses a manifest document.
    ///
    /// ## Errors
    ///
    /// Fails on empty content or XML that is not a manifest.
    pub fn parse(content: &str) -> Result<Self, TransportError> {
        if content.trim().is_empty() {
            return Err(TransportError::Decode("manifest file is empty".to_string()));
        }
        let xml: ManifestXml = quick_xml::de::from_str(content)?;

        let mut remotes: HashMap<String, String> = xml
            .remotes
            .into_iter()
            .map(|r| {
                let host = r.fetch.replacen("https://", "", 1);
                (r.name, host.trim_end_matches('/').to_string())
            })
            .collect();
        if let Some(default) = xml.default.and_then(|d| d.remote) {
            let host = remotes.get(&default).cloned().unwrap_or_default();
            remotes.insert(String::new(), host);
        }

        Ok(Self {
            remotes,
            projects: xml.projects,
        })
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Host of the project's remote, falling back to the default remote.
    pub fn remote_url(&self, project: &Project) -> Option<&str> {
        self.remotes
            .get(project.remote.as_deref().unwrap_or(""))
            .map(String::as_str)
            .filter(|host| !host.is_empty())
    }

    /// Maps every project to its pinned [`RepoRef`].
    ///
    /// ## Errors
    ///
    /// Fails when a project names a remote the manifest does not define.
    pub fn repos(&self) -> Result<RepoMap, TransportError> {
        self.projects
            .iter()
            .map(|project| {
                let instance_url = self.remote_url(project).ok_or_else(|| {
                    TransportError::Decode(format!(
                        "project {} references an undefined remote",
                        project.name
                    ))
                })?;
                let repo = RepoRef {
                    repo_name: project.name.clone(),
                    path: project.path().to_string(),
                    instance_url: instance_url.to_string(),
                    committish: project.revision.clone(),
                };
                Ok((repo.key(), repo))
            })
            .collect()
    }

    /// Finds the project whose name contains `project` and which tracks
    /// `branch` (or no branch at all). The last match in document order wins.
    pub fn find_project(&self, project: &str, branch: &str) -> Option<ProjectMatch> {
        let found = self.projects.iter().rev().find(|p| {
            let tracked = p.branch();
            p.name.contains(project) && (tracked.is_empty() || tracked == branch)
        })?;
        if found.revision.is_empty() {
            return None;
        }
        Some(ProjectMatch {
            repo_name: found.name.clone(),
            revision: found.revision.clone(),
            remote_url: self.remote_url(found)?.to_string(),
        })
    }
}

/// Downloads the manifest snapshot tagged `build_number`.
pub async fn download(
    client: &GitilesClient,
    manifest_repo: &str,
    build_number: &str,
) -> Result<String, TransportError> {
    client
        .download_file(
            manifest_repo,
            &format!("refs/tags/{build_number}"),
            MANIFEST_FILE,
        )
        .await
}

/// Resolves the repositories pinned by build `build_number`.
///
/// `build_input` is what the user typed; a missing build is reported with it
/// rather than with the normalised build number.
pub async fn resolve(
    client: &GitilesClient,
    manifest_repo: &str,
    build_input: &str,
    build_number: &str,
) -> Result<RepoMap, ChangelogError> {
    tracing::debug!(build_number, manifest_repo, "retrieving manifest");
    let content = download(client, manifest_repo, build_number)
        .await
        .map_err(|err| {
            tracing::warn!(build_number, %err, "manifest download failed");
            ChangelogError::from_transport(err, || ChangelogError::BuildNotFound {
                input: build_input.to_string(),
            })
        })?;

    Manifest::parse(&content)
        .and_then(|manifest| manifest.repos())
        .map_err(|err| {
            ChangelogError::internal(format!("manifest for build {build_number}: {err}"))
        })
}
