//! Commit records.
//!
//! [`GitCommit`] mirrors the JSON Gitiles returns for a log entry.
//! [`Commit`] is the normalised projection handed to callers, with the subject,
//! bug references and release note pulled out of the commit message.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

const BUG_LINE_PREFIX: &str = "BUG=";
const RELEASE_NOTE_LINE_PREFIX: &str = "RELEASE_NOTE=";

/// Recognised bug reference prefixes and what they normalise to.
/// A token matching none of these is dropped.
static BUG_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("^b/", "b/"),
        ("^b:", "b/"),
        ("^chromium.*:", "crbug/"),
        ("^chrome.*:", "crbug/"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

/// Author or committer of a Gitiles commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GitUser {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// Author or commit time.
    #[serde(default, deserialize_with = "deserialize_gitiles_time")]
    pub time: Option<DateTime<Utc>>,
}

/// A commit as returned by the Gitiles log endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GitCommit {
    /// Full commit SHA.
    #[serde(rename = "commit")]
    pub id: String,
    /// Parent SHAs.
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub author: Option<GitUser>,
    #[serde(default)]
    pub committer: Option<GitUser>,
    /// Full commit message.
    #[serde(default)]
    pub message: String,
}

impl GitCommit {
    /// Commit time reported by the committer, if any.
    pub fn commit_time(&self) -> Option<DateTime<Utc>> {
        self.committer.as_ref().and_then(|c| c.time)
    }
}

/// Parses Gitiles' `Tue Sep 01 17:48:37 2020 +0000` timestamps.
///
/// The zone offset is optional; without it the time is taken as UTC.
pub fn parse_gitiles_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y %z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn deserialize_gitiles_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_gitiles_time(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognised commit time: {s}"))),
    }
}

/// Normalised view of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    /// The literal `"None"` when Gitiles did not report an author.
    pub author_name: String,
    pub committer_name: String,
    /// First line of the commit message.
    pub subject: String,
    /// Normalised bug references such as `b/123` or `crbug/456`.
    pub bugs: Vec<String>,
    pub release_note: String,
    pub commit_time: Option<DateTime<Utc>>,
}

impl Commit {
    /// Commit time in RFC 1123 form, or `None` when unknown.
    pub fn commit_time_rfc1123(&self) -> String {
        match self.commit_time {
            Some(t) => t.format("%a, %d %b %Y %H:%M:%S UTC").to_string(),
            None => "None".to_string(),
        }
    }
}

impl From<&GitCommit> for Commit {
    fn from(commit: &GitCommit) -> Self {
        let name = |user: &Option<GitUser>| {
            user.as_ref()
                .map(|u| u.name.clone())
                .unwrap_or_else(|| "None".to_string())
        };
        Self {
            sha: commit.id.clone(),
            author_name: name(&commit.author),
            committer_name: name(&commit.committer),
            subject: subject(&commit.message).to_string(),
            bugs: bugs(&commit.message),
            release_note: release_note(&commit.message).to_string(),
            commit_time: commit.commit_time(),
        }
    }
}

/// First line of a commit message.
pub fn subject(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

/// Extracts normalised bug references from the first `BUG=` line.
///
/// ## Examples
///
/// ```
/// use changelog_lib::commit::bugs;
///
/// assert_eq!(bugs("Fix\n\nBUG=chromium:1097995"), vec!["crbug/1097995"]);
/// assert_eq!(bugs("Fix\n\nBUG=b/123,notabug,-1"), vec!["b/123"]);
/// assert!(bugs("Fix").is_empty());
/// ```
pub fn bugs(message: &str) -> Vec<String> {
    let Some(bug_line) = message
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(BUG_LINE_PREFIX))
    else {
        return Vec::new();
    };

    bug_line[BUG_LINE_PREFIX.len()..]
        .split(',')
        .map(str::trim)
        .filter_map(|bug| {
            BUG_PATTERNS.iter().find_map(|(pattern, replacement)| {
                pattern
                    .find(bug)
                    .map(|m| format!("{replacement}{}", &bug[m.end()..]))
            })
        })
        .collect()
}

/// Text following the first `RELEASE_NOTE=` line, or an empty string.
pub fn release_note(message: &str) -> &str {
    message
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(RELEASE_NOTE_LINE_PREFIX))
        .unwrap_or("")
}

/// Converts a Gitiles log into normalised commits, preserving order.
pub fn parse_commit_log(log: &[GitCommit]) -> Vec<Commit> {
    log.iter().map(Commit::from).collect()
}
