//! Gerrit change query client.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::TransportError;
use crate::http::{base_url, get_text, strip_xssi};

/// The subset of Gerrit's `ChangeInfo` used to locate a CL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeInfo {
    /// Numeric change id.
    #[serde(rename = "_number")]
    pub number: u64,
    /// Project the change targets, e.g. `cos/tools`.
    pub project: String,
    /// Destination branch without the `refs/heads/` prefix.
    pub branch: String,
    /// SHA of the current patch set. Only present with `o=CURRENT_REVISION`.
    #[serde(default)]
    pub current_revision: Option<String>,
    /// Submission time; absent for unsubmitted changes.
    #[serde(default, deserialize_with = "deserialize_gerrit_time")]
    pub submitted: Option<DateTime<Utc>>,
}

/// Parses Gerrit's `2020-09-01 17:48:37.000000000` UTC timestamps.
pub fn parse_gerrit_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_gerrit_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_gerrit_time(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognised Gerrit time: {s}"))),
    }
}

/// Client bound to one Gerrit host.
#[derive(Debug, Clone)]
pub struct GerritClient {
    http: reqwest::Client,
    host: String,
    base_url: String,
    timeout: Duration,
}

impl GerritClient {
    pub fn new(http: reqwest::Client, host: &str, timeout: Duration) -> Self {
        Self {
            http,
            host: host.to_string(),
            base_url: base_url(host),
            timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs a change query, returning at most `limit` changes with their
    /// current revision.
    pub async fn query_changes(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChangeInfo>, TransportError> {
        let mut url = Url::parse(&format!("{}/changes/", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("o", "CURRENT_REVISION")
            .append_pair("n", &limit.to_string());

        let body = get_text(&self.http, url, self.timeout).await?;
        Ok(serde_json::from_str(strip_xssi(&body))?)
    }
}
