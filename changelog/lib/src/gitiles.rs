//! Gitiles REST client.
//!
//! Covers the three Gitiles calls the changelog needs: download a file at a
//! ref, list commits in a range (with ancestor exclusion and paging), and list
//! refs under a prefix.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use url::Url;

use crate::commit::GitCommit;
use crate::error::TransportError;
use crate::http::{base_url, get_text, strip_xssi};

/// One page of a Gitiles log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPage {
    /// Commits on this page, newest first.
    pub commits: Vec<GitCommit>,
    /// Token for the next page; `None` when the range is exhausted.
    pub next_page_token: Option<String>,
}

/// Parameters for [`GitilesClient::log`].
#[derive(Debug, Clone, Copy)]
pub struct LogRequest<'a> {
    pub project: &'a str,
    /// Commit, branch or tag to list from.
    pub committish: &'a str,
    /// Exclude commits reachable from this committish. Empty means none.
    pub exclude_ancestors_of: &'a str,
    pub page_token: Option<&'a str>,
    pub page_size: usize,
}

#[derive(Debug, Deserialize)]
struct LogResponse {
    #[serde(default)]
    log: Vec<GitCommit>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefItem {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    peeled: Option<String>,
}

/// Client bound to a single Gitiles host.
///
/// Cloning is cheap; the underlying [`reqwest::Client`] is reference counted.
#[derive(Debug, Clone)]
pub struct GitilesClient {
    http: reqwest::Client,
    host: String,
    base_url: String,
    timeout: Duration,
}

impl GitilesClient {
    /// Creates a client for `host` (e.g. `cos.googlesource.com`).
    pub fn new(http: reqwest::Client, host: &str, timeout: Duration) -> Self {
        Self {
            http,
            host: host.to_string(),
            base_url: base_url(host),
            timeout,
        }
    }

    /// Host this client was created for, as given.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        Ok(Url::parse(&format!("{}/{}", self.base_url, path))?)
    }

    /// Downloads `path` from `project` at `committish` and returns its text.
    pub async fn download_file(
        &self,
        project: &str,
        committish: &str,
        path: &str,
    ) -> Result<String, TransportError> {
        let mut url = self.url(&format!("{project}/+/{committish}/{path}"))?;
        url.query_pairs_mut().append_pair("format", "TEXT");

        let body = get_text(&self.http, url, self.timeout).await?;
        let encoded: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| TransportError::Decode(format!("base64: {e}")))?;
        String::from_utf8(bytes).map_err(|e| TransportError::Decode(format!("utf-8: {e}")))
    }

    /// Lists one page of commits reachable from `committish`, newest first.
    pub async fn log(&self, request: &LogRequest<'_>) -> Result<LogPage, TransportError> {
        let range = if request.exclude_ancestors_of.is_empty() {
            request.committish.to_string()
        } else {
            format!("{}..{}", request.exclude_ancestors_of, request.committish)
        };
        let mut url = self.url(&format!("{}/+log/{range}", request.project))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("format", "JSON");
            query.append_pair("n", &request.page_size.to_string());
            if let Some(token) = request.page_token.filter(|t| !t.is_empty()) {
                query.append_pair("s", token);
            }
        }

        let body = get_text(&self.http, url, self.timeout).await?;
        let response: LogResponse = serde_json::from_str(strip_xssi(&body))?;
        Ok(LogPage {
            commits: response.log,
            next_page_token: response.next.filter(|t| !t.is_empty()),
        })
    }

    /// Lists refs under `refs_path` (e.g. `refs/tags`), mapping full ref names
    /// to the commit they point at.
    ///
    /// Annotated tags resolve to the peeled commit. Symbolic refs are skipped.
    pub async fn refs(
        &self,
        project: &str,
        refs_path: &str,
    ) -> Result<HashMap<String, String>, TransportError> {
        let refs_path = refs_path.trim_end_matches('/');
        let mut url = self.url(&format!("{project}/+{refs_path}"))?;
        url.query_pairs_mut().append_pair("format", "JSON");

        let body = get_text(&self.http, url, self.timeout).await?;
        let items: HashMap<String, RefItem> = serde_json::from_str(strip_xssi(&body))?;

        let refs = items
            .into_iter()
            .filter_map(|(name, item)| {
                let sha = item.peeled.or(item.value)?;
                // Gitiles drops the listed prefix from each name unless it is `refs`.
                let name = if refs_path == "refs" {
                    name
                } else {
                    format!("{refs_path}/{name}")
                };
                Some((name, sha))
            })
            .collect();
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GitilesClient {
        GitilesClient::new(
            reqwest::Client::new(),
            &server.uri(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_download_file_decodes_base64() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cos/manifest-snapshots/+/refs/tags/15000.0.0/snapshot.xml"))
            .and(query_param("format", "TEXT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(STANDARD.encode("<manifest/>")))
            .mount(&server)
            .await;

        let contents = client(&server)
            .download_file("cos/manifest-snapshots", "refs/tags/15000.0.0", "snapshot.xml")
            .await
            .unwrap();
        assert_eq!(contents, "<manifest/>");
    }

    #[tokio::test]
    async fn test_download_file_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server)
            .download_file("cos/manifest-snapshots", "refs/tags/1.0.0", "snapshot.xml")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_file_rejects_non_base64() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<<not base64>>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .download_file("repo", "main", "file")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_log_range_and_paging() {
        let server = MockServer::start().await;
        let body = r#")]}'
{
  "log": [
    {"commit": "c3", "message": "three", "committer": {"name": "x", "email": "x", "time": "Tue Sep 01 17:48:37 2020"}},
    {"commit": "c2", "message": "two"}
  ],
  "next": "c1"
}"#;
        Mock::given(method("GET"))
            .and(path("/third_party/kernel/+log/s1..s2"))
            .and(query_param("format", "JSON"))
            .and(query_param("n", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let page = client(&server)
            .log(&LogRequest {
                project: "third_party/kernel",
                committish: "s2",
                exclude_ancestors_of: "s1",
                page_token: None,
                page_size: 2,
            })
            .await
            .unwrap();
        let ids: Vec<&str> = page.commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c2"]);
        assert_eq!(page.next_page_token.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_log_without_ancestor_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo/+log/refs/heads/release-R85"))
            .and(query_param("s", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{\"log\": []}"))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&server)
            .log(&LogRequest {
                project: "repo",
                committish: "refs/heads/release-R85",
                exclude_ancestors_of: "",
                page_token: Some("tok"),
                page_size: 100,
            })
            .await
            .unwrap();
        assert!(page.commits.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_refs_reprefixes_and_peels() {
        let server = MockServer::start().await;
        let body = r#")]}'
{
  "15000.0.0": {"value": "tagobj", "peeled": "commit1"},
  "15001.0.0": {"value": "commit2"},
  "HEAD": {"target": "refs/heads/master"}
}"#;
        Mock::given(method("GET"))
            .and(path("/cos/manifest-snapshots/+refs/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let refs = client(&server)
            .refs("cos/manifest-snapshots", "refs/tags/")
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs["refs/tags/15000.0.0"], "commit1");
        assert_eq!(refs["refs/tags/15001.0.0"], "commit2");
    }

    #[test]
    fn test_host_is_kept_verbatim() {
        let client = GitilesClient::new(
            reqwest::Client::new(),
            "cos.googlesource.com",
            Duration::from_secs(1),
        );
        assert_eq!(client.host(), "cos.googlesource.com");
        assert_eq!(client.base_url, "https://cos.googlesource.com");
    }
}
