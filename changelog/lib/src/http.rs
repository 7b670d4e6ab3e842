//! Authenticated HTTP transport shared by the Gitiles and Gerrit clients.
//!
//! The library never builds credentials on its own. Callers hand in a
//! [`reqwest::Client`]; [`build_http_client`] is a convenience for callers that
//! hold a bearer token.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::TransportError;

/// User agent sent on every request.
pub const USER_AGENT_VALUE: &str = concat!("changelog-lib/", env!("CARGO_PKG_VERSION"));

/// Environment variable holding an OAuth2 access token with Gerrit scope.
pub const ACCESS_TOKEN_ENV: &str = "CHANGELOG_ACCESS_TOKEN";

/// Gerrit and Gitiles prefix JSON bodies with this line to defeat XSSI.
pub(crate) const XSSI_PREFIX: &str = ")]}'";

/// Builds a client that sends `Authorization: Bearer <token>` on every request.
///
/// ## Errors
///
/// Returns an error if the token is not a valid header value or the client
/// cannot be constructed.
pub fn build_http_client(
    token: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    if let Some(token) = token {
        let mut value = HeaderValue::try_from(format!("Bearer {token}"))
            .map_err(|e| TransportError::Decode(format!("invalid access token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .pool_max_idle_per_host(10)
        .build()?;
    Ok(client)
}

/// Normalises a host into a base URL, adding `https://` when no scheme is given.
///
/// Manifests list remotes without a scheme, while tests point at plain-HTTP
/// mock servers, so an explicit scheme is always kept.
pub(crate) fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Removes the XSSI guard line from a JSON body.
pub(crate) fn strip_xssi(body: &str) -> &str {
    body.trim_start()
        .strip_prefix(XSSI_PREFIX)
        .unwrap_or(body)
        .trim_start()
}

/// Sends a GET request and returns the body of a successful response.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    url: url::Url,
    timeout: Duration,
) -> Result<String, TransportError> {
    tracing::trace!(%url, "GET");
    let response = client.get(url.clone()).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response.text().await?)
}
