//! Error types for changelog and find-build operations.
//!
//! Two layers:
//! - [`TransportError`] - failures talking to Gitiles or Gerrit. Keeps the HTTP
//!   status so callers can tell a missing revision from a broken connection.
//! - [`ChangelogError`] - the domain error handed to callers. Every variant has a
//!   fixed [`ErrorKind`], HTTP-like status code, header and retryability, so web
//!   handlers and the CLI can report it without inspecting message text.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// Failures from the Gitiles/Gerrit REST transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The body was not in the expected encoding.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// JSON body could not be parsed.
    #[error("failed to parse JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// XML document could not be parsed.
    #[error("failed to parse XML: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// A request URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl TransportError {
    /// Returns the HTTP status of the failed request, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` when the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns `true` when the server refused access.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

/// Category of a [`ChangelogError`], used for control flow instead of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// A build (or both builds) could not be found.
    BuildNotFound,
    /// No CL matches the identifier on the queried review host.
    ClNotFound,
    /// The caller may not read the requested resource.
    PermissionDenied,
    /// The request carried no usable credentials.
    Unauthenticated,
    /// The input could not be interpreted.
    InvalidInput,
    /// The CL exists but has not been submitted.
    ClNotSubmitted,
    /// The CL is newer than every manifest snapshot.
    ClTooRecent,
    /// No candidate build uses the CL's repository and branch.
    ClNotUsed,
    /// The CL's commit was not found between candidate builds.
    ClLandingNotFound,
    /// The CL's release branch does not exist in the manifest repository.
    ClInvalidRelease,
    /// The upstream service is rate limiting.
    TooManyRequests,
    /// Anything else.
    Internal,
}

/// Domain error returned by [`changelog`](crate::changelog::changelog) and
/// [`find_build`](crate::findbuild::find_build).
///
/// `Display` renders the human-readable description; [`header`](Self::header)
/// gives the short title shown above it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangelogError {
    /// A single build could not be found. Carries the user's original input.
    #[error(
        "The build associated with input {input} cannot be found. Please input a valid build number (example: 13310.1035.0) or a valid image name (example: cos-rc-85-13310-1034-0)."
    )]
    BuildNotFound {
        /// The build number or image name as typed by the user.
        input: String,
    },

    /// Neither build could be found.
    #[error(
        "The builds associated with input {source_input} and {target_input} cannot be found. Please input valid build numbers (example: 13310.1035.0) or valid image names (example: cos-rc-85-13310-1034-0)."
    )]
    BothBuildsNotFound {
        /// Source build as typed by the user.
        source_input: String,
        /// Target build as typed by the user.
        target_input: String,
        /// Source build number after image-name resolution.
        source_build: String,
        /// Target build number after image-name resolution.
        target_build: String,
        /// Comparison tool to link to, if one is configured.
        comparison_url: Option<String>,
    },

    /// Access to the repository or review host was refused.
    #[error(
        "This account does not have access to internal repositories. Please retry with an authorized account."
    )]
    PermissionDenied,

    /// The request was not authenticated.
    #[error("The request could not be authenticated. Please provide valid credentials and try again.")]
    Unauthenticated,

    /// Input that cannot be interpreted.
    #[error("{0}")]
    InvalidInput(String),

    /// No CL matches the identifier.
    #[error(
        "No CL was found matching the identifier: {cl}. Please enter either the CL-number (example: 3206) or a Commit-SHA (example: I7e549d7753cc7acec2b44bb5a305347a97719ab9) of a submitted CL."
    )]
    ClNotFound {
        /// CL identifier as supplied.
        cl: String,
    },

    /// The CL has not been submitted.
    #[error(
        "CL {cl} has not been submitted yet. A CL will not enter any build until it is successfully submitted."
    )]
    ClNotSubmitted {
        /// CL number.
        cl: String,
        /// Review host the CL lives on.
        instance_url: String,
    },

    /// The CL is newer than the most recent manifest snapshot.
    #[error(
        "CL {cl} was submitted too recently to be included in any builds. Please wait a couple hours and try again."
    )]
    ClTooRecent {
        /// CL number.
        cl: String,
        /// Review host the CL lives on.
        instance_url: String,
    },

    /// No build in the search window uses the CL's repository and branch.
    #[error(
        "CL {cl} modifies the {project} repository on the {release} branch, which has not been used in COS builds since the CL's submission."
    )]
    ClNotUsed {
        /// CL number.
        cl: String,
        /// Repository the CL modifies.
        project: String,
        /// Release branch the CL maps to.
        release: String,
        /// Review host the CL lives on.
        instance_url: String,
    },

    /// The CL's commit was not found in the changelog between candidate builds.
    #[error("No build was found containing CL {cl}.")]
    ClLandingNotFound {
        /// CL number.
        cl: String,
        /// Review host the CL lives on.
        instance_url: String,
    },

    /// The CL maps to a release branch missing from the manifest repository.
    #[error("CL {cl} maps to release {release}, which is not a valid release.")]
    ClInvalidRelease {
        /// CL number.
        cl: String,
        /// Release branch the CL maps to.
        release: String,
        /// Review host the CL lives on.
        instance_url: String,
    },

    /// The upstream service is rate limiting.
    #[error("Our servers are currently experiencing heavy load. Please retry in a couple minutes.")]
    TooManyRequests,

    /// Unexpected failure. The detail is for logs, not for display.
    #[error("An unexpected error occurred while retrieving the requested information.")]
    Internal(String),
}

impl ChangelogError {
    /// Creates an internal error, logging the detail.
    pub fn internal(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(%detail, "internal error");
        Self::Internal(detail)
    }

    /// Maps a transport failure to a domain error.
    ///
    /// Status codes with a generic meaning (401, 403, 429) map directly. A 404
    /// becomes whatever `not_found` builds, since only the caller knows what was
    /// missing. Everything else is internal.
    pub fn from_transport(err: TransportError, not_found: impl FnOnce() -> Self) -> Self {
        match err.status() {
            Some(401) => Self::Unauthenticated,
            Some(403) => Self::PermissionDenied,
            Some(404) => not_found(),
            Some(429) => Self::TooManyRequests,
            _ => Self::internal(err.to_string()),
        }
    }

    /// Returns the error's category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BuildNotFound { .. } | Self::BothBuildsNotFound { .. } => {
                ErrorKind::BuildNotFound
            }
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ClNotFound { .. } => ErrorKind::ClNotFound,
            Self::ClNotSubmitted { .. } => ErrorKind::ClNotSubmitted,
            Self::ClTooRecent { .. } => ErrorKind::ClTooRecent,
            Self::ClNotUsed { .. } => ErrorKind::ClNotUsed,
            Self::ClLandingNotFound { .. } => ErrorKind::ClLandingNotFound,
            Self::ClInvalidRelease { .. } => ErrorKind::ClInvalidRelease,
            Self::TooManyRequests => ErrorKind::TooManyRequests,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code a web handler should answer with.
    pub fn http_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BuildNotFound | ErrorKind::ClNotFound => 404,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::InvalidInput => 400,
            ErrorKind::ClNotSubmitted
            | ErrorKind::ClTooRecent
            | ErrorKind::ClNotUsed
            | ErrorKind::ClLandingNotFound
            | ErrorKind::ClInvalidRelease => 406,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::Internal => 500,
        }
    }

    /// Full HTTP status line, e.g. `404 Not Found`.
    pub fn http_status(&self) -> &'static str {
        match self.http_code() {
            400 => "400 Bad Request",
            401 => "401 Unauthorized",
            403 => "403 Forbidden",
            404 => "404 Not Found",
            406 => "406 Not Acceptable",
            429 => "429 Too Many Requests",
            _ => "500 Internal Server Error",
        }
    }

    /// Short title for the error.
    pub fn header(&self) -> &'static str {
        match self.kind() {
            ErrorKind::BuildNotFound => "Build Not Found",
            ErrorKind::ClNotFound => "CL Not Found",
            ErrorKind::PermissionDenied => "Permission Denied",
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::InvalidInput => "Invalid Input",
            ErrorKind::ClNotSubmitted => "CL Not Submitted",
            ErrorKind::ClTooRecent => "CL Too Recent",
            ErrorKind::ClNotUsed => "CL Not Used",
            ErrorKind::ClLandingNotFound => "No Build Found",
            ErrorKind::ClInvalidRelease => "Invalid Release Branch",
            ErrorKind::TooManyRequests => "Too Many Requests",
            ErrorKind::Internal => "Internal Error",
        }
    }

    /// Whether a wider find-build search window might resolve the error.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ClTooRecent | ErrorKind::ClNotUsed | ErrorKind::ClLandingNotFound
        )
    }
}

impl Serialize for ChangelogError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ChangelogError", 6)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("code", &self.http_code())?;
        state.serialize_field("status", self.http_status())?;
        state.serialize_field("header", self.header())?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("retryable", &self.retryable())?;
        state.end()
    }
}
