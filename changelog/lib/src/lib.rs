//! Changelogs between COS builds, and the first build containing a CL.
//!
//! Builds are described by manifest snapshots stored in a Gitiles
//! repository, one tag per build. CLs are looked up on Gerrit.
//!
//! ## Changelogs
//!
//! - [`changelog::changelog`] - commits added and removed between two builds
//! - [`changelog::RepoLog`] - the commits of one repository
//! - [`changelog::resolve_image_name`] - image name to build number
//!
//! ## Find build
//!
//! - [`findbuild::find_build`] - first build containing a CL
//! - [`findbuild::find_build_with_fallback`] - retries on a second Gerrit host
//!   when the first does not know the CL
//!
//! ## Building blocks
//!
//! - [`manifest`] - manifest snapshot parsing and resolution
//! - [`commits::fetch_commits`] - paged commit ranges
//! - [`gitiles::GitilesClient`] and [`gerrit::GerritClient`] - REST clients
//!
//! ## Errors
//!
//! Every operation returns [`ChangelogError`], whose [`ErrorKind`], HTTP code
//! and retryability are fixed per variant.

pub mod changelog;
pub mod commit;
pub mod commits;
pub mod config;
pub mod error;
pub mod findbuild;
pub mod gerrit;
pub mod gitiles;
pub mod http;
pub mod manifest;
mod task;

pub use changelog::{Changelog, RepoLog, RepoLogs};
pub use commit::Commit;
pub use config::Config;
pub use error::{ChangelogError, ErrorKind, TransportError};
pub use findbuild::{BuildRequest, BuildResponse};
pub use http::build_http_client;
