//! Changelog CLI - changelogs between COS builds and the first build containing a CL

use std::path::{Path, PathBuf};

use changelog_lib::changelog::changelog;
use changelog_lib::findbuild::{BuildRequest, find_build_with_fallback};
use changelog_lib::http::ACCESS_TOKEN_ENV;
use changelog_lib::{ChangelogError, Config, RepoLogs, TransportError, build_http_client};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "changelog", version)]
#[command(about = "Changelogs between COS builds and the first build containing a CL", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    log_verbosity: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Gerrit host queried for CLs
    #[arg(long, global = true, value_name = "HOST")]
    gerrit: Option<String>,

    /// Gerrit host retried when the primary host does not know the CL
    #[arg(long, global = true, value_name = "HOST")]
    fallback: Option<String>,

    /// Gitiles host serving the manifest repository
    #[arg(long, global = true, value_name = "HOST")]
    gob: Option<String>,

    /// Manifest snapshot repository
    #[arg(short = 'r', long, global = true, value_name = "REPO")]
    repo: Option<String>,

    /// Repository prefix used for CLs found on the fallback host
    #[arg(short = 'p', long, global = true, value_name = "PREFIX")]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the changelog between two builds as JSON
    ///
    /// Produces two files in the output directory: "<SOURCE> -> <TARGET>.json"
    /// with the commits TARGET adds, and "<TARGET> -> <SOURCE>.json" with the
    /// commits it removes.
    Changelog {
        /// Source build number or image name (e.g. 15000.0.0, cos-dev-89-15000-0-0)
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Target build number or image name
        #[arg(value_name = "TARGET")]
        target: String,

        /// Maximum commits listed per repository [default: unlimited]
        #[arg(long, value_name = "N")]
        query_size: Option<usize>,

        /// Directory the JSON files are written to
        #[arg(long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },

    /// Print the first build containing a CL
    Findbuild {
        /// CL number or full commit SHA
        #[arg(value_name = "CL")]
        cl: String,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    fn config(&self, mut config: Config) -> Config {
        if let Some(host) = &self.gerrit {
            config.gerrit_host = host.clone();
        }
        if let Some(host) = &self.fallback {
            config.fallback_gerrit_host = host.clone();
        }
        if let Some(host) = &self.gob {
            config.gitiles_host = host.clone();
        }
        if let Some(repo) = &self.repo {
            config.manifest_repo = repo.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.fallback_repo_prefix = prefix.clone();
        }
        if let Commands::Changelog {
            query_size: Some(size),
            ..
        } = &self.command
        {
            config.query_size = Some(*size);
        }
        config
    }
}

#[derive(Debug, Error)]
enum CliError {
    /// The library rejected the request.
    #[error("{header}: {0}", header = .0.header())]
    Changelog(#[from] ChangelogError),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] TransportError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize changelog: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Log filter for a `-v` count. A `RUST_LOG` value takes precedence.
///
/// Other crates stay at `warn` whatever the verbosity.
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    if let Some(filter) = rust_log.and_then(|f| EnvFilter::try_new(f).ok()) {
        return filter;
    }
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::new(format!("warn,changelog_lib={level},changelog={level}"))
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing(verbose: u8, json: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let registry = tracing_subscriber::registry().with(log_filter(verbose, rust_log.as_deref()));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2);
    if json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer.compact()).init();
    }
}

fn write_logs(dir: &Path, from: &str, to: &str, logs: &RepoLogs) -> Result<PathBuf, CliError> {
    let path = dir.join(format!("{from} -> {to}.json"));
    let body = serde_json::to_string_pretty(logs)?;
    std::fs::write(&path, body).map_err(|source| CliError::Write {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), repos = logs.len(), "wrote changelog");
    Ok(path)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.config(Config::from_env());
    let token = std::env::var(ACCESS_TOKEN_ENV).ok().filter(|t| !t.is_empty());
    if token.is_none() {
        tracing::debug!("{ACCESS_TOKEN_ENV} not set, sending anonymous requests");
    }
    let http = build_http_client(token.as_deref(), config.request_timeout)?;

    match cli.command {
        Commands::Changelog {
            source,
            target,
            output_dir,
            ..
        } => {
            let result = changelog(&http, &source, &target, &config, None).await?;
            std::fs::create_dir_all(&output_dir).map_err(|source| CliError::Write {
                path: output_dir.clone(),
                source,
            })?;
            let additions = write_logs(&output_dir, &source, &target, &result.additions)?;
            let removals = write_logs(&output_dir, &target, &source, &result.removals)?;
            println!("Additions: {}", additions.display());
            println!("Removals: {}", removals.display());
        }

        Commands::Findbuild { cl } => {
            let primary = BuildRequest::new(&config, &cl);
            let fallback = BuildRequest::fallback(&config, &cl);
            let (found, used_fallback) = find_build_with_fallback(&http, &primary, &fallback).await?;
            if used_fallback {
                tracing::info!(host = %fallback.gerrit_host, "CL found on fallback host");
            }
            println!("Build: {}", found.build_number);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_verbosity, cli.json);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
