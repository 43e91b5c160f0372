use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use clovr::cli::{self, NodeSelector};
use clovr::config::Config;
use clovr::history::{BuildId, BuildOutcome, Builds};
use clovr::publish::PublishRequest;
use clovr::target::CoverageTarget;
use clovr::{cache, db, logging};

/// clovr — Clover coverage reports per build, with health scores and trends.
#[derive(Parser)]
#[command(name = "clovr", version, about)]
struct Cli {
    /// Path to the SQLite database (default: ./.clovr.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Configuration file (default: ./clovr.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory archived reports are copied to (default: ./.clovr)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level for clovr itself; RUST_LOG takes precedence.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new build.
    NewBuild {
        /// Build number. Defaults to one past the latest build.
        #[arg(long)]
        number: Option<u64>,
    },

    /// Record the outcome of a build (success, unstable, failure).
    Finish {
        build: u64,
        outcome: BuildOutcome,
    },

    /// Publish a Clover XML report onto a build.
    Publish {
        /// Build to attach the report to.
        #[arg(long)]
        build: u64,

        /// Workspace the report was produced in.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Report directory, relative to the workspace.
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,

        /// Report file name (default: clover.xml).
        #[arg(long)]
        file_name: Option<String>,

        /// Report id. Assigned automatically when omitted.
        #[arg(long)]
        id: Option<String>,

        /// Healthy target, e.g. "m=70,c=80,s=80".
        #[arg(long)]
        healthy: Option<CoverageTarget>,

        /// Unhealthy target, e.g. "m=0,c=0,s=0".
        #[arg(long)]
        unhealthy: Option<CoverageTarget>,

        /// Failing target. Any metric below it marks the build unstable.
        #[arg(long)]
        failing: Option<CoverageTarget>,
    },

    /// List builds and their reports.
    Reports,

    /// Show the coverage summary of a report.
    Summary {
        /// Build number. If omitted, uses the latest build.
        #[arg(long)]
        build: Option<u64>,

        /// Report id. If omitted, uses the unnamed report.
        #[arg(long)]
        id: Option<String>,
    },

    /// Show the health score of a report.
    Health {
        #[arg(long)]
        build: Option<u64>,

        #[arg(long)]
        id: Option<String>,
    },

    /// List per-package coverage of a report.
    Packages {
        #[arg(long)]
        build: Option<u64>,

        #[arg(long)]
        id: Option<String>,
    },

    /// Show the coverage of a node over earlier builds.
    Trend {
        #[arg(long)]
        build: Option<u64>,

        #[arg(long)]
        id: Option<String>,

        /// Package name.
        #[arg(long)]
        package: Option<String>,

        /// File name, relative to its package.
        #[arg(long)]
        file: Option<String>,

        /// Class name, `<package>.<class>`.
        #[arg(long)]
        class: Option<String>,

        /// Maximum number of builds shown.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = args.db {
        config.db = db;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;
    logging::init(&config.log_level);

    let mut conn = db::open(&config.db).context("Failed to open database")?;
    db::init_schema(&conn).context("Failed to initialize schema")?;
    let cache = cache::global_with_expiry(config.cache.expire_after_access());
    let mut builds = Builds::from_store(&conn, cache).context("Failed to load builds")?;

    let out = match args.command {
        Commands::NewBuild { number } => cli::cmd_new_build(&conn, number)?,
        Commands::Finish { build, outcome } => {
            cli::cmd_finish(&conn, &mut builds, build, outcome)?
        }
        Commands::Publish {
            build,
            workspace,
            report_dir,
            file_name,
            id,
            healthy,
            unhealthy,
            failing,
        } => {
            let workspace = workspace
                .canonicalize()
                .with_context(|| format!("Workspace not found: {}", workspace.display()))?;
            let request = PublishRequest {
                build: BuildId(build),
                workspace,
                report_dir,
                report_file_name: file_name,
                identity: id,
                healthy: config.healthy_target(healthy),
                unhealthy: unhealthy.unwrap_or(config.unhealthy),
                failing: failing.unwrap_or(config.failing),
            };
            cli::cmd_publish(&mut conn, &mut builds, &config.data_dir, &request)?
        }
        Commands::Reports => cli::cmd_reports(&conn)?,
        Commands::Summary { build, id } => cli::cmd_summary(&builds, build, id.as_deref())?,
        Commands::Health { build, id } => cli::cmd_health(&builds, build, id.as_deref())?,
        Commands::Packages { build, id } => cli::cmd_packages(&builds, build, id.as_deref())?,
        Commands::Trend {
            build,
            id,
            package,
            file,
            class,
            limit,
        } => {
            let selector = NodeSelector::from_flags(package, file, class);
            cli::cmd_trend(&builds, build, id.as_deref(), &selector, limit)?
        }
    };
    print!("{out}");
    Ok(())
}
