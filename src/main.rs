//! Branch Composer - rebuild a branch as upstream plus squashed pull requests

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use branch_composer::compose::{ComposeError, Preflight};
use branch_composer::config::Config;
use branch_composer::git::{self, Git};
use branch_composer::{Composer, GitBackend, Plan, Summary, changeset};

/// Environment variable holding a tracing filter, e.g. `debug`
const LOG_ENV: &str = "BRANCH_COMPOSER_LOG";

/// Rebuild a branch as upstream plus a curated list of squashed pull requests
#[derive(Parser)]
#[command(name = "branch-composer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH", env = "BRANCH_COMPOSER_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset the base branch to upstream and apply every change-set
    Compose(RunArgs),
    /// Fetch and resolve every ref without changing any branch
    Check(RunArgs),
    /// Show the effective configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,

        /// Write the default configuration if no config file exists
        #[arg(long, conflicts_with = "path")]
        init: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Branch to rebuild
    #[arg(long, value_name = "BRANCH")]
    base: Option<String>,

    /// Remote holding upstream and the pull request heads
    #[arg(long, value_name = "NAME")]
    upstream_remote: Option<String>,

    /// Upstream branch to reset the base to
    #[arg(long, value_name = "NAME")]
    upstream_branch: Option<String>,

    /// Comma-separated change-sets to apply, in order (e.g. 5432,2186)
    #[arg(long, value_name = "IDS", env = "BRANCH_COMPOSER_CHANGESETS")]
    changesets: Option<String>,

    /// Scratch branch used while integrating each change-set
    #[arg(long, value_name = "BRANCH")]
    working_branch: Option<String>,

    /// Use the refs already fetched instead of fetching first
    #[arg(long)]
    no_fetch: bool,

    /// Run even if the working tree has local changes (they are discarded)
    #[arg(long)]
    allow_dirty: bool,

    /// Repository to operate on (defaults to the current directory)
    #[arg(long, value_name = "PATH")]
    repo: Option<PathBuf>,
}

impl RunArgs {
    /// Layer command line values over the loaded configuration
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(base) = &self.base {
            config.base_branch.clone_from(base);
        }
        if let Some(remote) = &self.upstream_remote {
            config.upstream_remote.clone_from(remote);
        }
        if let Some(branch) = &self.upstream_branch {
            config.upstream_branch.clone_from(branch);
        }
        if let Some(working) = &self.working_branch {
            config.working_branch.clone_from(working);
        }
        if let Some(list) = &self.changesets {
            config.changesets =
                changeset::parse_list(list).context("Invalid --changesets value")?;
        }
        Ok(())
    }

    /// Resolve configuration, plan and backend for a run
    fn prepare(&self, config_path: &Path) -> Result<(Plan, Composer<GitBackend>)> {
        let mut config = Config::load_or_default(config_path)?;
        self.apply(&mut config)?;

        let start = match &self.repo {
            Some(repo) => repo.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let root = git::repository_root(&start)?;
        tracing::debug!(repo = %root.display(), config = %config_path.display(), "Prepared run");

        let git = Git::new(root)
            .with_program(&config.git_program)?
            .with_identity(config.identity.clone());
        let backend =
            GitBackend::new(git).with_conflict_marker_check(config.check_conflict_markers);

        let mut plan = config.plan();
        plan.fetch = !self.no_fetch;
        plan.allow_dirty = self.allow_dirty;
        Ok((plan, Composer::new(backend)))
    }
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Let --help and --version exit normally
            if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                e.exit();
            }
            eprintln!("error: {e}");
            Cli::command().print_help()?;
            std::process::exit(2);
        }
    };

    init_logging(cli.verbose, cli.log_file.as_deref())?;
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match &cli.command {
        Commands::Compose(args) => cmd_compose(args, &config_path),
        Commands::Check(args) => cmd_check(args, &config_path),
        Commands::Config { path, init } => cmd_config(&config_path, *path, *init),
    }
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, name);
            tracing_subscriber::fmt()
                .with_writer(file_appender)
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .with_target(false)
                .without_time()
                .init();
        }
    }
    Ok(())
}

fn cmd_compose(args: &RunArgs, config_path: &Path) -> Result<()> {
    let (plan, mut composer) = args.prepare(config_path)?;
    match composer.compose(&plan) {
        Ok(summary) => {
            print_summary(&plan, &summary);
            Ok(())
        }
        Err(e) => fail(&e),
    }
}

fn cmd_check(args: &RunArgs, config_path: &Path) -> Result<()> {
    let (plan, mut composer) = args.prepare(config_path)?;
    match composer.check(&plan) {
        Ok(preflight) => {
            print_preflight(&preflight);
            Ok(())
        }
        Err(e) => fail(&e),
    }
}

fn cmd_config(config_path: &Path, show_path: bool, init: bool) -> Result<()> {
    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }
    if init {
        if config_path.exists() {
            println!("Config already exists at {}", config_path.display());
        } else {
            Config::default().save_to(config_path)?;
            println!("Wrote default config to {}", config_path.display());
        }
        return Ok(());
    }

    let config = Config::load_or_default(config_path)?;
    let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{json}");
    Ok(())
}

fn print_summary(plan: &Plan, summary: &Summary) {
    println!(
        "Reset {} to {} ({})",
        summary.base_branch,
        plan.upstream,
        summary.upstream_commit.short()
    );
    let total = summary.integrated.len();
    for (i, integrated) in summary.integrated.iter().enumerate() {
        println!(
            "  [{}/{total}] {} -> {}",
            i + 1,
            integrated.changeset,
            integrated.commit.short()
        );
    }
    println!(
        "Composed {}: {total} change-set(s) on top of {}",
        summary.base_branch, plan.upstream
    );
}

fn print_preflight(preflight: &Preflight) {
    println!(
        "{} -> {}",
        preflight.upstream,
        preflight.upstream_commit.short()
    );
    for head in &preflight.heads {
        println!("  {} -> {}", head.changeset, head.head.short());
    }
    println!("All {} change-set head(s) resolved", preflight.heads.len());
}

/// Report a failed run on stderr and exit non-zero
fn fail(error: &ComposeError) -> ! {
    eprintln!("error: {error}");
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = std::error::Error::source(cause);
    }
    if let Some(step) = error.step() {
        eprintln!("  step: {step}");
    }
    if let Some(position) = error.position() {
        eprintln!("  failed at: {position}");
    }
    std::process::exit(1);
}
