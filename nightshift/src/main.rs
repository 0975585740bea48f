//! Unattended nightly code-modification runs.
//!
//! `nightshift run` executes one full pipeline in the current repository and
//! leaves the result on a date-scoped branch. `init` scaffolds the
//! `.nightshift/` directory; `check` is an offline preflight for cron setups.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use nightshift::io::config::{
    API_KEY_VAR, Config, ConfigError, Secrets, WEBHOOK_URL_VAR, load_config, write_config,
};
use nightshift::io::git::Git;
use nightshift::io::model::GeminiClient;
use nightshift::io::notify::{NoopNotifier, WebhookNotifier};
use nightshift::io::validation::CommandValidationRunner;
use nightshift::io::workspace::ensure_ignore_rules;
use nightshift::run::{branch_name, run_pipeline};
use nightshift::session::SessionError;
use nightshift::{exit_codes, logging};

#[derive(Parser)]
#[command(
    name = "nightshift",
    version,
    about = "Unattended nightly code-modification runs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.nightshift/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Offline preflight: config, secrets, and git state.
    Check,
    /// Execute one nightly run in the current repository.
    Run {
        /// Commit on the dated branch but skip the push.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        exit_codes::CONFIG
    } else if err.downcast_ref::<SessionError>().is_some() {
        exit_codes::SERVICE
    } else {
        exit_codes::ERROR
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Check => cmd_check(&root),
        Command::Run { dry_run } => cmd_run(&root, dry_run),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let path = Config::path(root);
    if path.exists() && !force {
        return Err(anyhow::Error::new(ConfigError::new(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        ))));
    }
    write_config(&path, &Config::default())?;
    println!("wrote {}", path.display());
    ensure_ignore_rules(root)?;
    Ok(())
}

/// Everything cron needs, verified without spending a model request.
fn cmd_check(root: &Path) -> Result<()> {
    let config = load_config(&Config::path(root))?;
    println!("config: ok (model {})", config.model.name);

    match env::var(API_KEY_VAR) {
        Ok(v) if !v.trim().is_empty() => println!("{API_KEY_VAR}: set"),
        _ => {
            return Err(anyhow::Error::new(ConfigError::new(format!(
                "{API_KEY_VAR} is not set"
            ))));
        }
    }
    match env::var(WEBHOOK_URL_VAR) {
        Ok(v) if !v.trim().is_empty() => println!("{WEBHOOK_URL_VAR}: set"),
        _ => println!("{WEBHOOK_URL_VAR}: not set, notifications disabled"),
    }

    let current = Git::new(root).current_branch()?;
    println!("git: on branch {current}");
    println!("tonight's branch: {}", branch_name(&config));
    println!(
        "validation: {} (timeout {}s)",
        config.validation.command.join(" "),
        config.validation.timeout_secs
    );
    Ok(())
}

fn cmd_run(root: &Path, dry_run: bool) -> Result<()> {
    let config = load_config(&Config::path(root))?;
    let secrets = Secrets::from_env()?;

    let client = GeminiClient::new(&config.model, secrets.api_key)?;
    let validation = CommandValidationRunner::new(
        root,
        config.validation.command.clone(),
        Duration::from_secs(config.validation.timeout_secs),
        config.validation.output_limit_bytes,
    );

    let report = match &secrets.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(
                url.clone(),
                config.notify.max_message_chars,
                Duration::from_secs(config.notify.timeout_secs),
            )?;
            run_pipeline(root, &config, &client, &validation, &notifier, dry_run)?
        }
        None => {
            info!("no webhook configured, notifications disabled");
            run_pipeline(root, &config, &client, &validation, &NoopNotifier, dry_run)?
        }
    };

    println!(
        "run {} on {}: {}",
        report.run_id,
        report.branch,
        report.status.describe()
    );
    Ok(())
}
