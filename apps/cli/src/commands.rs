//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use swr_core::schedule::{
    DEFAULT_SCHEDULE, ScheduleManager, SystemCrontab, wrapper_command, write_wrapper_script,
};
use swr_core::{ExternalRunner, Pipeline, RunOptions, Service};
use swr_core::mcp::McpServer;
use swr_shared::{AppPaths, ConfigStore, REDACTED};
use tracing::info;

use crate::progress::CliProgress;
use crate::wizard::{self, Prompter};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SWR: weekly stock report from podcast episodes.
#[derive(Parser)]
#[command(
    name = "swr",
    version,
    about = "Turn a week of finance podcasts into an emailed stock report.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.config/swr/config.toml).
    #[arg(long, env = "SWR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Interactive first-time setup.
    Init,

    /// Run the weekly pipeline.
    Run {
        /// Skip downloading new episodes.
        #[arg(long)]
        skip_fetch: bool,

        /// Skip transcription.
        #[arg(long)]
        skip_transcribe: bool,

        /// Skip the notebook upload.
        #[arg(long)]
        skip_upload: bool,

        /// Skip report generation and email entirely.
        #[arg(long)]
        skip_email: bool,

        /// Skip retention cleanup.
        #[arg(long)]
        skip_cleanup: bool,

        /// Generate and save the report without sending it.
        #[arg(long)]
        save_report_only: bool,

        /// Run folder, e.g. 20260218-20260225.
        #[arg(long)]
        folder: Option<String>,

        /// Reuse an existing notebook (skips upload).
        #[arg(long)]
        notebook_id: Option<String>,
    },

    /// Manage podcast feeds.
    Podcast {
        #[command(subcommand)]
        action: PodcastAction,
    },

    /// Manage email receivers.
    Receiver {
        #[command(subcommand)]
        action: ReceiverAction,
    },

    /// Manage the scheduled weekly run.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },

    /// View and update configuration values.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Start the MCP server on stdio.
    Mcp {
        /// Print a client configuration snippet instead of serving.
        #[arg(long)]
        print_config: Option<McpClient>,
    },
}

#[derive(Subcommand)]
pub(crate) enum PodcastAction {
    /// Print configured feeds.
    List,
    /// Add a feed.
    Add { name: String, url: String },
    /// Remove a feed by name.
    Remove { name: String },
}

#[derive(Subcommand)]
pub(crate) enum ReceiverAction {
    /// Print configured receivers.
    List,
    /// Add a receiver.
    Add { email: String },
    /// Remove a receiver.
    Remove { email: String },
}

#[derive(Subcommand)]
pub(crate) enum CronAction {
    /// Install or replace the scheduled run.
    Install {
        /// Cron expression, e.g. '0 8 * * 0' for Sundays at 8 AM.
        #[arg(long, default_value = DEFAULT_SCHEDULE)]
        schedule: String,
    },
    /// Remove the scheduled run.
    Remove,
    /// Show whether the scheduled run is installed.
    Status,
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show the configuration with secrets redacted.
    Show,
    /// Set a value by dotted key, e.g. `retention.audio_months 6`.
    Set { key: String, value: String },
    /// Print a value by dotted key.
    Get { key: String },
    /// Print the config file path.
    Path,
}

/// MCP clients with a known config layout.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum McpClient {
    Vscode,
    ClaudeDesktop,
    Cursor,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "swr=info",
        1 => "swr=debug",
        _ => "swr=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::open_default()?,
    };

    match cli.command {
        Command::Init => cmd_init(&store),
        Command::Run {
            skip_fetch,
            skip_transcribe,
            skip_upload,
            skip_email,
            skip_cleanup,
            save_report_only,
            folder,
            notebook_id,
        } => {
            let opts = RunOptions {
                skip_fetch,
                skip_transcribe,
                skip_upload,
                skip_email,
                skip_cleanup,
                save_report_only,
                folder,
                notebook_id,
            };
            cmd_run(&store, opts).await
        }
        Command::Podcast { action } => match action {
            PodcastAction::List => cmd_podcast_list(&store),
            PodcastAction::Add { name, url } => {
                store.add_feed(&name, &url)?;
                println!("Added: {}", name.trim());
                Ok(())
            }
            PodcastAction::Remove { name } => {
                store.remove_feed(&name)?;
                println!("Removed: {name}");
                Ok(())
            }
        },
        Command::Receiver { action } => match action {
            ReceiverAction::List => cmd_receiver_list(&store),
            ReceiverAction::Add { email } => {
                store.add_receiver(&email)?;
                println!("Added: {}", email.trim());
                Ok(())
            }
            ReceiverAction::Remove { email } => {
                store.remove_receiver(&email)?;
                println!("Removed: {email}");
                Ok(())
            }
        },
        Command::Cron { action } => match action {
            CronAction::Install { schedule } => cmd_cron_install(&store, &schedule),
            CronAction::Remove => cmd_cron_remove(&store),
            CronAction::Status => cmd_cron_status(&store),
        },
        Command::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&store),
            ConfigAction::Set { key, value } => cmd_config_set(&store, &key, &value),
            ConfigAction::Get { key } => cmd_config_get(&store, &key),
            ConfigAction::Path => {
                println!("{}", store.path().display());
                Ok(())
            }
        },
        Command::Mcp { print_config } => match print_config {
            Some(client) => cmd_mcp_config(&store, &client),
            None => cmd_mcp_serve(store).await,
        },
    }
}

// ---------------------------------------------------------------------------
// init / run
// ---------------------------------------------------------------------------

fn cmd_init(store: &ConfigStore) -> Result<()> {
    let base = store.load_or_default()?;
    let stdin = std::io::stdin();
    let mut prompt = Prompter::new(stdin.lock(), std::io::stdout());

    let config = wizard::configure(&mut prompt, base)?;
    store.init(&config)?;
    prompt.say(&format!("\n✓ Config saved to {}", store.path().display()))?;

    if prompt.confirm("\nInstall the weekly cron job now?", true)? {
        prompt.say("Common schedules:")?;
        prompt.say("  '0 8 * * 0'  Sundays at 8 AM (default)")?;
        prompt.say("  '0 8 * * 1'  Mondays at 8 AM")?;
        prompt.say("  '0 8 * * *'  every day at 8 AM")?;
        let schedule = prompt.ask("Cron schedule", DEFAULT_SCHEDULE)?;
        // The config is already saved; a scheduler problem only gets reported.
        if let Err(e) = cmd_cron_install(store, &schedule) {
            prompt.say(&format!("  ✗ cron install failed: {e}"))?;
        }
    }
    Ok(())
}

async fn cmd_run(store: &ConfigStore, opts: RunOptions) -> Result<()> {
    let config = store.load()?;
    info!(config = ?store.path(), "starting run");

    let result = tokio::task::spawn_blocking(move || {
        let progress = CliProgress::new();
        Pipeline::new(&config, &ExternalRunner)
            .with_progress(&progress)
            .run(&opts)
    })
    .await
    .wrap_err("pipeline task aborted")??;

    println!("{}", result.summary());

    if !result.succeeded() {
        let failure = result
            .stages
            .first_failure()
            .map(|r| format!("{} stage failed", r.stage))
            .unwrap_or_else(|| "a stage did not complete".to_string());
        return Err(eyre!("pipeline run {} failed: {failure}", result.folder_id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// podcast / receiver
// ---------------------------------------------------------------------------

fn cmd_podcast_list(store: &ConfigStore) -> Result<()> {
    let config = store.load()?;
    if config.feeds.is_empty() {
        println!("No feeds configured.");
        return Ok(());
    }
    for (idx, feed) in config.feeds.iter().enumerate() {
        println!("  {}. {}", idx + 1, feed.name);
        println!("     {}", feed.url);
    }
    Ok(())
}

fn cmd_receiver_list(store: &ConfigStore) -> Result<()> {
    let config = store.load()?;
    if config.email.to.is_empty() {
        println!("No receivers configured.");
        return Ok(());
    }
    for (idx, addr) in config.email.to.iter().enumerate() {
        println!("  {}. {addr}", idx + 1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cron
// ---------------------------------------------------------------------------

fn schedule_manager(store: &ConfigStore) -> (AppPaths, ScheduleManager<SystemCrontab>) {
    let paths = AppPaths::for_config(store.path());
    let manager = ScheduleManager::new(SystemCrontab, wrapper_command(&paths.wrapper_script));
    (paths, manager)
}

fn cmd_cron_install(store: &ConfigStore, schedule: &str) -> Result<()> {
    let (paths, manager) = schedule_manager(store);

    if let Some(existing) = manager.status()?.expression {
        println!("Replacing existing entry ({existing})");
    }

    let binary = std::env::current_exe().wrap_err("cannot locate the swr binary")?;
    write_wrapper_script(&paths.wrapper_script, &binary, &paths.config_file, &paths.pipeline_log)?;
    let expression = manager.install(schedule)?;

    println!("Cron job installed: {expression}");
    println!("  Script: {}", paths.wrapper_script.display());
    println!("  Log:    {}", paths.pipeline_log.display());
    Ok(())
}

fn cmd_cron_remove(store: &ConfigStore) -> Result<()> {
    let (_, manager) = schedule_manager(store);
    if manager.remove()? {
        println!("Cron job removed.");
    } else {
        println!("No stock-weekly-report cron job found.");
    }
    Ok(())
}

fn cmd_cron_status(store: &ConfigStore) -> Result<()> {
    let (_, manager) = schedule_manager(store);
    let status = manager.status()?;
    if !status.installed {
        println!("Status: not installed");
        return Ok(());
    }
    println!("Status:   installed");
    if let Some(expression) = &status.expression {
        println!("Schedule: {expression}");
    }
    if let Some(command) = &status.command {
        println!("Command:  {command}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn is_secret_key(key: &str) -> bool {
    key.rsplit('.').next().is_some_and(|leaf| leaf.contains("password"))
}

fn display_value(key: &str, value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) if is_secret_key(key) && !s.is_empty() => REDACTED.to_string(),
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cmd_config_show(store: &ConfigStore) -> Result<()> {
    let config = store.load()?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("# {}", store.path().display());
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_set(store: &ConfigStore, key: &str, value: &str) -> Result<()> {
    let stored = store.set(key, value)?;
    println!("Set {key} = {}", display_value(key, &stored));
    Ok(())
}

fn cmd_config_get(store: &ConfigStore, key: &str) -> Result<()> {
    let value = store.get(key)?;
    println!("{}", display_value(key, &value));
    Ok(())
}

// ---------------------------------------------------------------------------
// mcp
// ---------------------------------------------------------------------------

async fn cmd_mcp_serve(store: ConfigStore) -> Result<()> {
    // Fail early on a missing or broken config instead of on the first call.
    store.load()?;
    let server = McpServer::new(Service::new(store, ExternalRunner));
    server.serve_stdio().await?;
    Ok(())
}

fn cmd_mcp_config(store: &ConfigStore, client: &McpClient) -> Result<()> {
    let binary = std::env::current_exe().wrap_err("cannot locate the swr binary")?;
    let args = serde_json::json!([
        "--config",
        store.path().to_string_lossy(),
        "mcp",
    ]);
    let command = binary.to_string_lossy();

    let (label, config) = match client {
        McpClient::Vscode => (
            "// .vscode/mcp.json",
            serde_json::json!({
                "servers": {
                    "stock-weekly-report": { "type": "stdio", "command": command, "args": args }
                }
            }),
        ),
        McpClient::ClaudeDesktop => (
            "// claude_desktop_config.json",
            serde_json::json!({
                "mcpServers": {
                    "stock-weekly-report": { "command": command, "args": args }
                }
            }),
        ),
        McpClient::Cursor => (
            "// Cursor MCP settings",
            serde_json::json!({
                "mcpServers": {
                    "stock-weekly-report": { "command": command, "args": args }
                }
            }),
        ),
    };
    println!("{label}");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
