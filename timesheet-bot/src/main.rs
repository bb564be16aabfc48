//! Timesheet Bot CLI.
//!
//! Runs the bot against Telegram or an interactive console session.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use timesheet_bot::config::{
    BotConfig, IssueLevel, config_path as default_config_path, init_config, load_config,
    load_config_from,
};
use timesheet_bot::prelude::*;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Timesheet Bot - event schedules with live-synchronized chat posts
#[derive(Parser)]
#[command(name = "timesheet-bot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "TIMESHEET_BOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Init(InitArgs),

    /// Run the bot on Telegram
    Run,

    /// Start an interactive console session
    Chat(ChatArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the chat command
#[derive(Args)]
struct ChatArgs {
    /// Custom prompt prefix
    #[arg(short, long, default_value = "You: ")]
    prompt: String,

    /// Session ID of the console user
    #[arg(short, long, default_value = "console")]
    session: String,

    /// Keep records in memory only
    #[arg(long)]
    memory: bool,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", timesheet_bot::error::DisplayError(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "timesheet_bot={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init(args) => cmd_init(args).await,
        Commands::Run => cmd_run(cli.config).await,
        Commands::Chat(args) => cmd_chat(args, cli.config).await,
        Commands::Config(args) => cmd_config(args, cli.config).await,
    }
}

async fn read_config(path: Option<PathBuf>) -> Result<BotConfig> {
    let config = match path {
        Some(path) => load_config_from(&path).await?,
        None => load_config().await?,
    };
    Ok(config)
}

/// Initialize configuration.
async fn cmd_init(args: InitArgs) -> Result<()> {
    let config_file = default_config_path();

    if config_file.exists() && !args.force {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    init_config()
        .await
        .map_err(|e| BotError::config(format!("failed to initialize config: {e}")))?;

    println!("Configuration created: {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. export TIMESHEET_BOT_TOKEN=<token>");
    println!("  2. timesheet-bot run");
    println!();
    println!("Or try it locally: timesheet-bot chat");

    Ok(())
}

/// Run on Telegram until Ctrl+C.
#[cfg(feature = "telegram")]
async fn cmd_run(config_path: Option<PathBuf>) -> Result<()> {
    let config = read_config(config_path).await?;
    config.ensure_valid()?;

    let Some(token) = config.telegram_token() else {
        return Err(BotError::config(
            "no Telegram token configured; set TIMESHEET_BOT_TOKEN or use `chat`",
        ));
    };
    let telegram_config = TelegramConfig::new(token).allow_users(config.allowed_users());
    let telegram = Arc::new(TelegramGateway::new(telegram_config));

    let gateway: Arc<dyn MessagingGateway> = Arc::<TelegramGateway>::clone(&telegram);
    let bot = Bot::open(config, gateway)?;
    telegram.start(bot.bus()).await;

    println!("Bot running. Press Ctrl+C to stop.\n");

    let result = tokio::select! {
        result = bot.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            Ok(())
        }
    };

    telegram.stop().await;
    bot.stop().await;
    result
}

#[cfg(not(feature = "telegram"))]
async fn cmd_run(_config_path: Option<PathBuf>) -> Result<()> {
    Err(BotError::config(
        "built without the `telegram` feature; use `chat` instead",
    ))
}

/// Start an interactive console session.
async fn cmd_chat(args: ChatArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = read_config(config_path).await?;
    config.ensure_valid()?;

    let console = Arc::new(ConsoleGateway::with_config(
        ConsoleConfig::new()
            .prompt(args.prompt)
            .session_id(args.session),
    ));
    let gateway: Arc<dyn MessagingGateway> = Arc::<ConsoleGateway>::clone(&console);
    let bot = if args.memory {
        Bot::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            gateway,
            Arc::new(SystemClock),
        )
    } else {
        Bot::open(config, gateway)?
    };

    println!("Timesheet Bot | try /help, press buttons with #n, type 'exit' to quit\n");

    let result = tokio::select! {
        result = bot.run() => result,
        result = run_interactive(&console, bot.bus()) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    bot.stop().await;
    result
}

/// Configuration management.
async fn cmd_config(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config_file = config_path.clone().unwrap_or_else(default_config_path);

    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(&config_file)
                    .await
                    .map_err(|e| BotError::config(format!("failed to read config: {e}")))?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'timesheet-bot init' to create one.");
            }
        }
        ConfigCommands::Validate => {
            if !config_file.exists() {
                println!("warning: configuration file does not exist, checking defaults");
            }

            let config = match read_config(config_path).await {
                Ok(config) => config,
                Err(e) => {
                    println!("error: {e}");
                    return Ok(());
                }
            };
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
            }
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.level == IssueLevel::Error) {
                return Err(BotError::config("configuration has errors"));
            }
        }
    }

    Ok(())
}
