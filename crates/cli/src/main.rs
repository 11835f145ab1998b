//! stepwise CLI, the main entry point.
//!
//! Commands:
//! - `stepwise [TASK]`          Run a task (same as `stepwise task`)
//! - `stepwise task [TASK]`     Run a task from an argument, `--file`, or stdin
//! - `stepwise config show`     Print the effective configuration
//! - `stepwise config path`     Print the config file location
//! - `stepwise config init`     Write a default config file

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod console;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "stepwise: solve a task with a bounded, tool-augmented model loop",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// The task to run when no subcommand is given
    task: Option<String>,

    #[command(flatten)]
    engine: EngineArgs,

    /// Log level for stderr diagnostics
    #[arg(long, value_enum, default_value_t = LogLevel::Warning, global = true)]
    log: LogLevel,

    /// Enable verbose logging and tool output previews
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task
    Task {
        /// The task text; read from --file or stdin when omitted
        task: Option<String>,

        /// Read the task from a file
        #[arg(short, long, conflicts_with = "task")]
        file: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file if none exists
    Init,
}

/// Per-run overrides of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Mode selecting the tool bundle (basic, code-basic, code, interpreter, search, search-full, full)
    #[arg(long)]
    pub mode: Option<String>,

    /// Model as <provider>/<model>, e.g. openrouter/deepseek/deepseek-chat
    #[arg(long = "model-name")]
    pub model_name: Option<String>,

    /// Vision model used by describe_image in full mode
    #[arg(long = "vision-model-name")]
    pub vision_model_name: Option<String>,

    /// Maximum number of thinking cycles
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Compact working memory every N steps
    #[arg(long = "compact-every-n-iteration")]
    pub compact_every: Option<usize>,

    /// Token budget for working memory
    #[arg(long = "max-tokens-working-memory")]
    pub max_working_memory_tokens: Option<usize>,

    /// Wait for whole responses instead of streaming
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
}

impl LogLevel {
    fn filter(self, verbose: bool) -> &'static str {
        if verbose {
            return "debug";
        }
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for the answer
    let filter = cli.log.filter(cli.verbose);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Some(Commands::Task { task, file, engine }) => {
            commands::run::run(task, file, &engine, cli.verbose).await
        }
        Some(Commands::Config { action }) => commands::config_cmd::run(action).map(|()| true),
        None => commands::run::run(cli.task, None, &cli.engine, cli.verbose).await,
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
