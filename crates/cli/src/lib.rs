pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use switchboard_core::config::{LoadOptions, LogFormat, SwitchboardConfig};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard support workflow CLI",
    long_about = "Run support conversations through the handler workflow offline and inspect configuration.",
    after_help = "Examples:\n  switchboard run --message \"I want to upgrade to premium\" --json\n  switchboard config\n  switchboard doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one message through the workflow with offline collaborators")]
    Run {
        #[arg(long, short, help = "Customer message to route")]
        message: String,
        #[arg(long, help = "Customer identifier attached to the conversation")]
        customer_id: Option<String>,
        #[arg(long, help = "Resume an existing conversation id")]
        conversation_id: Option<String>,
        #[arg(long, help = "Override the workflow turn budget")]
        max_turns: Option<u32>,
        #[arg(long, help = "Include the full workflow result as JSON")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, handler registry, and an offline probe conversation")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = SwitchboardConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Run { message, customer_id, conversation_id, max_turns, json } => {
            commands::run::run(commands::run::RunArgs {
                message,
                customer_id,
                conversation_id,
                max_turns,
                json,
            })
            .await
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json).await }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_logging(config: &SwitchboardConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
