pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "shiftbot",
    about = "Shiftbot operator CLI",
    long_about = "Operate the shiftbot LINE webhook: migrations, demo data, config inspection, readiness checks, and request signing for local testing.",
    after_help = "Examples:\n  shiftbot doctor --json\n  shiftbot seed\n  shiftbot sign body.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Upsert the demo stores so store codes can be tried from chat")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, channel credential readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the x-line-signature header value for a webhook body file")]
    Sign {
        #[arg(help = "File holding the exact request body bytes")]
        body: PathBuf,
        #[arg(long, help = "Channel secret to sign with instead of the configured one")]
        secret: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Sign { body, secret } => commands::sign::run(&body, secret),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
