pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "haggle",
    about = "Haggle operator CLI",
    long_about = "Operate the haggle backend: migrations, config inspection, readiness checks, buyer records, pricing and number provisioning.",
    after_help = "Examples:\n  haggle doctor --json\n  haggle buyer create --email ana@example.com --inbox-email ana@inbox.haggle.app\n  haggle price --msrp 42000 --brand Toyota --body-type \"Pickup Truck\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Print effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, database connectivity and integration credentials")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Create or list buyer records")]
    Buyer(BuyerCommand),
    #[command(about = "Estimate dealer invoice, holdback and net-net cost for a vehicle")]
    Price {
        #[arg(long)]
        msrp: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        body_type: Option<String>,
    },
    #[command(about = "Queue SMS number provisioning for a buyer")]
    Provision {
        #[arg(long)]
        buyer_id: String,
        #[arg(long, help = "Preferred three-digit area code")]
        area_code: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum BuyerCommand {
    #[command(about = "Register a buyer with their forwarding inbox address")]
    Create {
        #[arg(long, help = "Buyer id; a random UUID when omitted")]
        id: Option<String>,
        #[arg(long)]
        email: String,
        #[arg(long)]
        inbox_email: String,
        #[arg(long)]
        zip_code: Option<String>,
    },
    #[command(about = "List registered buyers")]
    List,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Buyer(BuyerCommand::Create { id, email, inbox_email, zip_code }) => {
            commands::buyer::create(commands::buyer::NewBuyer { id, email, inbox_email, zip_code })
        }
        Command::Buyer(BuyerCommand::List) => commands::buyer::list(),
        Command::Price { msrp, brand, body_type } => {
            commands::price::run(&msrp, &brand, body_type.as_deref())
        }
        Command::Provision { buyer_id, area_code } => {
            commands::provision::run(&buyer_id, area_code.as_deref())
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
