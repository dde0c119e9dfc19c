pub mod catalog;
pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use helmsman_core::config::{AppConfig, LoadOptions};
use helmsman_core::domain::tool::{CostClass, ToolCategory};

#[derive(Debug, Parser)]
#[command(
    name = "helmsman",
    about = "Helmsman operator CLI",
    long_about = "Validate capability catalogs, dry-run routing decisions, and inspect configuration.",
    after_help = "Examples:\n  helmsman check\n  helmsman check --category data_fetch\n  helmsman route \"cheapest bunker from Singapore to Rotterdam\"\n  helmsman route --have route_agent \"cheapest bunker\"\n  helmsman config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Load the capability catalog and report validation and dependency problems")]
    Check {
        #[arg(long, help = "Catalog file; defaults to catalog.path from configuration")]
        catalog: Option<PathBuf>,
        #[arg(long, help = "Only report tools in this category, e.g. data_fetch")]
        category: Option<ToolCategory>,
        #[arg(long, help = "Only report tools with this cost class: free, api_call or expensive")]
        cost: Option<CostClass>,
    },
    #[command(about = "Show the supervisor's next decision for a query using keyword routing")]
    Route {
        query: String,
        #[arg(long, help = "Catalog file; defaults to catalog.path from configuration")]
        catalog: Option<PathBuf>,
        #[arg(long = "have", help = "Treat this capability's data as already collected")]
        have: Vec<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        logging::init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Check { catalog, category, cost } => {
            commands::check::run(&commands::check::CheckArgs { catalog, category, cost })
        }
        Command::Route { query, catalog, have } => {
            commands::route::run(&commands::route::RouteArgs { query, catalog, have })
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
