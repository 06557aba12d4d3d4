//! Appstart: launcher for a frontend dev server and a backend runtime.
//!
//! This is the entry point of the application. It parses the command line,
//! sets up logging and either runs a one-off subcommand or supervises the
//! two children until the launcher is told to stop.

mod build_info;
mod commands;
mod environment;
mod envfile;
mod errors;
mod group;
mod layout;
mod logging;
mod occupants;
mod ports;
mod process;
mod signals;
mod supervisor;
mod upgrade;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{CommandFactory, Parser, Subcommand};

use crate::build_info::BuildInfo;
use crate::layout::Layout;
use crate::logging::LogLevel;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "appstart",
    about = "Start the application (frontend dev server + backend)",
    styles = help_styles(),
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Show this help message.
    #[arg(short = 'h', long = "help")]
    help: bool,
    /// Show version information.
    #[arg(short = 'v', long = "version")]
    version: bool,
    /// Log verbosity (defaults to $APPSTART_LOG, then info).
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upgrade base template to latest version.
    Upgrade {
        /// Preview upgrade changes without applying.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show version information.
    Version,
    /// Show this help message.
    Help,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match unknown_command(&err) {
            Some(arg) => {
                eprintln!("Unknown command: {arg}\n");
                print_help();
                return ExitCode::FAILURE;
            }
            None => err.exit(),
        },
    };
    logging::init_logging(cli.log_level);
    let build = BuildInfo::current();

    match run(cli, &build).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, build: &BuildInfo) -> Result<()> {
    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("{build}");
        return Ok(());
    }
    match cli.command {
        Some(Commands::Help) => print_help(),
        Some(Commands::Version) => println!("{build}"),
        Some(Commands::Upgrade { dry_run }) => {
            let layout = Layout::from_current_exe().context("cannot locate installation")?;
            upgrade::run_upgrade(&layout, dry_run).await?;
        }
        None => {
            supervisor::launch(build).await?;
        }
    }
    Ok(())
}

/// The offending word when `err` is about an unrecognized subcommand.
fn unknown_command(err: &clap::Error) -> Option<String> {
    if err.kind() != ErrorKind::InvalidSubcommand {
        return None;
    }
    match err.get(ContextKind::InvalidSubcommand) {
        Some(ContextValue::String(arg)) => Some(arg.clone()),
        _ => Some(String::new()),
    }
}

fn print_help() {
    let _ = Cli::command().print_help();
    println!();
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}
