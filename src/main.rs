mod cli;
mod commands;
mod config;
mod engine;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use stackops::Op;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, Op::Apply, &cli.stage, args.dev),
        Command::Destroy => commands::deploy::run(&ctx, Op::Destroy, &cli.stage, false),
        Command::Refresh => commands::deploy::run(&ctx, Op::Refresh, &cli.stage, false),
        Command::Import(args) => commands::import::run(&ctx, &cli.stage, args),
        Command::Cancel => commands::cancel::run(&ctx, &cli.stage),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "stagehand", &mut io::stdout());
            Ok(())
        }
    }
}
