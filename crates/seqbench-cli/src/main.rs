#![doc = include_str!("../README.md")]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::helpers::{parse_dialect, parse_output_format};

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = parse_output_format(&cli.format)?;
    let dialect = parse_dialect(&cli.dialect)?;

    match cli.command {
        Commands::Steps => {
            commands::steps::run_steps_command(format)?;
        }
        Commands::Parse {
            notation,
            no_policy,
        } => {
            commands::parse::run_parse_command(&notation, dialect, !no_policy, format)?;
        }
        Commands::Expand {
            source,
            notation,
            mode,
            iteration_cap,
            solc,
        } => {
            commands::expand::run_expand_command(
                commands::expand::ExpandArgs {
                    source,
                    notation,
                    mode,
                    iteration_cap,
                    solc,
                },
                dialect,
                format,
            )?;
        }
        Commands::Prefixes {
            source,
            notation,
            include_cleanup,
            out_dir,
            mode,
            solc,
            jobs,
        } => {
            commands::prefixes::run_prefixes_command(
                commands::prefixes::PrefixesArgs {
                    source,
                    notation,
                    include_cleanup,
                    out_dir,
                    mode,
                    solc,
                    jobs,
                },
                dialect,
                format,
            )?;
        }
        Commands::Bench {
            manifest,
            out_dir,
            workers,
        } => {
            commands::bench::run_bench_command(&manifest, &out_dir, workers, format)?;
        }
    }

    Ok(())
}
