use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "seqbench",
    about = "seqbench - optimizer pass-sequence prefix benchmark",
    long_about = "Expand an optimizer step sequence into the steps the compiler actually runs, \
build the contract after every prefix of that list, replay a call trace against each build \
and report bytecode size and gas per prefix.",
    version
)]
pub(crate) struct Cli {
    /// Notation dialect: solc ([ab] repeats) or marker ([ab]* repeats)
    #[arg(long, global = true, default_value = "solc")]
    pub(crate) dialect: String,

    /// Output format: text or json
    #[arg(long, global = true, default_value = "text")]
    pub(crate) format: String,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List the known optimizer steps
    #[command(display_order = 10)]
    Steps,

    /// Validate a sequence and print its canonical form, tree and step order
    #[command(display_order = 20)]
    Parse {
        /// Step sequence notation, e.g. "dhfoDgvulfnTUtnIf:"
        notation: String,

        /// Skip the benchmark checks (explicit ':' and no cleanup next to groups)
        #[arg(long)]
        no_policy: bool,
    },

    /// Expand a sequence into the list of steps the optimizer executes
    #[command(display_order = 30)]
    Expand {
        /// Yul source file
        source: PathBuf,

        /// Step sequence notation
        notation: String,

        /// Expansion mode: trace or iterative
        #[arg(long, default_value = "trace")]
        mode: String,

        /// Give up on a repeat group after this many rounds
        #[arg(long, default_value_t = seqbench_engine::config::DEFAULT_ITERATION_CAP)]
        iteration_cap: usize,

        /// Compiler executable
        #[arg(long, default_value = "solc")]
        solc: PathBuf,
    },

    /// Build every prefix of the expanded step list
    #[command(display_order = 40)]
    Prefixes {
        /// Yul source file
        source: PathBuf,

        /// Step sequence notation
        notation: String,

        /// Extend prefixes into the cleanup list
        #[arg(long)]
        include_cleanup: bool,

        /// Write per-prefix bytecode, IR and build info here
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Expansion mode: trace or iterative
        #[arg(long, default_value = "trace")]
        mode: String,

        /// Compiler executable
        #[arg(long, default_value = "solc")]
        solc: PathBuf,

        /// Parallel compiler invocations
        #[arg(long, default_value_t = 1)]
        jobs: usize,
    },

    /// Run the full benchmark described by a manifest
    #[command(display_order = 50)]
    Bench {
        /// Benchmark manifest (JSON)
        manifest: PathBuf,

        /// Directory for per-unit reports
        #[arg(long, default_value = "seqbench-out")]
        out_dir: PathBuf,

        /// Units processed concurrently
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
}
