// Command handler for: Prefixes
//
// Expansion plus the prefix build driver for a single (source, notation)
// pair. No backend is involved; the output is the build outcome per prefix.

use std::path::PathBuf;

use serde::Serialize;

use seqbench_dsl::Dialect;
use seqbench_engine::compiler::solc::SolcCompiler;
use seqbench_engine::compiler::SourceUnit;
use seqbench_engine::config::BenchOptions;
use seqbench_engine::unit::{prepare_unit, BenchUnit, CancelToken, PreparedUnit};
use seqbench_ir::{BuildArtifact, CallTrace};

use super::helpers::{parse_expansion_mode, print_json, OutputFormat};
use super::parse::parse_checked;

pub(crate) struct PrefixesArgs {
    pub(crate) source: PathBuf,
    pub(crate) notation: String,
    pub(crate) include_cleanup: bool,
    pub(crate) out_dir: Option<PathBuf>,
    pub(crate) mode: String,
    pub(crate) solc: PathBuf,
    pub(crate) jobs: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct PrefixLine {
    pub(crate) prefix: usize,
    pub(crate) step: Option<char>,
    pub(crate) steps: String,
    pub(crate) status: &'static str,
    pub(crate) bytecode_size: Option<usize>,
    pub(crate) build_duration_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

pub(crate) fn run_prefixes_command(
    args: PrefixesArgs,
    dialect: Dialect,
    format: OutputFormat,
) -> miette::Result<()> {
    let options = BenchOptions {
        dialect,
        expansion_mode: parse_expansion_mode(&args.mode)?,
        include_cleanup: args.include_cleanup,
        build_parallelism: args.jobs.max(1),
        snapshot_dir: args.out_dir.clone(),
        ..BenchOptions::default()
    };
    // Surface notation problems as diagnostics before touching the compiler.
    parse_checked(&args.notation, dialect, &options.catalogue, true)?;

    let source = SourceUnit::from_path(&args.source);
    let unit = BenchUnit::new(
        source.clone(),
        args.notation.clone(),
        args.notation.clone(),
        CallTrace::new(source.name.clone(), Vec::new()),
    );
    let compiler = SolcCompiler::new(&args.solc);
    let prepared = prepare_unit(&compiler, &unit, &options, &CancelToken::new())
        .map_err(|e| miette::miette!("{e}"))?;

    let lines = prefix_lines(&prepared);
    match format {
        OutputFormat::Json => print_json(&lines)?,
        OutputFormat::Text => {
            print!("{}", render_prefix_text(&lines));
            if let Some(dir) = &args.out_dir {
                println!("Snapshots written to {}", dir.display());
            }
        }
    }
    Ok(())
}

pub(crate) fn prefix_lines(prepared: &PreparedUnit) -> Vec<PrefixLine> {
    prepared
        .store()
        .unit_artifacts(&prepared.key)
        .map(|artifact| prefix_line(prepared, artifact))
        .collect()
}

fn prefix_line(prepared: &PreparedUnit, artifact: &BuildArtifact) -> PrefixLine {
    let k = artifact.prefix();
    PrefixLine {
        prefix: k,
        step: prepared.plan.last_step(k).map(|s| s.abbreviation),
        steps: artifact.steps.clone(),
        status: artifact.status(),
        bytecode_size: artifact.metadata().map(|m| m.bytecode_size),
        build_duration_us: artifact.build_duration_us,
        error: artifact.failure().map(ToString::to_string),
    }
}

pub(crate) fn render_prefix_text(lines: &[PrefixLine]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>6}  {:<4} {:<18} {:>10} {:>12}  steps\n",
        "prefix", "step", "status", "size", "build(us)"
    ));
    for line in lines {
        let step = line.step.map(String::from).unwrap_or_default();
        let size = line
            .bytecode_size
            .map(|s| s.to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{:>6}  {:<4} {:<18} {:>10} {:>12}  {}\n",
            line.prefix, step, line.status, size, line.build_duration_us, line.steps
        ));
    }
    let compiled = lines.iter().filter(|l| l.status == "success").count();
    out.push_str(&format!("{compiled}/{} prefixes compiled\n", lines.len()));
    out
}
