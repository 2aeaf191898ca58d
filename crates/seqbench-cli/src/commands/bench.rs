// Command handler for: Bench
//
// Loads a benchmark manifest, runs every (contract, sequence) unit and writes
// one JSON report and one Markdown table per unit. A unit that fails as a
// whole is listed in the summary and makes the command exit non-zero; the
// remaining units are still reported.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::info;

use seqbench_engine::backend::cast::CastBackend;
use seqbench_engine::compiler::sha256_hex;
use seqbench_engine::compiler::solc::SolcCompiler;
use seqbench_engine::manifest::{load_manifest, BenchManifest};
use seqbench_engine::sink::{emit, JsonSink, MarkdownTableSink, ReportSink};
use seqbench_engine::unit::{run_units, CancelToken, UnitError};
use seqbench_engine::SharedBackend;
use seqbench_ir::{Report, UnitKey};

use super::helpers::{print_json, sanitize_artifact_component, write_text_artifact, OutputFormat};

#[derive(Debug, Serialize)]
pub(crate) struct BenchUnitSummary {
    pub(crate) contract: String,
    pub(crate) sequence: String,
    pub(crate) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) report_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) report_markdown: Option<String>,
    pub(crate) prefixes: usize,
    pub(crate) compiled: usize,
    pub(crate) executions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BenchSummary {
    pub(crate) suite_name: String,
    pub(crate) manifest_path: String,
    pub(crate) out_dir: String,
    pub(crate) units: Vec<BenchUnitSummary>,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) cancelled: usize,
}

pub(crate) fn run_bench_command(
    manifest_path: &Path,
    out_dir: &Path,
    workers: usize,
    format: OutputFormat,
) -> miette::Result<()> {
    let manifest = load_manifest(manifest_path).map_err(|e| miette::miette!("{e}"))?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let units = manifest
        .units(base_dir)
        .map_err(|e| miette::miette!("{e}"))?;
    let backend = connect_backend(&manifest)?;
    let compiler = SolcCompiler::new(&manifest.compiler.program)
        .with_step_log_env(&manifest.compiler.step_log_env);
    let options = manifest.bench_options();

    info!(
        suite = %manifest.suite_name,
        units = units.len(),
        workers,
        rpc_url = %manifest.backend.rpc_url,
        "starting benchmark"
    );
    let results = run_units(
        &units,
        workers,
        &compiler,
        &[SharedBackend::new(backend)],
        &options,
        &CancelToken::new(),
    );

    fs::create_dir_all(out_dir).into_diagnostic()?;
    let mut summaries = Vec::with_capacity(results.len());
    for (key, result) in &results {
        summaries.push(write_unit_outputs(out_dir, key, result)?);
    }
    let summary = BenchSummary {
        suite_name: manifest.suite_name.clone(),
        manifest_path: manifest_path.display().to_string(),
        out_dir: out_dir.display().to_string(),
        succeeded: summaries.iter().filter(|s| s.status == "ok").count(),
        failed: summaries.iter().filter(|s| s.status == "failed").count(),
        cancelled: summaries.iter().filter(|s| s.status == "cancelled").count(),
        units: summaries,
    };
    write_text_artifact(
        &out_dir.join("summary.json"),
        &serde_json::to_string_pretty(&summary).into_diagnostic()?,
    )?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print!("{}", render_bench_text(&summary)),
    }

    let unsuccessful = summary.failed + summary.cancelled;
    if unsuccessful > 0 {
        miette::bail!(
            "{unsuccessful} of {} units did not complete",
            summary.units.len()
        );
    }
    Ok(())
}

fn connect_backend(manifest: &BenchManifest) -> miette::Result<CastBackend> {
    let env = &manifest.backend.private_key_env;
    let private_key = std::env::var(env).map_err(|_| {
        miette::miette!(
            "environment variable {env} is not set; it must hold the private key used to deploy \
             and call contracts on {}",
            manifest.backend.rpc_url
        )
    })?;
    Ok(CastBackend::new(&manifest.backend.rpc_url, private_key)
        .with_program(&manifest.backend.program)
        .with_return_data(manifest.backend.capture_return_data))
}

/// File stem for a unit's reports. Sanitizing is lossy, so the stem ends in
/// a digest of the raw key.
pub(crate) fn report_stem(key: &UnitKey) -> String {
    let raw = format!("{}\0{}", key.contract, key.sequence);
    let digest = sha256_hex(raw.as_bytes());
    format!(
        "{}-{}-{}",
        sanitize_artifact_component(&key.contract),
        sanitize_artifact_component(&key.sequence),
        &digest[..8]
    )
}

fn write_unit_outputs(
    out_dir: &Path,
    key: &UnitKey,
    result: &Result<Report, UnitError>,
) -> miette::Result<BenchUnitSummary> {
    let mut summary = BenchUnitSummary {
        contract: key.contract.clone(),
        sequence: key.sequence.clone(),
        status: "ok",
        report_json: None,
        report_markdown: None,
        prefixes: 0,
        compiled: 0,
        executions: 0,
        error: None,
    };
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            summary.status = if err.is_cancelled() {
                "cancelled"
            } else {
                "failed"
            };
            summary.error = Some(err.to_string());
            return Ok(summary);
        }
    };

    let stem = report_stem(key);
    let json_path = out_dir.join(format!("{stem}.json"));
    let md_path = out_dir.join(format!("{stem}.md"));
    write_report(
        report,
        &json_path,
        JsonSink::new(Vec::new()),
        JsonSink::into_inner,
    )?;
    write_report(
        report,
        &md_path,
        MarkdownTableSink::new(Vec::new()),
        MarkdownTableSink::into_inner,
    )?;

    summary.report_json = Some(json_path.display().to_string());
    summary.report_markdown = Some(md_path.display().to_string());
    summary.prefixes = report.rows.len();
    summary.compiled = report.compiled_prefixes().len();
    summary.executions = report.execution_count();
    Ok(summary)
}

fn write_report<S: ReportSink>(
    report: &Report,
    path: &Path,
    mut sink: S,
    into_bytes: impl FnOnce(S) -> Vec<u8>,
) -> miette::Result<()> {
    emit(report, &mut sink).map_err(|e| miette::miette!("{}: {e}", path.display()))?;
    fs::write(path, into_bytes(sink))
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("failed to write {}", path.display())))?;
    Ok(())
}

pub(crate) fn render_bench_text(summary: &BenchSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("BENCHMARK: {}\n", summary.suite_name));
    for unit in &summary.units {
        match unit.status {
            "ok" => out.push_str(&format!(
                "  [ok]     {} `{}`: {}/{} prefixes compiled, {} executions\n",
                unit.contract, unit.sequence, unit.compiled, unit.prefixes, unit.executions
            )),
            status => out.push_str(&format!(
                "  [{status}] {} `{}`: {}\n",
                unit.contract,
                unit.sequence,
                unit.error.as_deref().unwrap_or("")
            )),
        }
    }
    out.push_str(&format!(
        "Summary: {} ok, {} failed, {} cancelled\n",
        summary.succeeded, summary.failed, summary.cancelled
    ));
    out.push_str(&format!("Reports: {}\n", summary.out_dir));
    out
}
