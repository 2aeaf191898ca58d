// Shared argument parsing and output helpers for the command handlers.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;

use seqbench_dsl::Dialect;
use seqbench_engine::config::ExpansionMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

pub(crate) fn parse_output_format(raw: &str) -> miette::Result<OutputFormat> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(miette::miette!(
            "Unknown output format: {other}. Use 'text' or 'json'."
        )),
    }
}

pub(crate) fn parse_dialect(raw: &str) -> miette::Result<Dialect> {
    raw.parse::<Dialect>().map_err(|e| miette::miette!("{e}"))
}

pub(crate) fn parse_expansion_mode(raw: &str) -> miette::Result<ExpansionMode> {
    raw.parse::<ExpansionMode>()
        .map_err(|e| miette::miette!("{e}"))
}

/// Keep a user-supplied name usable as a single file name component.
/// Case is preserved since step abbreviations are case sensitive.
pub(crate) fn sanitize_artifact_component(raw: &str) -> String {
    let mut out = String::new();
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else if ch == '.' || ch == '/' || ch == '\\' || ch.is_whitespace() {
            out.push('_');
        }
    }
    let compact = out.trim_matches('_');
    if compact.is_empty() {
        "entry".to_string()
    } else {
        compact.to_string()
    }
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

pub(crate) fn write_text_artifact(path: &Path, contents: &str) -> miette::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    fs::write(path, contents)
        .into_diagnostic()
        .map_err(|e| e.wrap_err(format!("failed to write {}", path.display())))?;
    Ok(())
}
