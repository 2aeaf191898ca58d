// Command handler for: Parse
//
// Validates a notation against the standard catalogue and, unless disabled,
// the benchmark policy. Errors are rendered as miette diagnostics pointing
// into the notation.

use serde::Serialize;

use seqbench_dsl::{
    check_policy, parse_with, render_tree, BenchmarkPolicy, Dialect, ParseOptions, Sequence, Step,
    StepCatalogue,
};

use super::helpers::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct ParsedStep<'a> {
    abbreviation: char,
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ParseReport<'a> {
    dialect: &'static str,
    canonical: String,
    has_groups: bool,
    has_cleanup_marker: bool,
    main_steps: Vec<ParsedStep<'a>>,
    cleanup_steps: Vec<ParsedStep<'a>>,
}

pub(crate) fn run_parse_command(
    notation: &str,
    dialect: Dialect,
    enforce_policy: bool,
    format: OutputFormat,
) -> miette::Result<()> {
    let catalogue = StepCatalogue::standard();
    let sequence = parse_checked(notation, dialect, &catalogue, enforce_policy)?;

    match format {
        OutputFormat::Json => {
            let report = ParseReport {
                dialect: dialect.as_str(),
                canonical: sequence.to_notation(dialect),
                has_groups: sequence.has_groups(),
                has_cleanup_marker: sequence.has_cleanup_marker(),
                main_steps: named(sequence.main_steps(), &catalogue),
                cleanup_steps: named(sequence.cleanup_steps(), &catalogue),
            };
            print_json(&report)?;
        }
        OutputFormat::Text => print!("{}", render_parse_text(&sequence, dialect, &catalogue)),
    }
    Ok(())
}

pub(crate) fn parse_checked(
    notation: &str,
    dialect: Dialect,
    catalogue: &StepCatalogue,
    enforce_policy: bool,
) -> miette::Result<Sequence> {
    let options = ParseOptions::new(dialect, catalogue);
    let sequence = parse_with(notation, &options).map_err(miette::Report::new)?;
    if enforce_policy {
        check_policy(&sequence, notation, BenchmarkPolicy::default())
            .map_err(miette::Report::new)?;
    }
    Ok(sequence)
}

fn named(steps: Vec<Step>, catalogue: &StepCatalogue) -> Vec<ParsedStep<'_>> {
    steps
        .into_iter()
        .map(|step| ParsedStep {
            abbreviation: step.abbreviation(),
            name: catalogue.name_of(step.abbreviation()),
        })
        .collect()
}

fn render_parse_text(sequence: &Sequence, dialect: Dialect, catalogue: &StepCatalogue) -> String {
    let mut out = String::new();
    out.push_str(&format!("Canonical: {}\n", sequence.to_notation(dialect)));
    out.push_str("Tree:\n");
    for line in render_tree(sequence).lines() {
        out.push_str(&format!("  {line}\n"));
    }
    out.push_str("Static step order:\n");
    let main = sequence.main_steps();
    let cleanup = sequence.cleanup_steps();
    for (section, steps) in [("main", main), ("cleanup", cleanup)] {
        for step in steps {
            let name = catalogue.name_of(step.abbreviation()).unwrap_or("?");
            out.push_str(&format!("  {section:<7} {step}  {name}\n"));
        }
    }
    out
}
