// Command handler for: Expand

use std::path::PathBuf;

use seqbench_dsl::{Dialect, StepCatalogue};
use seqbench_engine::compiler::solc::SolcCompiler;
use seqbench_engine::compiler::SourceUnit;
use seqbench_engine::config::ExpandOptions;
use seqbench_engine::expand_sequence;
use seqbench_ir::ExpandedRun;

use super::helpers::{parse_expansion_mode, print_json, OutputFormat};
use super::parse::parse_checked;

pub(crate) struct ExpandArgs {
    pub(crate) source: PathBuf,
    pub(crate) notation: String,
    pub(crate) mode: String,
    pub(crate) iteration_cap: usize,
    pub(crate) solc: PathBuf,
}

pub(crate) fn run_expand_command(
    args: ExpandArgs,
    dialect: Dialect,
    format: OutputFormat,
) -> miette::Result<()> {
    if args.iteration_cap == 0 {
        miette::bail!("--iteration-cap must be at least 1");
    }
    let options = ExpandOptions {
        mode: parse_expansion_mode(&args.mode)?,
        iteration_cap: args.iteration_cap,
        dialect,
        ..ExpandOptions::default()
    };
    let sequence = parse_checked(&args.notation, dialect, &options.catalogue, false)?;
    let compiler = SolcCompiler::new(&args.solc);
    let source = SourceUnit::from_path(&args.source);

    let run = expand_sequence(&compiler, &source, &sequence, &options)
        .map_err(|e| miette::miette!("expansion of '{}' failed: {e}", args.notation))?;

    match format {
        OutputFormat::Json => print_json(&run)?,
        OutputFormat::Text => print!("{}", render_run_text(&run, &options.catalogue)),
    }
    Ok(())
}

pub(crate) fn render_run_text(run: &ExpandedRun, catalogue: &StepCatalogue) -> String {
    let mut out = String::new();
    for step in &run.steps {
        let section = match run.cleanup_boundary {
            Some(boundary) if step.index >= boundary => "cleanup",
            _ => "main",
        };
        let origin = if step.hardcoded { "hardcoded" } else { "user" };
        out.push_str(&format!(
            "{:>5}  {}  {:<32} {:>10}us  {section:<7} {origin}\n",
            step.index,
            step.abbreviation,
            catalogue.name_of(step.abbreviation).unwrap_or("?"),
            step.duration_us,
        ));
    }
    out.push_str(&format!(
        "Steps: {} ({} user, {} hardcoded)\n",
        run.steps.len(),
        run.steps.iter().filter(|s| !s.hardcoded).count(),
        run.hardcoded_count(),
    ));
    out.push_str(&format!("Main user steps: {}\n", run.main_user_notation()));
    out.push_str(&format!("Total step time: {}us\n", run.total_duration_us()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_rendering_marks_cleanup_and_hardcoded_steps() {
        let run = ExpandedRun::from_steps(
            [('d', 3, true), ('x', 10, false), ('a', 20, false), ('u', 4, true)],
            Some(2),
        );
        let text = render_run_text(&run, &StepCatalogue::standard());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("hardcoded"));
        assert!(lines[1].contains("main") && lines[1].contains("user"));
        assert!(lines[2].contains("cleanup"));
        assert!(text.contains("Steps: 4 (2 user, 2 hardcoded)"));
        assert!(text.contains("Total step time: 37us"));
    }
}
