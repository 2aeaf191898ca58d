// Command handler for: Steps

use serde::Serialize;

use seqbench_dsl::StepCatalogue;

use super::helpers::{print_json, OutputFormat};

#[derive(Debug, Serialize)]
struct StepEntry<'a> {
    abbreviation: char,
    name: &'a str,
}

pub(crate) fn run_steps_command(format: OutputFormat) -> miette::Result<()> {
    let catalogue = StepCatalogue::standard();
    match format {
        OutputFormat::Json => {
            let entries: Vec<StepEntry<'_>> = catalogue
                .iter()
                .map(|(abbreviation, name)| StepEntry { abbreviation, name })
                .collect();
            print_json(&entries)?;
        }
        OutputFormat::Text => print!("{}", render_steps_text(&catalogue)),
    }
    Ok(())
}

pub(crate) fn render_steps_text(catalogue: &StepCatalogue) -> String {
    let mut out = String::new();
    for (abbreviation, name) in catalogue.iter() {
        out.push_str(&format!("{abbreviation}  {name}\n"));
    }
    out
}
