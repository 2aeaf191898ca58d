//! Report sinks. A sink only ever sees flat rows.

use std::io::Write;

use seqbench_ir::{ExecutionRow, Report, SummaryRow, UnitKey};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error writing report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait ReportSink {
    fn write_rows(
        &mut self,
        unit: &UnitKey,
        summary: &[SummaryRow],
        executions: &[ExecutionRow],
    ) -> Result<(), SinkError>;
}

/// Flatten `report` and hand it to `sink`.
pub fn emit<S: ReportSink + ?Sized>(report: &Report, sink: &mut S) -> Result<(), SinkError> {
    sink.write_rows(&report.unit, &report.summary_rows(), &report.execution_rows())
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    contract: &'a str,
    sequence: &'a str,
    summary: &'a [SummaryRow],
    executions: &'a [ExecutionRow],
}

/// Pretty JSON, one document per unit.
pub struct JsonSink<W> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn write_rows(
        &mut self,
        unit: &UnitKey,
        summary: &[SummaryRow],
        executions: &[ExecutionRow],
    ) -> Result<(), SinkError> {
        let document = JsonDocument {
            contract: &unit.contract,
            sequence: &unit.sequence,
            summary,
            executions,
        };
        serde_json::to_writer_pretty(&mut self.out, &document)?;
        writeln!(self.out)?;
        Ok(())
    }
}

/// GitHub-style Markdown tables. Missing values are empty cells.
pub struct MarkdownTableSink<W> {
    out: W,
    with_executions: bool,
}

impl<W: Write> MarkdownTableSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            with_executions: true,
        }
    }

    /// Only write the per-prefix table.
    pub fn summary_only(mut self) -> Self {
        self.with_executions = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn table(&mut self, columns: &[&str], rows: impl Iterator<Item = Vec<String>>) -> std::io::Result<()> {
        writeln!(self.out, "| {} |", columns.join(" | "))?;
        let rule: Vec<&str> = columns.iter().map(|_| "---").collect();
        writeln!(self.out, "| {} |", rule.join(" | "))?;
        for cells in rows {
            let cells: Vec<String> = cells.iter().map(|c| c.replace('|', "\\|")).collect();
            writeln!(self.out, "| {} |", cells.join(" | "))?;
        }
        Ok(())
    }
}

impl<W: Write> ReportSink for MarkdownTableSink<W> {
    fn write_rows(
        &mut self,
        unit: &UnitKey,
        summary: &[SummaryRow],
        executions: &[ExecutionRow],
    ) -> Result<(), SinkError> {
        writeln!(self.out, "## {} `{}`", unit.contract, unit.sequence)?;
        writeln!(self.out)?;
        self.table(&SummaryRow::COLUMNS, summary.iter().map(SummaryRow::cells))?;
        if self.with_executions && !executions.is_empty() {
            writeln!(self.out)?;
            self.table(&ExecutionRow::COLUMNS, executions.iter().map(ExecutionRow::cells))?;
        }
        writeln!(self.out)?;
        Ok(())
    }
}
