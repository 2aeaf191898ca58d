//! Join of expansion, build and replay records into one report per unit.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use seqbench_dsl::StepCatalogue;
use seqbench_ir::{BuildArtifact, DeploymentOutcome, ExpandedRun, PrefixRow, Report, UnitKey};
use thiserror::Error;

use crate::prefix::PrefixPlan;
use crate::replay::ReplayJournal;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("unknown step '{abbreviation}' at position {index} of the run")]
    UnknownStep { abbreviation: char, index: usize },
    #[error("inconsistent records: {reason}")]
    InconsistentRecords { reason: String },
}

fn inconsistent(reason: String) -> AggregateError {
    AggregateError::InconsistentRecords { reason }
}

/// Build the report: exactly one row per prefix `0..=N`, prefix-ascending,
/// executions call-ascending.
///
/// Prefixes without an artifact get an explicit empty row. Records that do
/// not fit the plan are rejected rather than dropped: executions for a
/// failed build or a failed deployment, prefixes beyond N, gaps in call
/// indices, more executions than `trace_calls`.
pub fn aggregate<A: Borrow<BuildArtifact>>(
    unit: &UnitKey,
    run: &ExpandedRun,
    plan: &PrefixPlan,
    artifacts: &[A],
    journal: &ReplayJournal,
    trace_calls: usize,
    catalogue: &StepCatalogue,
) -> Result<Report, AggregateError> {
    for step in &run.steps {
        if !catalogue.contains(step.abbreviation) {
            return Err(AggregateError::UnknownStep {
                abbreviation: step.abbreviation,
                index: step.index,
            });
        }
    }

    let n = plan.len();
    let mut builds: BTreeMap<usize, &BuildArtifact> = BTreeMap::new();
    for artifact in artifacts {
        let artifact = artifact.borrow();
        let prefix = artifact.prefix();
        if &artifact.key.unit != unit {
            return Err(inconsistent(format!(
                "artifact for prefix {prefix} belongs to {}",
                artifact.key.unit
            )));
        }
        if prefix > n {
            return Err(inconsistent(format!(
                "artifact for prefix {prefix} but the plan ends at {n}"
            )));
        }
        if builds.insert(prefix, artifact).is_some() {
            return Err(inconsistent(format!("two artifacts for prefix {prefix}")));
        }
    }

    if journal.unit() != unit {
        return Err(inconsistent(format!(
            "replay journal belongs to {}",
            journal.unit()
        )));
    }
    for (prefix, progress) in journal.prefixes() {
        if prefix > n {
            return Err(inconsistent(format!(
                "replay records for prefix {prefix} but the plan ends at {n}"
            )));
        }
        let compiled = builds.get(&prefix).is_some_and(|a| a.is_compiled());
        if !compiled && (progress.deployment.is_some() || !progress.executions.is_empty()) {
            return Err(inconsistent(format!(
                "replay records for prefix {prefix}, which has no compiled artifact"
            )));
        }
        if let Some(DeploymentOutcome::Failed { .. }) = progress.deployment {
            if !progress.executions.is_empty() {
                return Err(inconsistent(format!(
                    "prefix {prefix} failed to deploy but has {} executions",
                    progress.executions.len()
                )));
            }
        }
        if progress.executions.len() > trace_calls {
            return Err(inconsistent(format!(
                "prefix {prefix} has {} executions for a trace of {trace_calls} calls",
                progress.executions.len()
            )));
        }
        for (position, record) in progress.executions.iter().enumerate() {
            if record.key.call_index != position || record.key.prefix != prefix {
                return Err(inconsistent(format!(
                    "prefix {prefix}: execution at position {position} is keyed as prefix {} call {}",
                    record.key.prefix, record.key.call_index
                )));
            }
        }
    }

    let mut rows = Vec::with_capacity(n + 1);
    let mut optimization_time_us = 0;
    for k in plan.prefixes() {
        let last = plan.last_step(k);
        if let Some(step) = last {
            optimization_time_us += step.duration_us;
        }
        let build = builds.get(&k);
        rows.push(PrefixRow {
            prefix: k,
            step: last.map(|s| s.abbreviation),
            step_name: last
                .and_then(|s| catalogue.name_of(s.abbreviation))
                .map(str::to_string),
            step_duration_us: last.map(|s| s.duration_us),
            optimization_time_us,
            build_status: build.map(|a| a.status().to_string()),
            build_duration_us: build.map(|a| a.build_duration_us),
            build_error: build.and_then(|a| a.failure()).map(ToString::to_string),
            bytecode_size: build.and_then(|a| a.metadata()).map(|m| m.bytecode_size),
            deployment: journal.deployment(k).cloned(),
            executions: journal.executions(k).to_vec(),
            trace_calls,
        });
    }

    Ok(Report {
        unit: unit.clone(),
        prefix_count: n,
        rows,
    })
}
