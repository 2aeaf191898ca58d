//! Call replay engine.
//!
//! Every compiled prefix gets one fresh deployment and the whole call trace,
//! in order, against it. Progress lives in a [`ReplayJournal`] so that a
//! session lost mid-trace can be restarted and the replay resumed from the
//! first unrecorded call without redoing recorded work.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use seqbench_ir::{
    BuildArtifact, CallFailure, CallTrace, DeploymentOutcome, DeploymentRecord, ExecutionKey,
    ExecutionRecord, UnitKey,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{validate_bytecode, BackendError, CallOutcome, ExecutionBackend};
use crate::config::ReplayOptions;
use crate::unit::CancelToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefixProgress {
    pub deployment: Option<DeploymentOutcome>,
    /// Call-ascending, contiguous from 0.
    pub executions: Vec<ExecutionRecord>,
    /// Nothing more will be recorded for this prefix.
    pub complete: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("execution for {found} recorded under journal of {expected}")]
    ForeignUnit { expected: UnitKey, found: UnitKey },
    #[error("prefix {prefix}: expected call {expected}, got call {found}")]
    OutOfOrder {
        prefix: usize,
        expected: usize,
        found: usize,
    },
    #[error("prefix {prefix} is already complete")]
    AlreadyComplete { prefix: usize },
}

/// Resumable record of replay progress for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayJournal {
    unit: UnitKey,
    prefixes: BTreeMap<usize, PrefixProgress>,
}

impl ReplayJournal {
    pub fn new(unit: UnitKey) -> Self {
        Self {
            unit,
            prefixes: BTreeMap::new(),
        }
    }

    pub fn unit(&self) -> &UnitKey {
        &self.unit
    }

    pub fn progress(&self, prefix: usize) -> Option<&PrefixProgress> {
        self.prefixes.get(&prefix)
    }

    /// Prefixes with any recorded progress, ascending.
    pub fn prefixes(&self) -> impl Iterator<Item = (usize, &PrefixProgress)> {
        self.prefixes.iter().map(|(k, progress)| (*k, progress))
    }

    pub fn deployment(&self, prefix: usize) -> Option<&DeploymentOutcome> {
        self.progress(prefix)
            .and_then(|progress| progress.deployment.as_ref())
    }

    pub fn executions(&self, prefix: usize) -> &[ExecutionRecord] {
        self.progress(prefix)
            .map(|progress| progress.executions.as_slice())
            .unwrap_or_default()
    }

    pub fn recorded_calls(&self, prefix: usize) -> usize {
        self.executions(prefix).len()
    }

    pub fn is_complete(&self, prefix: usize) -> bool {
        self.progress(prefix).is_some_and(|progress| progress.complete)
    }

    pub fn execution_count(&self) -> usize {
        self.prefixes.values().map(|p| p.executions.len()).sum()
    }

    pub fn record_deployment(&mut self, prefix: usize, outcome: DeploymentOutcome) {
        self.prefixes.entry(prefix).or_default().deployment = Some(outcome);
    }

    pub fn record_execution(&mut self, record: ExecutionRecord) -> Result<(), JournalError> {
        if record.key.unit != self.unit {
            return Err(JournalError::ForeignUnit {
                expected: self.unit.clone(),
                found: record.key.unit,
            });
        }
        let prefix = record.key.prefix;
        let progress = self.prefixes.entry(prefix).or_default();
        if progress.complete {
            return Err(JournalError::AlreadyComplete { prefix });
        }
        if record.key.call_index != progress.executions.len() {
            return Err(JournalError::OutOfOrder {
                prefix,
                expected: progress.executions.len(),
                found: record.key.call_index,
            });
        }
        progress.executions.push(record);
        Ok(())
    }

    pub fn mark_complete(&mut self, prefix: usize) {
        self.prefixes.entry(prefix).or_default().complete = true;
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("execution backend still unavailable after {restarts} session restart(s): {message}")]
    BackendUnavailable { restarts: usize, message: String },
    #[error("replay cancelled")]
    Cancelled,
    #[error(transparent)]
    Journal(#[from] JournalError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub prefixes_replayed: usize,
    pub prefixes_skipped: usize,
    pub deployments_failed: usize,
    pub calls_recorded: usize,
    pub calls_failed: usize,
    pub session_restarts: usize,
}

enum PassError {
    Unavailable(BackendError),
    Cancelled,
    Journal(JournalError),
}

impl From<JournalError> for PassError {
    fn from(err: JournalError) -> Self {
        PassError::Journal(err)
    }
}

/// Replay `trace` against every compiled artifact, recording into `journal`.
///
/// Prefixes already complete in the journal are skipped, so calling this
/// again with the same journal only finishes outstanding work.
pub fn replay_trace<B, A>(
    backend: &mut B,
    artifacts: &[A],
    trace: &CallTrace,
    journal: &mut ReplayJournal,
    options: &ReplayOptions,
    cancel: &CancelToken,
) -> Result<ReplaySummary, ReplayError>
where
    B: ExecutionBackend + ?Sized,
    A: Borrow<BuildArtifact>,
{
    let mut restarts = 0;
    let mut fresh_session = match backend.reset() {
        Ok(()) => true,
        Err(err) if err.is_unavailable() => false,
        Err(err) => {
            warn!(error = %err, "session reset failed, continuing on existing state");
            true
        }
    };

    loop {
        let result = if fresh_session {
            replay_pass(backend, artifacts, trace, journal, cancel)
        } else {
            Err(PassError::Unavailable(BackendError::Unavailable {
                message: "session could not be reset".into(),
            }))
        };
        match result {
            Ok(()) => break,
            Err(PassError::Cancelled) => return Err(ReplayError::Cancelled),
            Err(PassError::Journal(err)) => return Err(err.into()),
            Err(PassError::Unavailable(err)) => {
                if restarts >= options.max_session_restarts {
                    return Err(ReplayError::BackendUnavailable {
                        restarts,
                        message: err.to_string(),
                    });
                }
                restarts += 1;
                warn!(
                    unit = %journal.unit(),
                    attempt = restarts,
                    error = %err,
                    "backend unavailable, restarting session"
                );
                fresh_session = match backend.restart() {
                    Ok(()) => true,
                    Err(restart_err) => {
                        warn!(error = %restart_err, "session restart failed");
                        false
                    }
                };
            }
        }
    }

    let mut summary = ReplaySummary {
        session_restarts: restarts,
        ..ReplaySummary::default()
    };
    for artifact in artifacts {
        let artifact = artifact.borrow();
        let prefix = artifact.prefix();
        if !artifact.is_compiled() {
            summary.prefixes_skipped += 1;
            continue;
        }
        match journal.deployment(prefix) {
            Some(DeploymentOutcome::Failed { .. }) => summary.deployments_failed += 1,
            Some(DeploymentOutcome::Deployed(_)) => summary.prefixes_replayed += 1,
            None => {}
        }
        let executions = journal.executions(prefix);
        summary.calls_recorded += executions.len();
        summary.calls_failed += executions.iter().filter(|r| !r.success).count();
    }
    info!(
        unit = %journal.unit(),
        prefixes = summary.prefixes_replayed,
        calls = summary.calls_recorded,
        failed_calls = summary.calls_failed,
        restarts,
        "replay finished"
    );
    Ok(summary)
}

fn replay_pass<B, A>(
    backend: &mut B,
    artifacts: &[A],
    trace: &CallTrace,
    journal: &mut ReplayJournal,
    cancel: &CancelToken,
) -> Result<(), PassError>
where
    B: ExecutionBackend + ?Sized,
    A: Borrow<BuildArtifact>,
{
    let unit = journal.unit().clone();
    for artifact in artifacts {
        let artifact = artifact.borrow();
        let prefix = artifact.prefix();
        if journal.is_complete(prefix) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(PassError::Cancelled);
        }
        let Some(bytecode) = artifact.bytecode() else {
            // No artifact, no deployment, no executions.
            journal.mark_complete(prefix);
            continue;
        };

        let deployment = match validate_bytecode(bytecode).and_then(|()| backend.deploy(bytecode)) {
            Ok(deployment) => deployment,
            Err(err) if err.is_unavailable() => return Err(PassError::Unavailable(err)),
            Err(err) if journal.deployment(prefix).is_some() => {
                // This bytecode deployed before the restart, so the session
                // is at fault. Keep the original record and retry.
                warn!(prefix, error = %err, "redeployment failed while resuming");
                return Err(PassError::Unavailable(BackendError::Unavailable {
                    message: format!("redeployment of prefix {prefix} failed: {err}"),
                }));
            }
            Err(err) => {
                warn!(prefix, error = %err, "deployment failed");
                journal.record_deployment(
                    prefix,
                    DeploymentOutcome::Failed {
                        prefix,
                        message: err.to_string(),
                    },
                );
                journal.mark_complete(prefix);
                continue;
            }
        };
        if journal.deployment(prefix).is_none() {
            journal.record_deployment(
                prefix,
                DeploymentOutcome::Deployed(DeploymentRecord {
                    prefix,
                    address: deployment.address.clone(),
                    creation_gas: deployment.creation_gas,
                    bytecode_size: bytecode.len() / 2,
                }),
            );
        }

        let recorded = journal.recorded_calls(prefix);
        if recorded > 0 {
            debug!(prefix, warm_up = recorded, "resuming partially replayed prefix");
        }
        for (call_index, call) in trace.calls.iter().enumerate() {
            let outcome = match backend.call(&deployment.address, call) {
                Ok(outcome) => outcome,
                Err(err) if err.is_unavailable() => return Err(PassError::Unavailable(err)),
                Err(err) => CallOutcome::failed(
                    None,
                    CallFailure::Other {
                        message: err.to_string(),
                    },
                ),
            };
            // Calls recorded before a restart are re-executed so the fresh
            // deployment reaches the same state, but not recorded twice.
            if call_index < recorded {
                continue;
            }
            if let Some(failure) = &outcome.failure {
                debug!(prefix, call_index, %failure, "call failed");
            }
            journal.record_execution(ExecutionRecord {
                key: ExecutionKey {
                    unit: unit.clone(),
                    prefix,
                    call_index,
                },
                gas_used: outcome.gas_used,
                success: outcome.success,
                return_data: outcome.return_data,
                error: outcome.failure,
            })?;
        }
        journal.mark_complete(prefix);
    }
    Ok(())
}
