//! One (contract, sequence) unit of work, end to end.
//!
//! Failures below the unit boundary (a prefix that does not build, a call
//! that reverts) are data in the report. Failures at the boundary abort only
//! the unit they belong to.
#![allow(clippy::result_large_err)]

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use seqbench_dsl::{check_policy, parse_with, ParseError, ParseOptions};
use seqbench_ir::{ArtifactStore, CallTrace, ExpandedRun, Report, StoreError, UnitKey};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{aggregate, AggregateError};
use crate::backend::{BackendError, ExecutionBackend, SharedBackend};
use crate::compiler::{Compiler, SourceUnit};
use crate::config::BenchOptions;
use crate::expansion::{expand_sequence, ExpansionError};
use crate::prefix::{build_prefixes, BuildError, PrefixPlan};
use crate::replay::{replay_trace, ReplayError, ReplayJournal};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct BenchUnit {
    pub key: UnitKey,
    pub source: SourceUnit,
    pub notation: String,
    pub calls: CallTrace,
}

impl BenchUnit {
    pub fn new(
        source: SourceUnit,
        sequence_name: impl Into<String>,
        notation: impl Into<String>,
        calls: CallTrace,
    ) -> Self {
        Self {
            key: UnitKey::new(source.name.clone(), sequence_name),
            source,
            notation: notation.into(),
            calls,
        }
    }
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{key}: malformed sequence")]
    Malformed {
        key: UnitKey,
        #[source]
        source: ParseError,
    },
    #[error("{key}: {source}")]
    Expansion {
        key: UnitKey,
        #[source]
        source: ExpansionError,
    },
    #[error("{key}: {source}")]
    Build {
        key: UnitKey,
        #[source]
        source: BuildError,
    },
    #[error("{key}: {source}")]
    Store {
        key: UnitKey,
        #[source]
        source: StoreError,
    },
    #[error("{key}: {source}")]
    Replay {
        key: UnitKey,
        #[source]
        source: ReplayError,
    },
    #[error("{key}: {source}")]
    Backend {
        key: UnitKey,
        #[source]
        source: BackendError,
    },
    #[error("{key}: {source}")]
    Aggregate {
        key: UnitKey,
        #[source]
        source: AggregateError,
    },
    #[error("{key}: cancelled")]
    Cancelled { key: UnitKey },
    #[error("{key}: worker panicked: {message}")]
    Panicked { key: UnitKey, message: String },
}

impl UnitError {
    pub fn key(&self) -> &UnitKey {
        match self {
            UnitError::Malformed { key, .. }
            | UnitError::Expansion { key, .. }
            | UnitError::Build { key, .. }
            | UnitError::Store { key, .. }
            | UnitError::Replay { key, .. }
            | UnitError::Backend { key, .. }
            | UnitError::Aggregate { key, .. }
            | UnitError::Cancelled { key }
            | UnitError::Panicked { key, .. } => key,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UnitError::Cancelled { .. })
    }
}

/// A unit whose builds are done and which only needs a backend session.
#[derive(Debug)]
pub struct PreparedUnit {
    pub key: UnitKey,
    pub run: ExpandedRun,
    pub plan: PrefixPlan,
    store: ArtifactStore,
}

impl PreparedUnit {
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }
}

/// Parse, check policy, expand and build every prefix.
pub fn prepare_unit<C: Compiler + ?Sized>(
    compiler: &C,
    unit: &BenchUnit,
    options: &BenchOptions,
    cancel: &CancelToken,
) -> Result<PreparedUnit, UnitError> {
    let key = unit.key.clone();
    let parse_options = ParseOptions::new(options.dialect, &options.catalogue);
    let sequence = parse_with(&unit.notation, &parse_options)
        .and_then(|sequence| {
            check_policy(&sequence, &unit.notation, options.policy).map(|()| sequence)
        })
        .map_err(|source| UnitError::Malformed {
            key: key.clone(),
            source,
        })?;

    let run = expand_sequence(compiler, &unit.source, &sequence, &options.expand_options())
        .map_err(|source| UnitError::Expansion {
            key: key.clone(),
            source,
        })?;
    if cancel.is_cancelled() {
        return Err(UnitError::Cancelled { key });
    }

    let plan = PrefixPlan::new(&run, options.include_cleanup)
        .with_bracketing(options.bracketing.clone());
    let artifacts = build_prefixes(
        compiler,
        &unit.source,
        &plan,
        &key,
        &options.build_options(),
        cancel,
    )
    .map_err(|source| match source {
        BuildError::Cancelled => UnitError::Cancelled { key: key.clone() },
        source => UnitError::Build {
            key: key.clone(),
            source,
        },
    })?;

    let mut store = ArtifactStore::new();
    for artifact in artifacts {
        store.insert(artifact).map_err(|source| UnitError::Store {
            key: key.clone(),
            source,
        })?;
    }
    let compiled = store.unit_artifacts(&key).filter(|a| a.is_compiled()).count();
    info!(unit = %key, prefixes = plan.len() + 1, compiled, "prefixes built");
    Ok(PreparedUnit {
        key,
        run,
        plan,
        store,
    })
}

/// Replay the call trace against every built prefix and aggregate.
///
/// On cancellation the unit's artifacts are dropped from `prepared`.
pub fn finish_unit<B: ExecutionBackend + ?Sized>(
    prepared: &mut PreparedUnit,
    calls: &CallTrace,
    backend: &mut B,
    options: &BenchOptions,
    cancel: &CancelToken,
) -> Result<Report, UnitError> {
    let key = prepared.key.clone();
    let artifacts: Vec<_> = prepared.store.unit_artifacts(&key).cloned().collect();
    let mut journal = ReplayJournal::new(key.clone());
    match replay_trace(
        backend,
        &artifacts,
        calls,
        &mut journal,
        &options.replay_options(),
        cancel,
    ) {
        Ok(_) => {}
        Err(ReplayError::Cancelled) => {
            drop(artifacts);
            let discarded = prepared.store.discard_unit(&key);
            info!(unit = %key, discarded, "unit cancelled, artifacts discarded");
            return Err(UnitError::Cancelled { key });
        }
        Err(source) => return Err(UnitError::Replay { key, source }),
    }

    aggregate(
        &key,
        &prepared.run,
        &prepared.plan,
        &artifacts,
        &journal,
        calls.len(),
        &options.catalogue,
    )
    .map_err(|source| UnitError::Aggregate { key, source })
}

/// Run one unit: parse + policy, expand, plan, build, replay, aggregate.
pub fn run_unit<C, B>(
    compiler: &C,
    backend: &mut B,
    unit: &BenchUnit,
    options: &BenchOptions,
    cancel: &CancelToken,
) -> Result<Report, UnitError>
where
    C: Compiler + ?Sized,
    B: ExecutionBackend + ?Sized,
{
    info!(unit = %unit.key, notation = %unit.notation, "starting unit");
    let mut prepared = prepare_unit(compiler, unit, options, cancel)?;
    finish_unit(&mut prepared, &unit.calls, backend, options, cancel)
}

/// Run independent units on a pool of `workers` threads.
///
/// Worker `w` replays on `backends[w % backends.len()]`. Builds run without
/// holding a session; a replay leases its session for the whole trace, so
/// workers sharing one [`SharedBackend`] take turns on it. Results come back
/// in input order, and a failing unit never affects the others. A panic
/// inside one unit becomes that unit's [`UnitError::Panicked`].
pub fn run_units<C, B>(
    units: &[BenchUnit],
    workers: usize,
    compiler: &C,
    backends: &[SharedBackend<B>],
    options: &BenchOptions,
    cancel: &CancelToken,
) -> Vec<(UnitKey, Result<Report, UnitError>)>
where
    C: Compiler + ?Sized,
    B: ExecutionBackend + Send,
{
    if backends.is_empty() {
        return units
            .iter()
            .map(|unit| {
                let err = UnitError::Backend {
                    key: unit.key.clone(),
                    source: BackendError::Unavailable {
                        message: "no backend session configured".into(),
                    },
                };
                (unit.key.clone(), Err(err))
            })
            .collect();
    }

    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        let workers = workers.clamp(1, units.len().max(1));
        for worker in 0..workers {
            let backend = &backends[worker % backends.len()];
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(unit) = units.get(index) else {
                    break;
                };
                let result = if cancel.is_cancelled() {
                    Err(UnitError::Cancelled {
                        key: unit.key.clone(),
                    })
                } else {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        run_on_session(compiler, backend, unit, options, cancel)
                    }))
                    .unwrap_or_else(|payload| {
                        Err(UnitError::Panicked {
                            key: unit.key.clone(),
                            message: panic_message(payload.as_ref()),
                        })
                    })
                };
                if let Err(err) = &result {
                    warn!(unit = %unit.key, error = %err, "unit failed");
                }
                if tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut results: Vec<(usize, Result<Report, UnitError>)> = rx.into_iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results
        .into_iter()
        .map(|(index, result)| (units[index].key.clone(), result))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn run_on_session<C, B>(
    compiler: &C,
    backend: &SharedBackend<B>,
    unit: &BenchUnit,
    options: &BenchOptions,
    cancel: &CancelToken,
) -> Result<Report, UnitError>
where
    C: Compiler + ?Sized,
    B: ExecutionBackend,
{
    let mut prepared = prepare_unit(compiler, unit, options, cancel)?;
    let mut session = backend.lease().map_err(|source| UnitError::Backend {
        key: unit.key.clone(),
        source,
    })?;
    finish_unit(&mut prepared, &unit.calls, &mut *session, options, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let text: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(text.as_ref()), "boom");
        let owned: Box<dyn Any + Send> = Box::new(format!("step {}", 3));
        assert_eq!(panic_message(owned.as_ref()), "step 3");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
