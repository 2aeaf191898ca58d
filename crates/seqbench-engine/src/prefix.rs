//! Prefix build driver.
//!
//! Prefix `k` is the first `k` user steps of an expanded run, compiled as an
//! explicit flat list. Every prefix is built on its own: a failure at `k`
//! says nothing about `k + 1`, since a later step can undo a resource-limit
//! failure introduced by an earlier one.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use seqbench_ir::{BuildArtifact, BuildFailure, BuildOutcome, ExpandedRun, StepExecution, UnitKey};
use thiserror::Error;
use tracing::{debug, info};

use crate::compiler::{Compiler, CompilerError, SourceUnit, StepList};
use crate::config::{BracketingPolicy, BuildOptions};
use crate::snapshot::write_snapshots;
use crate::unit::CancelToken;

/// The literal step list of every prefix of one expanded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPlan {
    main: Vec<StepExecution>,
    cleanup: Vec<StepExecution>,
    include_cleanup: bool,
    bracketing: BracketingPolicy,
}

impl PrefixPlan {
    /// Plan over the user steps of `run`. With `include_cleanup`, prefixes
    /// continue past the main list into the cleanup list.
    pub fn new(run: &ExpandedRun, include_cleanup: bool) -> Self {
        Self {
            main: run.main_user_steps().into_iter().cloned().collect(),
            cleanup: run.cleanup_user_steps().into_iter().cloned().collect(),
            include_cleanup,
            bracketing: BracketingPolicy::default(),
        }
    }

    /// Wrap every prefix in fixed steps that must run first and last.
    pub fn with_bracketing(mut self, bracketing: BracketingPolicy) -> Self {
        self.bracketing = bracketing;
        self
    }

    /// N: the largest prefix.
    pub fn len(&self) -> usize {
        if self.include_cleanup {
            self.main.len() + self.cleanup.len()
        } else {
            self.main.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn main_len(&self) -> usize {
        self.main.len()
    }

    pub fn includes_cleanup(&self) -> bool {
        self.include_cleanup
    }

    /// `0..=N`.
    pub fn prefixes(&self) -> RangeInclusive<usize> {
        0..=self.len()
    }

    /// First `k` user steps; `k` is clamped to `len()`.
    pub fn user_steps(&self, k: usize) -> Vec<&StepExecution> {
        let k = k.min(self.len());
        self.main
            .iter()
            .chain(self.cleanup.iter())
            .take(k)
            .collect()
    }

    /// The step added by prefix `k`, `None` for prefix 0.
    pub fn last_step(&self, k: usize) -> Option<&StepExecution> {
        match k {
            0 => None,
            k if k <= self.len() => self.main.iter().chain(self.cleanup.iter()).nth(k - 1),
            _ => None,
        }
    }

    /// Explicit list handed to the compiler for prefix `k`.
    ///
    /// Cleanup steps are included only once `k` passes the main list; this
    /// is purely index-based and independent of how earlier prefixes built.
    pub fn step_list(&self, k: usize) -> StepList {
        let k = k.min(self.len());
        let main_taken = k.min(self.main.len());
        StepList {
            pre: self.bracketing.pre.clone(),
            main: self.main[..main_taken].iter().map(|s| s.abbreviation).collect(),
            cleanup: self.cleanup[..k - main_taken]
                .iter()
                .map(|s| s.abbreviation)
                .collect(),
            post: self.bracketing.post.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("prefix {prefix}: {source}")]
    Compiler {
        prefix: usize,
        #[source]
        source: CompilerError,
    },
    #[error("build cancelled")]
    Cancelled,
    #[error("failed to write snapshot {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Build prefixes `0..=N`, returning artifacts sorted by prefix.
///
/// Worker threads pull prefix indices from a shared counter and report over
/// a channel. Only an unusable compiler aborts the whole build; any other
/// per-prefix problem is recorded as a failed artifact.
pub fn build_prefixes<C: Compiler + ?Sized>(
    compiler: &C,
    source: &SourceUnit,
    plan: &PrefixPlan,
    unit: &UnitKey,
    options: &BuildOptions,
    cancel: &CancelToken,
) -> Result<Vec<BuildArtifact>, BuildError> {
    let total = plan.len() + 1;
    let workers = options.parallelism.clamp(1, total);
    let next = AtomicUsize::new(0);
    let aborted = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel();

    info!(unit = %unit, prefixes = total, workers, "building prefixes");
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let aborted = &aborted;
            scope.spawn(move || loop {
                if cancel.is_cancelled() || aborted.load(Ordering::Acquire) {
                    break;
                }
                let k = next.fetch_add(1, Ordering::Relaxed);
                if k >= total {
                    break;
                }
                let result = build_one(compiler, source, plan, unit, k);
                if result.is_err() {
                    aborted.store(true, Ordering::Release);
                }
                if tx.send((k, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut results: Vec<(usize, Result<BuildArtifact, CompilerError>)> = rx.into_iter().collect();
    results.sort_by_key(|(k, _)| *k);

    let mut artifacts = Vec::with_capacity(total);
    for (prefix, result) in results {
        match result {
            Ok(artifact) => artifacts.push(artifact),
            Err(source) => return Err(BuildError::Compiler { prefix, source }),
        }
    }
    if cancel.is_cancelled() || artifacts.len() != total {
        return Err(BuildError::Cancelled);
    }

    if let Some(dir) = &options.snapshot_dir {
        write_snapshots(dir, &source.name, plan, &artifacts)?;
    }
    Ok(artifacts)
}

fn build_one<C: Compiler + ?Sized>(
    compiler: &C,
    source: &SourceUnit,
    plan: &PrefixPlan,
    unit: &UnitKey,
    k: usize,
) -> Result<BuildArtifact, CompilerError> {
    let steps = plan.step_list(k);
    let started = Instant::now();
    let outcome = match compiler.build(source, &steps) {
        Ok(outcome) => outcome,
        Err(err @ CompilerError::Unavailable { .. }) => return Err(err),
        Err(err) => BuildOutcome::Failed {
            reason: BuildFailure::CompilerRejected {
                messages: vec![err.to_string()],
            },
        },
    };
    let artifact = BuildArtifact {
        key: unit.artifact(k),
        steps: steps.render(),
        outcome,
        build_duration_us: started.elapsed().as_micros() as u64,
    };
    debug!(prefix = k, steps = %artifact.steps, status = artifact.status(), "built prefix");
    Ok(artifact)
}
