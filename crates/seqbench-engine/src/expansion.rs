//! Sequence expansion oracle.
//!
//! Repeat-until-stable groups run a data-dependent number of times, so the
//! executed step list can only be learned by running the optimizer. Two ways
//! are offered: reading an instrumented compiler's step log, or driving the
//! compiler one step at a time and comparing optimized-IR digests at group
//! boundaries.
#![allow(clippy::result_large_err)]

use std::collections::BTreeSet;
use std::time::Instant;

use seqbench_dsl::{parse_with, Dialect, Group, ParseError, ParseOptions, Sequence, SequenceNode};
use seqbench_ir::{ExpandedRun, RunError};
use thiserror::Error;
use tracing::{debug, info};

use crate::compiler::{ir_digest, Compiler, CompilerError, SourceUnit, StepList};
use crate::config::{ExpandOptions, ExpansionMode};

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error(transparent)]
    Malformed(#[from] ParseError),
    #[error("expansion failed: {reason}")]
    Failed { reason: String },
    #[error(
        "repeat-until-stable group at offset {position} still changed the program after {cap} iterations"
    )]
    IterationLimitExceeded { cap: usize, position: usize },
    #[error("compiler reported an inconsistent run: {0}")]
    InvalidRun(#[from] RunError),
    #[error(transparent)]
    Compiler(CompilerError),
}

impl ExpansionError {
    fn from_compiler(err: CompilerError) -> Self {
        match err {
            CompilerError::Unavailable { .. } => ExpansionError::Compiler(err),
            other => ExpansionError::Failed {
                reason: other.to_string(),
            },
        }
    }
}

/// Parse `notation` and expand it against `source`.
pub fn expand<C: Compiler + ?Sized>(
    compiler: &C,
    source: &SourceUnit,
    notation: &str,
    options: &ExpandOptions,
) -> Result<ExpandedRun, ExpansionError> {
    let parse_options = ParseOptions::new(options.dialect, &options.catalogue);
    let sequence = parse_with(notation, &parse_options)?;
    expand_sequence(compiler, source, &sequence, options)
}

/// Expand an already parsed sequence.
pub fn expand_sequence<C: Compiler + ?Sized>(
    compiler: &C,
    source: &SourceUnit,
    sequence: &Sequence,
    options: &ExpandOptions,
) -> Result<ExpandedRun, ExpansionError> {
    let run = match options.mode {
        ExpansionMode::Trace => {
            // Instrumented compilers only understand their native notation.
            let notation = sequence.to_notation(Dialect::Solc);
            let run = compiler
                .trace(source, &notation)
                .map_err(ExpansionError::from_compiler)?;
            run.validate()?;
            check_step_log(&run, sequence, options.iteration_cap)?;
            run
        }
        ExpansionMode::Iterative => {
            let mut expander = IterativeExpander::new(compiler, source, options);
            expander.start()?;
            expander.run_nodes(&sequence.main, false)?;
            let cleanup_boundary = sequence
                .cleanup
                .as_ref()
                .map(|_| options.bracketing.pre.chars().count() + expander.records.len());
            if let Some(cleanup) = &sequence.cleanup {
                expander.run_nodes(cleanup, true)?;
            }
            expander.finish(cleanup_boundary)
        }
    };
    run.validate()?;
    info!(
        source = %source.name,
        mode = %options.mode,
        steps = run.steps.len(),
        user_steps = run.user_step_count(),
        "expanded sequence"
    );
    Ok(run)
}

/// Match the user steps of a compiler's step log against the sequence tree.
///
/// The log must be exactly what the tree allows: leaves in order, one-shot
/// groups once, repeat-until-stable groups between one and `cap` times.
fn check_step_log(
    run: &ExpandedRun,
    sequence: &Sequence,
    cap: usize,
) -> Result<(), ExpansionError> {
    let main: Vec<char> = run.main_user_steps().iter().map(|s| s.abbreviation).collect();
    check_list("main", &sequence.main, &main, cap)?;
    let cleanup: Vec<char> = run
        .cleanup_user_steps()
        .iter()
        .map(|s| s.abbreviation)
        .collect();
    check_list("cleanup", sequence.cleanup.as_deref().unwrap_or(&[]), &cleanup, cap)
}

fn check_list(
    list: &str,
    nodes: &[SequenceNode],
    log: &[char],
    cap: usize,
) -> Result<(), ExpansionError> {
    let mut matcher = LogMatcher {
        log,
        cap,
        furthest: 0,
        overflow: None,
    };
    let ends = matcher.nodes(nodes, BTreeSet::from([0]));
    if ends.contains(&log.len()) {
        return Ok(());
    }
    if let Some(position) = matcher.overflow {
        return Err(ExpansionError::IterationLimitExceeded { cap, position });
    }
    let reason = match log.get(matcher.furthest) {
        Some(step) => format!(
            "{list} step log diverges from the sequence at user step {} ('{step}')",
            matcher.furthest
        ),
        None => format!(
            "{list} step log ends after {} user steps, before the sequence does",
            log.len()
        ),
    };
    Err(ExpansionError::Failed { reason })
}

/// Set-of-positions matcher: every call maps the log positions a node may
/// start at to the positions it may end at.
struct LogMatcher<'a> {
    log: &'a [char],
    cap: usize,
    furthest: usize,
    /// Offset of the first repeat group that needed more than `cap` rounds.
    overflow: Option<usize>,
}

impl LogMatcher<'_> {
    fn nodes(&mut self, nodes: &[SequenceNode], mut at: BTreeSet<usize>) -> BTreeSet<usize> {
        for node in nodes {
            if at.is_empty() {
                break;
            }
            at = match node {
                SequenceNode::Leaf(step) => {
                    let step = step.node.abbreviation();
                    let next: BTreeSet<usize> = at
                        .into_iter()
                        .filter(|&p| self.log.get(p) == Some(&step))
                        .map(|p| p + 1)
                        .collect();
                    if let Some(&last) = next.last() {
                        self.furthest = self.furthest.max(last);
                    }
                    next
                }
                SequenceNode::Group(group) if !group.repeat_until_stable => {
                    self.nodes(&group.children, at)
                }
                SequenceNode::Group(group) => self.repeat(group, at),
            };
        }
        at
    }

    fn repeat(&mut self, group: &Group, at: BTreeSet<usize>) -> BTreeSet<usize> {
        let mut reached = BTreeSet::new();
        let mut frontier = at;
        for _ in 0..self.cap {
            frontier = self.nodes(&group.children, frontier);
            let known = reached.len();
            reached.extend(frontier.iter().copied());
            if frontier.is_empty() || reached.len() == known {
                return reached;
            }
        }
        // One more round only to learn whether the log wanted it.
        let (furthest, overflow) = (self.furthest, self.overflow);
        let beyond = self.nodes(&group.children, frontier);
        self.furthest = furthest;
        self.overflow = overflow;
        if self.overflow.is_none() && beyond.iter().any(|p| !reached.contains(p)) {
            debug!(offset = group.span.start, cap = self.cap, "step log exceeds iteration cap");
            self.overflow = Some(group.span.start);
        }
        reached
    }
}

struct IterativeExpander<'a, C: ?Sized> {
    compiler: &'a C,
    source: &'a SourceUnit,
    cap: usize,
    list: StepList,
    records: Vec<(char, u64)>,
    digest: Option<String>,
}

impl<'a, C: Compiler + ?Sized> IterativeExpander<'a, C> {
    fn new(compiler: &'a C, source: &'a SourceUnit, options: &ExpandOptions) -> Self {
        Self {
            compiler,
            source,
            cap: options.iteration_cap,
            list: StepList {
                pre: options.bracketing.pre.clone(),
                post: options.bracketing.post.clone(),
                ..StepList::default()
            },
            records: Vec::new(),
            digest: None,
        }
    }

    /// Compile with no user steps. If this fails, the bracketing itself
    /// cannot run.
    fn start(&mut self) -> Result<(), ExpansionError> {
        let outcome = self
            .compiler
            .build(self.source, &self.list)
            .map_err(ExpansionError::from_compiler)?;
        if let seqbench_ir::BuildOutcome::Failed { reason } = &outcome {
            return Err(ExpansionError::Failed {
                reason: format!("compilation without user steps failed: {reason}"),
            });
        }
        self.digest = ir_digest(&outcome);
        Ok(())
    }

    fn apply(&mut self, step: char, cleanup: bool) -> Result<(), ExpansionError> {
        if cleanup {
            self.list.cleanup.push(step);
        } else {
            self.list.main.push(step);
        }
        let started = Instant::now();
        let outcome = self
            .compiler
            .build(self.source, &self.list)
            .map_err(ExpansionError::from_compiler)?;
        let duration_us = started.elapsed().as_micros() as u64;
        self.digest = ir_digest(&outcome);
        self.records.push((step, duration_us));
        Ok(())
    }

    fn run_nodes(&mut self, nodes: &[SequenceNode], cleanup: bool) -> Result<(), ExpansionError> {
        for node in nodes {
            match node {
                SequenceNode::Leaf(step) => self.apply(step.node.abbreviation(), cleanup)?,
                SequenceNode::Group(group) if !group.repeat_until_stable => {
                    self.run_nodes(&group.children, cleanup)?
                }
                SequenceNode::Group(group) => self.run_group(group, cleanup)?,
            }
        }
        Ok(())
    }

    fn run_group(&mut self, group: &Group, cleanup: bool) -> Result<(), ExpansionError> {
        let mut iteration = 0;
        loop {
            iteration += 1;
            let before = self.digest.clone();
            self.run_nodes(&group.children, cleanup)?;
            if self.digest.is_none() {
                return Err(ExpansionError::Failed {
                    reason: format!(
                        "compilation failed at the end of the repeated group at offset {}",
                        group.span.start
                    ),
                });
            }
            if self.digest == before {
                debug!(offset = group.span.start, iteration, "group stabilized");
                return Ok(());
            }
            if iteration >= self.cap {
                return Err(ExpansionError::IterationLimitExceeded {
                    cap: self.cap,
                    position: group.span.start,
                });
            }
        }
    }

    fn finish(self, cleanup_boundary: Option<usize>) -> ExpandedRun {
        let pre = self.list.pre.chars().map(|c| (c, 0, true));
        let user = self.records.into_iter().map(|(c, us)| (c, us, false));
        let post = self.list.post.chars().map(|c| (c, 0, true));
        ExpandedRun::from_steps(pre.chain(user).chain(post), cleanup_boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compiled;
    use seqbench_dsl::StepCatalogue;
    use seqbench_ir::{BuildFailure, BuildOutcome};
    use std::collections::BTreeMap;

    /// Each step changes the program a limited number of times; the IR is
    /// the per-step count of effective applications.
    struct Saturating {
        limits: BTreeMap<char, usize>,
    }

    impl Compiler for Saturating {
        fn trace(&self, _: &SourceUnit, _: &str) -> Result<ExpandedRun, CompilerError> {
            Err(CompilerError::TraceUnsupported)
        }

        fn build(&self, _: &SourceUnit, steps: &StepList) -> Result<BuildOutcome, CompilerError> {
            let mut counts: BTreeMap<char, usize> = BTreeMap::new();
            for step in steps.render().chars().filter(|c| *c != ':') {
                if step == 'z' {
                    return Ok(BuildOutcome::Failed {
                        reason: BuildFailure::StackTooDeep {
                            message: "z".into(),
                        },
                    });
                }
                let limit = self.limits.get(&step).copied().unwrap_or(usize::MAX);
                let count = counts.entry(step).or_default();
                *count = (*count + 1).min(limit);
            }
            Ok(compiled("00".into(), Some(format!("{counts:?}"))))
        }
    }

    fn options(cap: usize) -> ExpandOptions {
        ExpandOptions {
            mode: ExpansionMode::Iterative,
            iteration_cap: cap,
            catalogue: StepCatalogue::from_pairs([
                ('a', "A"),
                ('b', "B"),
                ('x', "X"),
                ('y', "Y"),
                ('z', "Z"),
            ])
            .unwrap(),
            ..ExpandOptions::default()
        }
    }

    fn saturating() -> Saturating {
        Saturating {
            limits: BTreeMap::from([('x', 2), ('y', 2)]),
        }
    }

    fn source() -> SourceUnit {
        SourceUnit::new("c", "c.yul")
    }

    #[test]
    fn repeat_group_runs_to_fixed_point() {
        let run = expand(&saturating(), &source(), "a[xy]:", &options(12)).unwrap();
        assert_eq!(run.main_user_notation(), "axyxyxy");
        assert_eq!(run.cleanup_boundary, Some(7));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let err = expand(&saturating(), &source(), "a[xy]:", &options(2)).unwrap_err();
        assert!(matches!(
            err,
            ExpansionError::IterationLimitExceeded { cap: 2, position: 1 }
        ));
    }

    #[test]
    fn one_shot_group_runs_once() {
        let run = expand(&saturating(), &source(), "[!xy]b:", &options(12)).unwrap();
        assert_eq!(run.main_user_notation(), "xyb");
    }

    #[test]
    fn bracketing_steps_are_hardcoded() {
        let mut opts = options(12);
        opts.bracketing = crate::config::BracketingPolicy::new("b", "a");
        let run = expand(&saturating(), &source(), "x:y", &opts).unwrap();
        assert_eq!(
            run.signature(),
            vec![('b', true), ('x', false), ('y', false), ('a', true)]
        );
        assert_eq!(run.cleanup_boundary, Some(2));
        assert_eq!(run.user_step_count(), 1);
    }

    #[test]
    fn failure_inside_repeat_group_fails_expansion() {
        let err = expand(&saturating(), &source(), "[xz]:", &options(12)).unwrap_err();
        assert!(matches!(err, ExpansionError::Failed { .. }));
    }

    #[test]
    fn malformed_notation_fails_before_compiling() {
        let err = expand(&saturating(), &source(), "a[x", &options(12)).unwrap_err();
        assert!(matches!(err, ExpansionError::Malformed(_)));
    }

    /// Instrumented compiler that reports a fixed step log.
    struct Logged {
        main: &'static str,
        cleanup: &'static str,
    }

    impl Compiler for Logged {
        fn trace(&self, _: &SourceUnit, _: &str) -> Result<ExpandedRun, CompilerError> {
            let steps = self.main.chars().chain(self.cleanup.chars());
            Ok(ExpandedRun::from_steps(
                steps.map(|c| (c, 1, false)),
                Some(self.main.chars().count()),
            ))
        }

        fn build(&self, _: &SourceUnit, _: &StepList) -> Result<BuildOutcome, CompilerError> {
            Ok(compiled("00".into(), None))
        }
    }

    fn trace_options(cap: usize) -> ExpandOptions {
        ExpandOptions {
            mode: ExpansionMode::Trace,
            ..options(cap)
        }
    }

    #[test]
    fn logged_run_within_the_cap_is_accepted() {
        let compiler = Logged {
            main: "axyxyb",
            cleanup: "y",
        };
        let run = expand(&compiler, &source(), "a[xy]b:y", &trace_options(2)).unwrap();
        assert_eq!(run.main_user_notation(), "axyxyb");
    }

    #[test]
    fn runaway_step_log_hits_the_iteration_cap() {
        let compiler = Logged {
            main: "xyxyxyxyxyxyxyxyxyxyxyxyxyxyxyxyxyxyxyxy",
            cleanup: "",
        };
        let err = expand(&compiler, &source(), "[xy]:", &trace_options(2)).unwrap_err();
        assert!(matches!(
            err,
            ExpansionError::IterationLimitExceeded { cap: 2, position: 0 }
        ));
        // The same log is fine once the cap allows twenty rounds.
        let run = expand(&compiler, &source(), "[xy]:", &trace_options(20)).unwrap();
        assert_eq!(run.user_step_count(), 40);
    }

    #[test]
    fn step_log_that_disagrees_with_the_tree_fails() {
        let reordered = Logged {
            main: "ayxb",
            cleanup: "",
        };
        let err = expand(&reordered, &source(), "a[xy]b:", &trace_options(12)).unwrap_err();
        assert!(
            matches!(&err, ExpansionError::Failed { reason } if reason.contains("user step 1")),
            "{err}"
        );

        let truncated = Logged {
            main: "axy",
            cleanup: "",
        };
        let err = expand(&truncated, &source(), "a[xy]b:", &trace_options(12)).unwrap_err();
        assert!(matches!(err, ExpansionError::Failed { .. }));

        let cleanup_mismatch = Logged {
            main: "ab",
            cleanup: "x",
        };
        let err = expand(&cleanup_mismatch, &source(), "ab:y", &trace_options(12)).unwrap_err();
        assert!(
            matches!(&err, ExpansionError::Failed { reason } if reason.starts_with("cleanup")),
            "{err}"
        );
    }

    #[test]
    fn ambiguous_group_exit_is_resolved_by_the_rest_of_the_log() {
        // After the first "xy" the next 'x' could start another round or be
        // the trailing leaf.
        let compiler = Logged {
            main: "xyxyx",
            cleanup: "",
        };
        let run = expand(&compiler, &source(), "[xy]x:", &trace_options(12)).unwrap();
        assert_eq!(run.main_user_notation(), "xyxyx");
    }

    #[test]
    fn trace_mode_surfaces_compiler_errors_as_failures() {
        let mut opts = options(12);
        opts.mode = ExpansionMode::Trace;
        let err = expand(&saturating(), &source(), "a:", &opts).unwrap_err();
        assert!(matches!(err, ExpansionError::Failed { .. }));
    }
}
