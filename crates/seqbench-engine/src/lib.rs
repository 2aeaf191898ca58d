#![doc = include_str!("../README.md")]

//! seqbench engine.
//!
//! This crate drives the benchmark pipeline for one (contract, sequence)
//! unit: sequence expansion, prefix builds, call replay against an execution
//! backend, and aggregation into a per-prefix report.

pub mod aggregate;
pub mod backend;
pub mod compiler;
pub mod config;
pub mod expansion;
pub mod manifest;
pub mod prefix;
pub mod replay;
pub mod sink;
pub mod snapshot;
pub mod unit;

pub use aggregate::{aggregate, AggregateError};
pub use backend::{BackendError, ExecutionBackend, SharedBackend};
pub use compiler::{Compiler, CompilerError, SourceUnit, StepList};
pub use config::{BenchOptions, BracketingPolicy, ExpansionMode};
pub use expansion::{expand, expand_sequence, ExpansionError};
pub use prefix::{build_prefixes, BuildError, PrefixPlan};
pub use replay::{replay_trace, ReplayError, ReplayJournal, ReplaySummary};
pub use unit::{run_unit, run_units, BenchUnit, CancelToken, UnitError};
