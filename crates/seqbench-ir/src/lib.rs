#![doc = include_str!("../README.md")]

//! Data model shared by the expansion oracle, the prefix build driver, the
//! call replay engine and the aggregator. Nothing in this crate performs I/O.

pub mod artifact;
pub mod execution;
pub mod report;
pub mod run;
pub mod trace;

pub use artifact::{
    ArtifactKey, ArtifactStore, BuildArtifact, BuildFailure, BuildMetadata, BuildOutcome,
    StoreError, UnitKey,
};
pub use execution::{CallFailure, DeploymentOutcome, DeploymentRecord, ExecutionKey, ExecutionRecord};
pub use report::{ExecutionRow, PrefixRow, Report, SummaryRow};
pub use run::{ExpandedRun, RunError, StepExecution};
pub use trace::{parse_call_definitions, CallSpec, CallTrace, CallTraceError};
