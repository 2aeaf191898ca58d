//! Compiler collaborator.
//!
//! The engine never interprets optimizer steps itself. It hands a compiler
//! either a notation string (to learn what actually ran) or an explicit flat
//! step list (to build one prefix), and gets back an [`ExpandedRun`] or a
//! [`BuildOutcome`]. Failures that belong to one prefix come back as
//! `BuildOutcome::Failed` data; [`CompilerError`] is reserved for the
//! compiler being unusable.

pub mod solc;

use std::fmt;
use std::path::{Path, PathBuf};

use seqbench_ir::{BuildMetadata, BuildOutcome, ExpandedRun};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use solc::SolcCompiler;

/// The program being benchmarked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Contract name used in keys and snapshot file names.
    pub name: String,
    pub path: PathBuf,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Name taken from the file stem, e.g. `token` for `contracts/token.yul`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("contract")
            .to_string();
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A flat, group-free step list for one build.
///
/// Rendered as `<pre><main>:<cleanup><post>`, so it never contains brackets
/// and no repeat logic can run inside the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepList {
    pub pre: String,
    pub main: String,
    pub cleanup: String,
    pub post: String,
}

impl StepList {
    pub fn new(main: impl Into<String>, cleanup: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            cleanup: cleanup.into(),
            ..Self::default()
        }
    }

    /// User steps only, main then cleanup.
    pub fn user_steps(&self) -> String {
        let mut out = self.main.clone();
        out.push_str(&self.cleanup);
        out
    }

    pub fn render(&self) -> String {
        format!("{}{}:{}{}", self.pre, self.main, self.cleanup, self.post)
    }
}

impl fmt::Display for StepList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("compiler '{program}' could not be started: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("compiler I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("compiler exited with {status}: {stderr}")]
    Crashed { status: String, stderr: String },
    #[error("compiler did not produce a step log: {0}")]
    MissingStepLog(String),
    #[error("unreadable step log: {0}")]
    InvalidStepLog(String),
    #[error("step tracing is not supported by this compiler")]
    TraceUnsupported,
}

/// A compiler that can expand notation and build explicit step lists.
///
/// Implementations must be safe to call from several build workers at once.
pub trait Compiler: Sync {
    /// Run the full notation once and report every executed step.
    fn trace(&self, source: &SourceUnit, notation: &str) -> Result<ExpandedRun, CompilerError>;

    /// Compile `source` with exactly the steps in `steps`.
    fn build(&self, source: &SourceUnit, steps: &StepList) -> Result<BuildOutcome, CompilerError>;
}

impl<C: Compiler + ?Sized> Compiler for &C {
    fn trace(&self, source: &SourceUnit, notation: &str) -> Result<ExpandedRun, CompilerError> {
        (**self).trace(source, notation)
    }

    fn build(&self, source: &SourceUnit, steps: &StepList) -> Result<BuildOutcome, CompilerError> {
        (**self).build(source, steps)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Successful outcome for `bytecode` (hex, no `0x`), with size and digest.
pub fn compiled(bytecode: String, optimized_ir: Option<String>) -> BuildOutcome {
    let metadata = BuildMetadata {
        bytecode_size: bytecode.len() / 2,
        bytecode_sha256: sha256_hex(bytecode.as_bytes()),
        optimized_ir,
    };
    BuildOutcome::Compiled { bytecode, metadata }
}

/// Fingerprint of the program after optimization, used to detect fixed
/// points. `None` when the build failed and there is nothing to compare.
pub fn ir_digest(outcome: &BuildOutcome) -> Option<String> {
    match outcome {
        BuildOutcome::Compiled { bytecode, metadata } => {
            let text = metadata.optimized_ir.as_deref().unwrap_or(bytecode);
            Some(sha256_hex(text.as_bytes()))
        }
        BuildOutcome::Failed { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_list_rendering() {
        let mut list = StepList::new("abcd", "");
        assert_eq!(list.render(), "abcd:");
        list.cleanup = "e".into();
        list.pre = "dh".into();
        list.post = "u".into();
        assert_eq!(list.to_string(), "dhabcd:eu");
        assert_eq!(list.user_steps(), "abcde");
    }

    #[test]
    fn compiled_outcome_metadata() {
        let outcome = compiled("6080604052".into(), Some("{ }".into()));
        let BuildOutcome::Compiled { metadata, .. } = &outcome else {
            panic!("expected compiled outcome");
        };
        assert_eq!(metadata.bytecode_size, 5);
        assert_eq!(metadata.bytecode_sha256.len(), 64);
        assert_eq!(ir_digest(&outcome), Some(sha256_hex(b"{ }")));
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn source_name_from_stem() {
        let source = SourceUnit::from_path("contracts/token.yul");
        assert_eq!(source.name, "token");
    }
}
