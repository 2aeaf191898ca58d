//! Per-prefix build outcomes and the insert-once store that holds them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// One benchmarking unit: a contract compiled with one sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitKey {
    pub contract: String,
    pub sequence: String,
}

impl UnitKey {
    pub fn new(contract: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            sequence: sequence.into(),
        }
    }

    pub fn artifact(&self, prefix: usize) -> ArtifactKey {
        ArtifactKey {
            unit: self.clone(),
            prefix,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ '{}'", self.contract, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ArtifactKey {
    pub unit: UnitKey,
    pub prefix: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildMetadata {
    pub bytecode_size: usize,
    pub bytecode_sha256: String,
    pub optimized_ir: Option<String>,
}

/// Why a prefix could not be compiled. Recorded as data, never thrown.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "kind", rename_all = "snake_case"))]
pub enum BuildFailure {
    /// Code generation ran out of reachable stack slots. A later step can
    /// resolve this, so it is expected for intermediate prefixes.
    StackTooDeep { message: String },
    CompilerRejected { messages: Vec<String> },
    MalformedOutput { message: String },
}

impl BuildFailure {
    pub fn status(&self) -> &'static str {
        match self {
            BuildFailure::StackTooDeep { .. } => "stack-too-deep",
            BuildFailure::CompilerRejected { .. } => "compiler-rejected",
            BuildFailure::MalformedOutput { .. } => "malformed-output",
        }
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildFailure::StackTooDeep { message } => write!(f, "stack too deep: {message}"),
            BuildFailure::CompilerRejected { messages } => {
                write!(f, "compilation failed: {}", messages.join("; "))
            }
            BuildFailure::MalformedOutput { message } => {
                write!(f, "unreadable compiler output: {message}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "status", rename_all = "snake_case"))]
pub enum BuildOutcome {
    Compiled {
        /// Hex without `0x`.
        bytecode: String,
        metadata: BuildMetadata,
    },
    Failed {
        reason: BuildFailure,
    },
}

/// Result of compiling one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildArtifact {
    pub key: ArtifactKey,
    /// Explicit step list handed to the compiler.
    pub steps: String,
    pub outcome: BuildOutcome,
    /// Wall-clock time of the whole compiler invocation for this prefix.
    pub build_duration_us: u64,
}

impl BuildArtifact {
    pub fn prefix(&self) -> usize {
        self.key.prefix
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Compiled { .. })
    }

    pub fn bytecode(&self) -> Option<&str> {
        match &self.outcome {
            BuildOutcome::Compiled { bytecode, .. } => Some(bytecode),
            BuildOutcome::Failed { .. } => None,
        }
    }

    pub fn metadata(&self) -> Option<&BuildMetadata> {
        match &self.outcome {
            BuildOutcome::Compiled { metadata, .. } => Some(metadata),
            BuildOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&BuildFailure> {
        match &self.outcome {
            BuildOutcome::Compiled { .. } => None,
            BuildOutcome::Failed { reason } => Some(reason),
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.outcome {
            BuildOutcome::Compiled { .. } => "success",
            BuildOutcome::Failed { reason } => reason.status(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("artifact for {unit} prefix {prefix} was already stored")]
    Duplicate { unit: UnitKey, prefix: usize },
}

/// Arena of immutable artifacts keyed by (contract, sequence, prefix).
///
/// Values are never replaced once inserted; readers share them through `Arc`.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: BTreeMap<ArtifactKey, Arc<BuildArtifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: BuildArtifact) -> Result<Arc<BuildArtifact>, StoreError> {
        if self.entries.contains_key(&artifact.key) {
            return Err(StoreError::Duplicate {
                unit: artifact.key.unit.clone(),
                prefix: artifact.key.prefix,
            });
        }
        let shared = Arc::new(artifact);
        self.entries.insert(shared.key.clone(), Arc::clone(&shared));
        Ok(shared)
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&Arc<BuildArtifact>> {
        self.entries.get(key)
    }

    /// Artifacts of one unit, prefix-ascending.
    pub fn unit_artifacts<'a>(
        &'a self,
        unit: &'a UnitKey,
    ) -> impl Iterator<Item = &'a Arc<BuildArtifact>> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| &key.unit == unit)
            .map(|(_, artifact)| artifact)
    }

    /// Drop everything stored for `unit`, e.g. when the unit is cancelled.
    pub fn discard_unit(&mut self, unit: &UnitKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| &key.unit != unit);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(unit: &UnitKey, prefix: usize, compiled: bool) -> BuildArtifact {
        let outcome = if compiled {
            BuildOutcome::Compiled {
                bytecode: "6000".into(),
                metadata: BuildMetadata {
                    bytecode_size: 2,
                    bytecode_sha256: "00".repeat(32),
                    optimized_ir: None,
                },
            }
        } else {
            BuildOutcome::Failed {
                reason: BuildFailure::StackTooDeep {
                    message: "Variable too deep".into(),
                },
            }
        };
        BuildArtifact {
            key: unit.artifact(prefix),
            steps: ":".into(),
            outcome,
            build_duration_us: 10,
        }
    }

    #[test]
    fn insert_once() {
        let unit = UnitKey::new("Token", "abc:");
        let mut store = ArtifactStore::new();
        store.insert(artifact(&unit, 0, true)).unwrap();
        let err = store.insert(artifact(&unit, 0, false)).unwrap_err();
        assert_eq!(
            err,
            StoreError::Duplicate {
                unit: unit.clone(),
                prefix: 0
            }
        );
        assert!(store.get(&unit.artifact(0)).unwrap().is_compiled());
    }

    #[test]
    fn unit_artifacts_are_prefix_ordered_and_isolated() {
        let a = UnitKey::new("A", "x:");
        let b = UnitKey::new("B", "x:");
        let mut store = ArtifactStore::new();
        store.insert(artifact(&a, 2, true)).unwrap();
        store.insert(artifact(&b, 0, true)).unwrap();
        store.insert(artifact(&a, 0, false)).unwrap();
        store.insert(artifact(&a, 1, true)).unwrap();

        let prefixes: Vec<usize> = store.unit_artifacts(&a).map(|x| x.prefix()).collect();
        assert_eq!(prefixes, vec![0, 1, 2]);

        assert_eq!(store.discard_unit(&a), 3);
        assert_eq!(store.len(), 1);
        assert!(store.get(&b.artifact(0)).is_some());
    }

    #[test]
    fn status_strings() {
        let unit = UnitKey::new("A", "x:");
        assert_eq!(artifact(&unit, 0, true).status(), "success");
        assert_eq!(artifact(&unit, 0, false).status(), "stack-too-deep");
        assert!(artifact(&unit, 0, false).bytecode().is_none());
    }
}
