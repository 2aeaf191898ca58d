use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use seqbench_dsl::{check_policy, parse_with, BenchmarkPolicy, Dialect, ParseOptions, StepCatalogue};
use seqbench_ir::{parse_call_definitions, CallTrace, CallTraceError};

use crate::compiler::solc::DEFAULT_STEP_LOG_ENV;
use crate::compiler::SourceUnit;
use crate::config::{
    BenchOptions, BracketingPolicy, ExpansionMode, DEFAULT_ITERATION_CAP,
    DEFAULT_MAX_SESSION_RESTARTS,
};
use crate::unit::BenchUnit;

/// Current schema version for benchmark manifests.
pub const BENCH_MANIFEST_SCHEMA_VERSION: u32 = 1;

/// A benchmark suite: every contract is run against every sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchManifest {
    /// Schema version (must be exactly 1).
    pub schema_version: u32,
    /// Human-readable name for this suite.
    pub suite_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Notation dialect (`solc` or `marker`).
    #[serde(default = "default_dialect")]
    pub dialect: String,
    /// Expansion mode (`trace` or `iterative`).
    #[serde(default = "default_expansion_mode")]
    pub expansion_mode: String,
    #[serde(default = "default_iteration_cap")]
    pub iteration_cap: usize,
    #[serde(default)]
    pub include_cleanup: bool,
    #[serde(default = "default_build_parallelism")]
    pub build_parallelism: usize,
    #[serde(default = "default_max_session_restarts")]
    pub max_session_restarts: usize,
    #[serde(default)]
    pub bracketing: BracketingPolicy,
    /// Require `:` and forbid cleanup steps next to groups.
    #[serde(default = "default_true")]
    pub enforce_policy: bool,
    #[serde(default)]
    pub compiler: CompilerSection,
    #[serde(default)]
    pub backend: BackendSection,
    pub sequences: Vec<SequenceEntry>,
    pub contracts: Vec<ContractEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerSection {
    #[serde(default = "default_compiler_program")]
    pub program: String,
    /// Environment variable the instrumented compiler reads its step log path from.
    #[serde(default = "default_step_log_env")]
    pub step_log_env: String,
}

impl Default for CompilerSection {
    fn default() -> Self {
        Self {
            program: default_compiler_program(),
            step_log_env: default_step_log_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    #[serde(default = "default_backend_program")]
    pub program: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Name of the environment variable holding the deployer's private key.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    #[serde(default)]
    pub capture_return_data: bool,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            program: default_backend_program(),
            rpc_url: default_rpc_url(),
            private_key_env: default_private_key_env(),
            capture_return_data: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceEntry {
    pub name: String,
    pub notation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractEntry {
    pub name: String,
    /// Path to the `.yul` source, relative to the manifest.
    pub source: String,
    /// Path to the call definition file. No file means deploy only.
    #[serde(default)]
    pub calls: Option<String>,
}

/// Validation error for a benchmark manifest.
#[derive(Debug, Clone)]
pub struct ManifestValidationError {
    pub message: String,
}

impl std::fmt::Display for ManifestValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid manifest:\n{}", render_errors(.errors))]
    Invalid { errors: Vec<ManifestValidationError> },
    #[error("{}: {source}", path.display())]
    Calls {
        path: PathBuf,
        #[source]
        source: CallTraceError,
    },
}

fn render_errors(errors: &[ManifestValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn default_dialect() -> String {
    Dialect::Solc.as_str().into()
}

fn default_expansion_mode() -> String {
    ExpansionMode::Trace.as_str().into()
}

fn default_iteration_cap() -> usize {
    DEFAULT_ITERATION_CAP
}

fn default_build_parallelism() -> usize {
    1
}

fn default_max_session_restarts() -> usize {
    DEFAULT_MAX_SESSION_RESTARTS
}

fn default_true() -> bool {
    true
}

fn default_compiler_program() -> String {
    "solc".into()
}

fn default_step_log_env() -> String {
    DEFAULT_STEP_LOG_ENV.into()
}

fn default_backend_program() -> String {
    "cast".into()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".into()
}

fn default_private_key_env() -> String {
    "SEQBENCH_PRIVATE_KEY".into()
}

impl BenchManifest {
    pub fn policy(&self) -> BenchmarkPolicy {
        if self.enforce_policy {
            BenchmarkPolicy::default()
        } else {
            BenchmarkPolicy::permissive()
        }
    }

    /// Pipeline options. Call after [`validate_manifest`]; unparseable
    /// enum fields fall back to their defaults.
    pub fn bench_options(&self) -> BenchOptions {
        BenchOptions {
            dialect: self.dialect.parse().unwrap_or_default(),
            catalogue: StepCatalogue::standard(),
            policy: self.policy(),
            expansion_mode: self.expansion_mode.parse().unwrap_or_default(),
            iteration_cap: self.iteration_cap,
            bracketing: self.bracketing.clone(),
            include_cleanup: self.include_cleanup,
            build_parallelism: self.build_parallelism,
            snapshot_dir: None,
            max_session_restarts: self.max_session_restarts,
        }
    }

    /// One unit per (contract, sequence), contract-major.
    pub fn units(&self, base_dir: &Path) -> Result<Vec<BenchUnit>, ManifestError> {
        let mut units = Vec::with_capacity(self.contracts.len() * self.sequences.len());
        for contract in &self.contracts {
            let calls = match &contract.calls {
                Some(file) => {
                    let path = base_dir.join(file);
                    let text = std::fs::read_to_string(&path).map_err(|source| {
                        ManifestError::Io {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    parse_call_definitions(&text)
                        .map_err(|source| ManifestError::Calls { path, source })?
                }
                None => Vec::new(),
            };
            let trace = CallTrace::new(contract.name.clone(), calls);
            let source = SourceUnit::new(contract.name.clone(), base_dir.join(&contract.source));
            for sequence in &self.sequences {
                units.push(BenchUnit::new(
                    source.clone(),
                    sequence.name.clone(),
                    sequence.notation.clone(),
                    trace.clone(),
                ));
            }
        }
        Ok(units)
    }
}

/// Read, parse and validate a manifest, including file existence checks
/// relative to the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<BenchManifest, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: BenchManifest =
        serde_json::from_str(&text).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut errors = validate_manifest(&manifest);
    errors.extend(validate_manifest_files(&manifest, base_dir));
    if !errors.is_empty() {
        return Err(ManifestError::Invalid { errors });
    }
    Ok(manifest)
}

/// Validate a benchmark manifest and return any errors found.
///
/// This enforces the schema contract:
/// - `schema_version` must be exactly `BENCH_MANIFEST_SCHEMA_VERSION`.
/// - `suite_name` must be non-empty.
/// - `dialect` must be `solc | marker`; `expansion_mode` must be `trace | iterative`.
/// - `iteration_cap` and `build_parallelism` must be at least 1.
/// - bracketing steps must be known step abbreviations.
/// - `sequences` and `contracts` must be non-empty with unique, non-empty names.
/// - every notation must parse in the manifest's dialect and, with
///   `enforce_policy`, pass the benchmark policy.
/// - contract `source` must end with `.yul`.
pub fn validate_manifest(manifest: &BenchManifest) -> Vec<ManifestValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ManifestValidationError { message });

    if manifest.schema_version != BENCH_MANIFEST_SCHEMA_VERSION {
        push(format!(
            "schema_version must be {}, got {}",
            BENCH_MANIFEST_SCHEMA_VERSION, manifest.schema_version
        ));
    }

    if manifest.suite_name.trim().is_empty() {
        push("suite_name must be non-empty".into());
    }

    let dialect = match manifest.dialect.parse::<Dialect>() {
        Ok(dialect) => Some(dialect),
        Err(_) => {
            push(format!(
                "dialect must be 'solc' or 'marker', got '{}'",
                manifest.dialect
            ));
            None
        }
    };

    if let Err(message) = manifest.expansion_mode.parse::<ExpansionMode>() {
        push(format!("expansion_mode: {message}"));
    }

    if manifest.iteration_cap == 0 {
        push("iteration_cap must be at least 1".into());
    }
    if manifest.build_parallelism == 0 {
        push("build_parallelism must be at least 1".into());
    }

    let catalogue = StepCatalogue::standard();
    for (field, steps) in [
        ("pre", &manifest.bracketing.pre),
        ("post", &manifest.bracketing.post),
    ] {
        for step in steps.chars().filter(|c| !c.is_whitespace()) {
            if !catalogue.contains(step) {
                push(format!("bracketing.{field}: unknown step '{step}'"));
            }
        }
    }

    if manifest.compiler.program.trim().is_empty() {
        push("compiler.program must be non-empty".into());
    }
    if manifest.backend.rpc_url.trim().is_empty() {
        push("backend.rpc_url must be non-empty".into());
    }
    if manifest.backend.private_key_env.trim().is_empty() {
        push("backend.private_key_env must be non-empty".into());
    }

    if manifest.sequences.is_empty() {
        push("sequences must be non-empty".into());
    }
    let policy = manifest.policy();
    let mut seen_sequences: HashSet<&str> = HashSet::new();
    for (i, sequence) in manifest.sequences.iter().enumerate() {
        let prefix = format!("sequences[{i}]");
        if sequence.name.trim().is_empty() {
            push(format!("{prefix}: name must be non-empty"));
        } else if !seen_sequences.insert(&sequence.name) {
            push(format!("{prefix}: duplicate name '{}'", sequence.name));
        }

        let Some(dialect) = dialect else {
            continue;
        };
        let options = ParseOptions::new(dialect, &catalogue);
        let checked = parse_with(&sequence.notation, &options)
            .and_then(|parsed| check_policy(&parsed, &sequence.notation, policy));
        if let Err(err) = checked {
            push(format!("{prefix}: notation rejected: {err}"));
        }
    }

    if manifest.contracts.is_empty() {
        push("contracts must be non-empty".into());
    }
    let mut seen_contracts: HashSet<&str> = HashSet::new();
    for (i, contract) in manifest.contracts.iter().enumerate() {
        let prefix = format!("contracts[{i}]");
        if contract.name.trim().is_empty() {
            push(format!("{prefix}: name must be non-empty"));
        } else if !seen_contracts.insert(&contract.name) {
            push(format!("{prefix}: duplicate name '{}'", contract.name));
        }

        if contract.source.trim().is_empty() {
            push(format!("{prefix}: source must be non-empty"));
        } else if !contract.source.ends_with(".yul") {
            push(format!("{prefix}: source must end with .yul"));
        }

        if let Some(calls) = &contract.calls {
            if calls.trim().is_empty() {
                push(format!("{prefix}: calls must be non-empty when given"));
            }
        }
    }

    errors
}

/// Validate that all file paths in a manifest exist relative to a base directory.
pub fn validate_manifest_files(
    manifest: &BenchManifest,
    base_dir: &Path,
) -> Vec<ManifestValidationError> {
    let mut errors = Vec::new();
    for (i, contract) in manifest.contracts.iter().enumerate() {
        let prefix = format!("contracts[{i}]");

        let source_path = base_dir.join(&contract.source);
        if !source_path.exists() {
            errors.push(ManifestValidationError {
                message: format!(
                    "{prefix}: source '{}' not found (resolved: {})",
                    contract.source,
                    source_path.display()
                ),
            });
        }

        if let Some(calls) = &contract.calls {
            let calls_path = base_dir.join(calls);
            if !calls_path.exists() {
                errors.push(ManifestValidationError {
                    message: format!(
                        "{prefix}: calls '{}' not found (resolved: {})",
                        calls,
                        calls_path.display()
                    ),
                });
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_manifest() -> BenchManifest {
        BenchManifest {
            schema_version: 1,
            suite_name: "test-suite".into(),
            description: Some("Test suite".into()),
            dialect: "solc".into(),
            expansion_mode: "trace".into(),
            iteration_cap: 12,
            include_cleanup: false,
            build_parallelism: 2,
            max_session_restarts: 3,
            bracketing: BracketingPolicy::default(),
            enforce_policy: true,
            compiler: CompilerSection::default(),
            backend: BackendSection::default(),
            sequences: vec![SequenceEntry {
                name: "default".into(),
                notation: "fD[xa]:".into(),
            }],
            contracts: vec![ContractEntry {
                name: "token".into(),
                source: "token.yul".into(),
                calls: Some("token.calls".into()),
            }],
        }
    }

    fn messages(m: &BenchManifest) -> Vec<String> {
        validate_manifest(m).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn valid_manifest_passes_validation() {
        let errors = messages(&valid_manifest());
        assert!(errors.is_empty(), "errors: {errors:?}");
    }

    #[test]
    fn wrong_schema_version_fails() {
        let mut m = valid_manifest();
        m.schema_version = 99;
        let errors = messages(&m);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("schema_version must be 1"));
    }

    #[test]
    fn all_problems_are_collected() {
        let mut m = valid_manifest();
        m.suite_name = " ".into();
        m.iteration_cap = 0;
        m.contracts[0].source = "token.sol".into();
        let errors = messages(&m);
        assert_eq!(errors.len(), 3, "errors: {errors:?}");
    }

    #[test]
    fn malformed_notation_fails() {
        let mut m = valid_manifest();
        m.sequences[0].notation = "fD[xa:".into();
        let errors = messages(&m);
        assert!(errors
            .iter()
            .any(|e| e.starts_with("sequences[0]: notation rejected")));
    }

    #[test]
    fn policy_can_be_disabled() {
        let mut m = valid_manifest();
        m.sequences[0].notation = "fD[xa]".into();
        assert!(messages(&m)
            .iter()
            .any(|e| e.contains("notation rejected")));
        m.enforce_policy = false;
        assert!(messages(&m).is_empty());
    }

    #[test]
    fn marker_dialect_changes_what_parses() {
        let mut m = valid_manifest();
        m.sequences[0].notation = "fD[xa]*:".into();
        assert!(!messages(&m).is_empty());
        m.dialect = "marker".into();
        assert!(messages(&m).is_empty());
    }

    #[test]
    fn duplicate_names_fail() {
        let mut m = valid_manifest();
        m.sequences.push(m.sequences[0].clone());
        m.contracts.push(m.contracts[0].clone());
        let errors = messages(&m);
        assert!(errors
            .iter()
            .any(|e| e.starts_with("sequences[1]: duplicate name")));
        assert!(errors
            .iter()
            .any(|e| e.starts_with("contracts[1]: duplicate name")));
    }

    #[test]
    fn unknown_enum_values_fail() {
        let mut m = valid_manifest();
        m.dialect = "vyper".into();
        m.expansion_mode = "guess".into();
        let errors = messages(&m);
        assert!(errors.iter().any(|e| e.contains("dialect")));
        assert!(errors.iter().any(|e| e.contains("expansion_mode")));
    }

    #[test]
    fn unknown_bracketing_step_fails() {
        let mut m = valid_manifest();
        m.bracketing = BracketingPolicy::new("d", "q");
        let errors = messages(&m);
        assert_eq!(errors, vec!["bracketing.post: unknown step 'q'".to_string()]);
    }

    #[test]
    fn defaults_apply() {
        let json = r#"{
            "schema_version": 1,
            "suite_name": "defaults",
            "sequences": [{"name": "s", "notation": "dhfo:"}],
            "contracts": [{"name": "c", "source": "c.yul"}]
        }"#;
        let manifest: BenchManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.dialect, "solc");
        assert_eq!(manifest.iteration_cap, 12);
        assert!(manifest.enforce_policy);
        assert_eq!(manifest.compiler.step_log_env, "SOLC_STEP_LOG");
        assert_eq!(manifest.backend.private_key_env, "SEQBENCH_PRIVATE_KEY");
        let options = manifest.bench_options();
        assert_eq!(options.expansion_mode, ExpansionMode::Trace);
        assert_eq!(options.policy, BenchmarkPolicy::default());
    }

    #[test]
    fn deny_unknown_fields() {
        let json = r#"{
            "schema_version": 1,
            "suite_name": "test",
            "sequences": [],
            "contracts": [],
            "private_key": "0x01"
        }"#;
        let result = serde_json::from_str::<BenchManifest>(json);
        assert!(result.is_err(), "unknown fields should be rejected");
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token.yul"), "{}").unwrap();
        let errors = validate_manifest_files(&valid_manifest(), dir.path());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("calls 'token.calls' not found"));
    }

    #[test]
    fn units_cross_contracts_with_sequences() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("token.calls"),
            "# setup\ntransfer(address,uint256) 0x01 5\nmint() --value 1\n",
        )
        .unwrap();
        let mut m = valid_manifest();
        m.sequences.push(SequenceEntry {
            name: "short".into(),
            notation: "u:".into(),
        });
        let units = m.units(dir.path()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].key.contract, "token");
        assert_eq!(units[1].key.sequence, "short");
        assert_eq!(units[0].calls.len(), 2);
        assert_eq!(units[0].source.path(), dir.path().join("token.yul"));
    }
}
