//! Options shared by the pipeline stages.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use seqbench_dsl::{BenchmarkPolicy, Dialect, StepCatalogue};
use serde::{Deserialize, Serialize};

/// Upper bound on iterations of one repeat-until-stable group.
pub const DEFAULT_ITERATION_CAP: usize = 12;

pub const DEFAULT_MAX_SESSION_RESTARTS: usize = 3;

/// How the executed step list of a notation is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMode {
    /// Ask an instrumented compiler for its step log.
    #[default]
    Trace,
    /// Drive the compiler one step at a time and detect fixed points from
    /// the optimized IR.
    Iterative,
}

impl ExpansionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpansionMode::Trace => "trace",
            ExpansionMode::Iterative => "iterative",
        }
    }
}

impl fmt::Display for ExpansionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(ExpansionMode::Trace),
            "iterative" => Ok(ExpansionMode::Iterative),
            other => Err(format!(
                "unknown expansion mode '{other}' (expected 'trace' or 'iterative')"
            )),
        }
    }
}

/// Steps that always run before and after the user sequence.
///
/// Both lists are empty for compilers that inject their own canonicalization
/// passes; those show up as hard-coded records in the step log instead.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BracketingPolicy {
    #[serde(default)]
    pub pre: String,
    #[serde(default)]
    pub post: String,
}

impl BracketingPolicy {
    pub fn new(pre: impl Into<String>, post: impl Into<String>) -> Self {
        Self {
            pre: pre.into(),
            post: post.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandOptions {
    pub mode: ExpansionMode,
    pub iteration_cap: usize,
    pub dialect: Dialect,
    pub catalogue: StepCatalogue,
    pub bracketing: BracketingPolicy,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            mode: ExpansionMode::default(),
            iteration_cap: DEFAULT_ITERATION_CAP,
            dialect: Dialect::default(),
            catalogue: StepCatalogue::standard(),
            bracketing: BracketingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Worker threads per unit. `0` and `1` both mean sequential.
    pub parallelism: usize,
    /// Write `.bin`/`.yul`/`.json` snapshots of every prefix here.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOptions {
    pub max_session_restarts: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            max_session_restarts: DEFAULT_MAX_SESSION_RESTARTS,
        }
    }
}

/// Everything a unit run needs besides its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchOptions {
    pub dialect: Dialect,
    pub catalogue: StepCatalogue,
    pub policy: BenchmarkPolicy,
    pub expansion_mode: ExpansionMode,
    pub iteration_cap: usize,
    pub bracketing: BracketingPolicy,
    /// Extend prefixes past the main list into the cleanup list.
    pub include_cleanup: bool,
    pub build_parallelism: usize,
    pub snapshot_dir: Option<PathBuf>,
    pub max_session_restarts: usize,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            catalogue: StepCatalogue::standard(),
            policy: BenchmarkPolicy::default(),
            expansion_mode: ExpansionMode::default(),
            iteration_cap: DEFAULT_ITERATION_CAP,
            bracketing: BracketingPolicy::default(),
            include_cleanup: false,
            build_parallelism: 1,
            snapshot_dir: None,
            max_session_restarts: DEFAULT_MAX_SESSION_RESTARTS,
        }
    }
}

impl BenchOptions {
    pub fn expand_options(&self) -> ExpandOptions {
        ExpandOptions {
            mode: self.expansion_mode,
            iteration_cap: self.iteration_cap,
            dialect: self.dialect,
            catalogue: self.catalogue.clone(),
            bracketing: self.bracketing.clone(),
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            parallelism: self.build_parallelism,
            snapshot_dir: self.snapshot_dir.clone(),
        }
    }

    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            max_session_restarts: self.max_session_restarts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = BenchOptions::default();
        assert_eq!(options.iteration_cap, 12);
        assert_eq!(options.max_session_restarts, 3);
        assert_eq!(options.expansion_mode, ExpansionMode::Trace);
        assert!(options.policy.require_cleanup_marker);
        assert!(!options.include_cleanup);
        assert_eq!(options.expand_options().iteration_cap, 12);
    }

    #[test]
    fn expansion_mode_round_trips_through_str() {
        for mode in [ExpansionMode::Trace, ExpansionMode::Iterative] {
            assert_eq!(mode.as_str().parse::<ExpansionMode>(), Ok(mode));
        }
        assert!("fixpoint".parse::<ExpansionMode>().is_err());
    }
}
