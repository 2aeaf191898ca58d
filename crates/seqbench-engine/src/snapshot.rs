//! On-disk snapshots of every prefix build.
//!
//! Layout per prefix: `<contract>-step-<k:05>[-<step>].bin` (bytecode),
//! `.yul` (optimized IR) and `.json` (build info).

use std::path::{Path, PathBuf};

use seqbench_ir::BuildArtifact;
use serde::Serialize;

use crate::prefix::{BuildError, PrefixPlan};

#[derive(Debug, Serialize)]
struct SnapshotInfo<'a> {
    index: usize,
    /// User steps of this prefix.
    prefix: String,
    step: Option<char>,
    steps: &'a str,
    status: &'a str,
    build_duration_us: u64,
    bytecode_size: Option<usize>,
    bytecode_sha256: Option<&'a str>,
    error: Option<String>,
}

pub fn snapshot_stem(contract: &str, prefix: usize, step: Option<char>) -> String {
    match step {
        Some(step) => format!("{contract}-step-{prefix:05}-{step}"),
        None => format!("{contract}-step-{prefix:05}"),
    }
}

pub fn write_snapshots(
    dir: &Path,
    contract: &str,
    plan: &PrefixPlan,
    artifacts: &[BuildArtifact],
) -> Result<(), BuildError> {
    std::fs::create_dir_all(dir).map_err(|source| BuildError::Snapshot {
        path: dir.to_path_buf(),
        source,
    })?;
    for artifact in artifacts {
        let k = artifact.prefix();
        let step = plan.last_step(k).map(|s| s.abbreviation);
        let stem = snapshot_stem(contract, k, step);

        if let Some(bytecode) = artifact.bytecode() {
            write(dir.join(format!("{stem}.bin")), bytecode)?;
        }
        if let Some(ir) = artifact.metadata().and_then(|m| m.optimized_ir.as_deref()) {
            write(dir.join(format!("{stem}.yul")), ir)?;
        }

        let info = SnapshotInfo {
            index: k,
            prefix: plan.user_steps(k).iter().map(|s| s.abbreviation).collect(),
            step,
            steps: &artifact.steps,
            status: artifact.status(),
            build_duration_us: artifact.build_duration_us,
            bytecode_size: artifact.metadata().map(|m| m.bytecode_size),
            bytecode_sha256: artifact.metadata().map(|m| m.bytecode_sha256.as_str()),
            error: artifact.failure().map(ToString::to_string),
        };
        let json = serde_json::to_string_pretty(&info).map_err(|e| BuildError::Snapshot {
            path: dir.join(format!("{stem}.json")),
            source: std::io::Error::other(e),
        })?;
        write(dir.join(format!("{stem}.json")), &json)?;
    }
    Ok(())
}

fn write(path: PathBuf, contents: &str) -> Result<(), BuildError> {
    std::fs::write(&path, contents).map_err(|source| BuildError::Snapshot { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_format() {
        assert_eq!(snapshot_stem("token", 0, None), "token-step-00000");
        assert_eq!(snapshot_stem("token", 12, Some('D')), "token-step-00012-D");
    }
}
