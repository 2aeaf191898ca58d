//! `solc --standard-json` as a compiler collaborator.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use seqbench_ir::{BuildFailure, BuildOutcome, ExpandedRun, StepExecution};

use super::{compiled, Compiler, CompilerError, SourceUnit, StepList};

pub const DEFAULT_STEP_LOG_ENV: &str = "SOLC_STEP_LOG";

static STEP_LOG_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct SolcCompiler {
    program: PathBuf,
    /// Environment variable through which an instrumented build is told
    /// where to write its step log.
    step_log_env: String,
}

impl Default for SolcCompiler {
    fn default() -> Self {
        Self::new("solc")
    }
}

impl SolcCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            step_log_env: DEFAULT_STEP_LOG_ENV.to_string(),
        }
    }

    pub fn with_step_log_env(mut self, name: impl Into<String>) -> Self {
        self.step_log_env = name.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(
        &self,
        source: &SourceUnit,
        optimizer_steps: &str,
        step_log: Option<&Path>,
    ) -> Result<String, CompilerError> {
        let input = standard_json_input(source.path(), optimizer_steps);
        let mut command = Command::new(&self.program);
        command.arg("--standard-json").arg("-");
        if let Some(dir) = source.path().parent().filter(|d| !d.as_os_str().is_empty()) {
            command.arg("--allow-paths").arg(dir);
        }
        if let Some(path) = step_log {
            command.env(&self.step_log_env, path);
        }
        debug!(
            program = %self.program.display(),
            steps = optimizer_steps,
            "invoking solc"
        );

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CompilerError::Unavailable {
                program: self.program.display().to_string(),
                source,
            })?;
        feed_stdin(&mut child, input.to_string().as_bytes())?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(CompilerError::Crashed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Write `input` to the child's stdin and close it. A child that cannot be
/// fed is killed and reaped before the error is returned.
fn feed_stdin(child: &mut Child, input: &[u8]) -> Result<(), CompilerError> {
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input),
        None => Err(std::io::Error::other("failed to capture solc stdin")),
    };
    if let Err(err) = written {
        let _ = child.kill();
        let _ = child.wait();
        return Err(CompilerError::Io(err));
    }
    Ok(())
}

impl Compiler for SolcCompiler {
    fn trace(&self, source: &SourceUnit, notation: &str) -> Result<ExpandedRun, CompilerError> {
        let log_path = std::env::temp_dir().join(format!(
            "seqbench-steplog-{}-{}.json",
            std::process::id(),
            STEP_LOG_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let output = self.run(source, notation, Some(&log_path));
        let log = std::fs::read_to_string(&log_path);
        let _ = std::fs::remove_file(&log_path);

        let outcome = classify_output(&output?);
        match log {
            Ok(text) => parse_step_log(&text),
            Err(_) => Err(CompilerError::MissingStepLog(match outcome {
                BuildOutcome::Failed { reason } => reason.to_string(),
                BuildOutcome::Compiled { .. } => format!(
                    "nothing was written to ${}; is the compiler instrumented?",
                    self.step_log_env
                ),
            })),
        }
    }

    fn build(&self, source: &SourceUnit, steps: &StepList) -> Result<BuildOutcome, CompilerError> {
        let output = self.run(source, &steps.render(), None)?;
        Ok(classify_output(&output))
    }
}

pub fn standard_json_input(path: &Path, optimizer_steps: &str) -> Value {
    let key = path.display().to_string();
    let url = key.clone();
    json!({
        "language": "Yul",
        "sources": { key: { "urls": [url] } },
        "settings": {
            "optimizer": {
                "enabled": true,
                "details": { "yulDetails": { "optimizerSteps": optimizer_steps } }
            },
            "outputSelection": { "*": { "*": ["evm.bytecode.object", "irOptimized"] } }
        }
    })
}

/// Turn standard JSON output into a build outcome.
pub fn classify_output(output: &str) -> BuildOutcome {
    let failed = |reason| BuildOutcome::Failed { reason };
    let value: Value = match serde_json::from_str(output) {
        Ok(value) => value,
        Err(err) => {
            return failed(BuildFailure::MalformedOutput {
                message: err.to_string(),
            })
        }
    };

    let errors = value
        .get("errors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let [only] = errors.as_slice() {
        let kind = only.get("type").and_then(Value::as_str).unwrap_or_default();
        let message = only.get("message").and_then(Value::as_str).unwrap_or_default();
        if kind == "InternalCompilerError" && message.contains("StackTooDeep") {
            return failed(BuildFailure::StackTooDeep {
                message: message.to_string(),
            });
        }
    }
    let messages: Vec<String> = errors
        .iter()
        .filter(|error| {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or_default();
            kind != "Warning" && kind != "Info"
        })
        .map(|error| {
            error
                .get("formattedMessage")
                .or_else(|| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .trim()
                .to_string()
        })
        .collect();
    if !messages.is_empty() {
        return failed(BuildFailure::CompilerRejected { messages });
    }

    let Some(sources) = value.get("contracts").and_then(Value::as_object) else {
        return failed(BuildFailure::MalformedOutput {
            message: "no contracts in output".into(),
        });
    };
    let contracts: Vec<&Value> = sources
        .values()
        .filter_map(Value::as_object)
        .flat_map(|contracts| contracts.values())
        .collect();
    let contract = match (sources.len(), contracts.as_slice()) {
        (1, [contract]) => *contract,
        (_, []) => {
            return failed(BuildFailure::MalformedOutput {
                message: "no contracts in output".into(),
            })
        }
        _ => {
            return failed(BuildFailure::CompilerRejected {
                messages: vec!["more than one file or contract in output".into()],
            })
        }
    };

    let Some(bytecode) = contract
        .pointer("/evm/bytecode/object")
        .and_then(Value::as_str)
    else {
        return failed(BuildFailure::MalformedOutput {
            message: "missing evm.bytecode.object".into(),
        });
    };
    let optimized_ir = contract
        .get("irOptimized")
        .and_then(Value::as_str)
        .map(str::to_string);
    compiled(bytecode.to_string(), optimized_ir)
}

#[derive(Debug, Deserialize)]
struct StepLogEntry {
    steps: Vec<LoggedStep>,
    #[serde(default)]
    cleanup_boundary: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LoggedStep {
    index: usize,
    step: String,
    duration_microsec: u64,
    hardcoded: bool,
}

/// Parse the instrumented compiler's step log. The first entry describes the
/// run of the outermost object.
pub fn parse_step_log(text: &str) -> Result<ExpandedRun, CompilerError> {
    let entries: Vec<StepLogEntry> =
        serde_json::from_str(text).map_err(|e| CompilerError::InvalidStepLog(e.to_string()))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| CompilerError::InvalidStepLog("step log is empty".into()))?;

    let mut steps = Vec::with_capacity(entry.steps.len());
    for logged in entry.steps {
        let mut chars = logged.step.chars();
        let (Some(abbreviation), None) = (chars.next(), chars.next()) else {
            return Err(CompilerError::InvalidStepLog(format!(
                "step {} is '{}', expected one abbreviation",
                logged.index, logged.step
            )));
        };
        steps.push(StepExecution {
            index: logged.index,
            abbreviation,
            duration_us: logged.duration_microsec,
            hardcoded: logged.hardcoded,
        });
    }
    Ok(ExpandedRun {
        steps,
        cleanup_boundary: entry.cleanup_boundary,
    })
}
