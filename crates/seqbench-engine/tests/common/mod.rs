#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;

use seqbench_dsl::{parse_with, Dialect, ParseOptions, SequenceNode, StepCatalogue};
use seqbench_engine::backend::{BackendError, CallOutcome, Deployment, ExecutionBackend};
use seqbench_engine::compiler::{compiled, Compiler, CompilerError, SourceUnit, StepList};
use seqbench_engine::unit::CancelToken;
use seqbench_ir::{BuildFailure, BuildOutcome, CallFailure, CallSpec, ExpandedRun};

pub fn fixture_path(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

pub fn source() -> SourceUnit {
    SourceUnit::new("fixture", "fixture.yul")
}

/// Checked-in description of how a fake optimizer behaves on a fixed IR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureModel {
    pub catalogue: BTreeMap<String, String>,
    /// How many times a step can still change the program.
    #[serde(default)]
    pub limits: BTreeMap<String, usize>,
    #[serde(default)]
    pub hardcoded_pre: String,
    #[serde(default)]
    pub hardcoded_post: String,
    /// User step lists whose build fails with StackTooDeep.
    #[serde(default)]
    pub stack_too_deep: Vec<String>,
    /// User step lists whose constructor reverts on deployment.
    #[serde(default)]
    pub constructor_reverts: Vec<String>,
    #[serde(default)]
    pub step_duration_us: u64,
}

/// Deterministic stand-in for an instrumented compiler.
///
/// The "IR" is the number of effective applications of each step. A step
/// stops changing the program once it reaches its limit, which is what lets
/// repeat-until-stable groups converge.
pub struct FixtureCompiler {
    model: FixtureModel,
    catalogue: StepCatalogue,
    builds: AtomicUsize,
    traces: AtomicUsize,
}

impl FixtureCompiler {
    pub fn load(name: &str) -> Self {
        let path = fixture_path(name);
        let text = std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to load {path}: {e}"));
        let model: FixtureModel =
            serde_json::from_str(&text).unwrap_or_else(|e| panic!("Bad fixture {path}: {e}"));
        Self::from_model(model)
    }

    pub fn from_model(model: FixtureModel) -> Self {
        let catalogue = StepCatalogue::from_pairs(
            model.catalogue
                .iter()
                .map(|(abbreviation, name)| (first_char(abbreviation), name.clone())),
        )
        .unwrap_or_else(|e| panic!("Bad fixture catalogue: {e}"));
        Self {
            model,
            catalogue,
            builds: AtomicUsize::new(0),
            traces: AtomicUsize::new(0),
        }
    }

    pub fn catalogue(&self) -> StepCatalogue {
        self.catalogue.clone()
    }

    pub fn model(&self) -> &FixtureModel {
        &self.model
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn trace_count(&self) -> usize {
        self.traces.load(Ordering::SeqCst)
    }

    fn limit(&self, step: char) -> usize {
        self.model
            .limits
            .iter()
            .find(|(abbreviation, _)| first_char(abbreviation) == step)
            .map_or(usize::MAX, |(_, limit)| *limit)
    }

    fn apply(&self, program: &mut BTreeMap<char, usize>, step: char) {
        let limit = self.limit(step);
        let count = program.entry(step).or_default();
        *count = (*count + 1).min(limit);
    }

    fn simulate(
        &self,
        nodes: &[SequenceNode],
        program: &mut BTreeMap<char, usize>,
        executed: &mut Vec<char>,
    ) {
        for node in nodes {
            match node {
                SequenceNode::Leaf(step) => {
                    let step = step.node.abbreviation();
                    self.apply(program, step);
                    executed.push(step);
                }
                SequenceNode::Group(group) if !group.repeat_until_stable => {
                    self.simulate(&group.children, program, executed)
                }
                SequenceNode::Group(group) => {
                    for _ in 0..64 {
                        let before = program.clone();
                        self.simulate(&group.children, program, executed);
                        if *program == before {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn first_char(text: &str) -> char {
    text.chars().next().unwrap_or_else(|| panic!("empty step key"))
}

impl Compiler for FixtureCompiler {
    fn trace(&self, _: &SourceUnit, notation: &str) -> Result<ExpandedRun, CompilerError> {
        self.traces.fetch_add(1, Ordering::SeqCst);
        let options = ParseOptions::new(Dialect::Solc, &self.catalogue);
        let sequence = parse_with(notation, &options).map_err(|e| CompilerError::Crashed {
            status: "exit status: 1".into(),
            stderr: e.to_string(),
        })?;

        let mut program = BTreeMap::new();
        let mut main = Vec::new();
        self.simulate(&sequence.main, &mut program, &mut main);
        let mut cleanup = Vec::new();
        if let Some(nodes) = &sequence.cleanup {
            self.simulate(nodes, &mut program, &mut cleanup);
        }

        let pre = self.model.hardcoded_pre.chars().count();
        let boundary = sequence.cleanup.as_ref().map(|_| pre + main.len());
        let duration = self.model.step_duration_us;
        let steps = self
            .model
            .hardcoded_pre
            .chars()
            .map(|c| (c, 1, true))
            .chain(main.into_iter().chain(cleanup).map(|c| (c, duration, false)))
            .chain(self.model.hardcoded_post.chars().map(|c| (c, 1, true)));
        Ok(ExpandedRun::from_steps(steps, boundary))
    }

    fn build(&self, _: &SourceUnit, steps: &StepList) -> Result<BuildOutcome, CompilerError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let user = steps.user_steps();
        if self.model.stack_too_deep.contains(&user) {
            return Ok(BuildOutcome::Failed {
                reason: BuildFailure::StackTooDeep {
                    message: format!("StackTooDeep after '{user}'"),
                },
            });
        }

        let mut program = BTreeMap::new();
        for step in steps.render().chars().filter(|c| *c != ':') {
            self.apply(&mut program, step);
        }
        let mut bytecode = if self.model.constructor_reverts.contains(&user) {
            String::from("fe")
        } else {
            String::from("60")
        };
        for (step, count) in &program {
            bytecode.push_str(&format!("{:02x}{:02x}", *step as u8, *count as u8));
        }
        Ok(compiled(bytecode, Some(format!("{program:?}"))))
    }
}

/// In-memory chain. Deployed bytecode starting with `fe` reverts in its
/// constructor; the first call to a contract costs more than later ones, so
/// gas depends on the calls executed before it.
#[derive(Debug, Default)]
pub struct ScriptedChain {
    contracts: BTreeMap<String, (String, usize)>,
    next_address: usize,
    reverting: BTreeSet<String>,
    invalid_opcode: BTreeSet<String>,
    drop_after: Option<usize>,
    down: bool,
    /// `restart()` does not bring the chain back.
    stays_down: bool,
    /// Every deployment after the first restart is rejected.
    rejects_after_restart: bool,
    restarted: bool,
    cancel_after: Option<(usize, CancelToken)>,
    /// Every executed call as (address, signature), including warm-up calls.
    pub executed: Vec<(String, String)>,
    pub deployments: usize,
    pub resets: usize,
    pub restarts: usize,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reverting(mut self, signature: &str) -> Self {
        self.reverting.insert(signature.to_string());
        self
    }

    pub fn invalid_opcode(mut self, signature: &str) -> Self {
        self.invalid_opcode.insert(signature.to_string());
        self
    }

    /// Become unreachable once, when `calls` calls have been executed.
    pub fn drop_after(mut self, calls: usize) -> Self {
        self.drop_after = Some(calls);
        self
    }

    /// Once down, stay down across restarts.
    pub fn stays_down(mut self) -> Self {
        self.stays_down = true;
        self
    }

    /// Reject every deployment once the session has been restarted.
    pub fn rejects_deploys_after_restart(mut self) -> Self {
        self.rejects_after_restart = true;
        self
    }

    /// Cancel `token` as soon as `calls` calls have been executed.
    pub fn cancel_after(mut self, calls: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    fn unavailable() -> BackendError {
        BackendError::Unavailable {
            message: "connection refused".into(),
        }
    }
}

impl ExecutionBackend for ScriptedChain {
    fn deploy(&mut self, bytecode: &str) -> Result<Deployment, BackendError> {
        if self.down {
            return Err(Self::unavailable());
        }
        if self.rejects_after_restart && self.restarted {
            return Err(BackendError::DeploymentFailed {
                message: "nonce too low".into(),
            });
        }
        if bytecode.starts_with("fe") {
            return Err(BackendError::DeploymentFailed {
                message: "constructor reverted".into(),
            });
        }
        self.deployments += 1;
        self.next_address += 1;
        let address = format!("0x{:040x}", self.next_address);
        self.contracts
            .insert(address.clone(), (bytecode.to_string(), 0));
        Ok(Deployment {
            address,
            creation_gas: 53_000 + 200 * (bytecode.len() as u64 / 2),
        })
    }

    fn call(&mut self, address: &str, call: &CallSpec) -> Result<CallOutcome, BackendError> {
        if self.down {
            return Err(Self::unavailable());
        }
        if self.drop_after == Some(self.executed.len()) {
            self.drop_after = None;
            self.down = true;
            return Err(Self::unavailable());
        }
        let Some((bytecode, calls)) = self.contracts.get_mut(address) else {
            return Err(BackendError::Protocol {
                message: format!("no contract at {address}"),
            });
        };
        let storage = if *calls == 0 { 20_000 } else { 5_000 };
        *calls += 1;
        let gas = 21_000 + storage + 10 * (bytecode.len() as u64 / 2) + call.args.len() as u64;
        self.executed
            .push((address.to_string(), call.signature.clone()));
        if let Some((after, token)) = &self.cancel_after {
            if self.executed.len() == *after {
                token.cancel();
            }
        }

        if self.invalid_opcode.contains(&call.signature) {
            return Ok(CallOutcome::failed(None, CallFailure::InvalidOpcode));
        }
        if self.reverting.contains(&call.signature) {
            return Ok(CallOutcome::failed(
                Some(gas / 2),
                CallFailure::Reverted {
                    data: Some("0x".into()),
                },
            ));
        }
        Ok(CallOutcome::succeeded(gas, Some(format!("0x{:064x}", *calls))))
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        if self.down {
            return Err(Self::unavailable());
        }
        self.resets += 1;
        self.contracts.clear();
        Ok(())
    }

    fn restart(&mut self) -> Result<(), BackendError> {
        self.restarts += 1;
        self.restarted = true;
        self.down = self.down && self.stays_down;
        self.contracts.clear();
        Ok(())
    }
}

/// Wraps a compiler and panics on any build whose step list contains `step`.
pub struct PanicsOnStep<'a> {
    pub inner: &'a FixtureCompiler,
    pub step: char,
}

impl Compiler for PanicsOnStep<'_> {
    fn trace(&self, source: &SourceUnit, notation: &str) -> Result<ExpandedRun, CompilerError> {
        self.inner.trace(source, notation)
    }

    fn build(&self, source: &SourceUnit, steps: &StepList) -> Result<BuildOutcome, CompilerError> {
        if steps.render().contains(self.step) {
            panic!("optimizer crashed on '{}'", self.step);
        }
        self.inner.build(source, steps)
    }
}

pub fn calls(signatures: &[&str]) -> Vec<CallSpec> {
    signatures.iter().map(|s| CallSpec::new(*s)).collect()
}
