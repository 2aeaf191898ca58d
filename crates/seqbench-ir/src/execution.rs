use std::fmt;

use crate::artifact::UnitKey;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionKey {
    pub unit: UnitKey,
    pub prefix: usize,
    pub call_index: usize,
}

/// Why a call did not succeed. Non-fatal: the replay continues with the
/// next call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "kind", rename_all = "snake_case"))]
pub enum CallFailure {
    Reverted { data: Option<String> },
    InvalidOpcode,
    Other { message: String },
}

impl CallFailure {
    pub fn status(&self) -> &'static str {
        match self {
            CallFailure::Reverted { .. } => "execution-reverted",
            CallFailure::InvalidOpcode => "invalid-fe-opcode",
            CallFailure::Other { .. } => "execution-failed",
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Reverted { data: Some(data) } => write!(f, "execution reverted ({data})"),
            CallFailure::Reverted { data: None } => write!(f, "execution reverted"),
            CallFailure::InvalidOpcode => write!(f, "invalid opcode 0xfe"),
            CallFailure::Other { message } => write!(f, "{message}"),
        }
    }
}

/// Outcome of one call against one prefix's deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionRecord {
    pub key: ExecutionKey,
    pub gas_used: Option<u64>,
    pub success: bool,
    pub return_data: Option<String>,
    pub error: Option<CallFailure>,
}

impl ExecutionRecord {
    pub fn status(&self) -> &'static str {
        match &self.error {
            None if self.success => "success",
            None => "execution-failed",
            Some(failure) => failure.status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DeploymentRecord {
    pub prefix: usize,
    pub address: String,
    pub creation_gas: u64,
    pub bytecode_size: usize,
}

/// What happened when a prefix's artifact was deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "status", rename_all = "snake_case"))]
pub enum DeploymentOutcome {
    Deployed(DeploymentRecord),
    Failed { prefix: usize, message: String },
}

impl DeploymentOutcome {
    pub fn prefix(&self) -> usize {
        match self {
            DeploymentOutcome::Deployed(record) => record.prefix,
            DeploymentOutcome::Failed { prefix, .. } => *prefix,
        }
    }

    pub fn record(&self) -> Option<&DeploymentRecord> {
        match self {
            DeploymentOutcome::Deployed(record) => Some(record),
            DeploymentOutcome::Failed { .. } => None,
        }
    }
}
