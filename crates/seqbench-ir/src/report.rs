//! Per-prefix join of step info, build outcome and executions.

use crate::artifact::UnitKey;
use crate::execution::{DeploymentOutcome, ExecutionRecord};

/// Everything known about one prefix of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PrefixRow {
    pub prefix: usize,
    /// Last user step added by this prefix; `None` for prefix 0.
    pub step: Option<char>,
    pub step_name: Option<String>,
    pub step_duration_us: Option<u64>,
    /// Sum of user step durations up to and including this prefix.
    pub optimization_time_us: u64,
    /// `None` when no artifact exists for the prefix.
    pub build_status: Option<String>,
    pub build_duration_us: Option<u64>,
    pub build_error: Option<String>,
    pub bytecode_size: Option<usize>,
    pub deployment: Option<DeploymentOutcome>,
    /// Call-ascending.
    pub executions: Vec<ExecutionRecord>,
    /// Length of the call trace replayed against this prefix.
    #[cfg_attr(feature = "serialize", serde(default))]
    pub trace_calls: usize,
}

impl PrefixRow {
    pub fn creation_gas(&self) -> Option<u64> {
        self.deployment
            .as_ref()
            .and_then(DeploymentOutcome::record)
            .map(|record| record.creation_gas)
    }

    /// Every call of the trace has a record.
    pub fn is_fully_executed(&self) -> bool {
        !self.executions.is_empty() && self.executions.len() == self.trace_calls
    }

    /// Total gas over the trace. Only present when every call of the trace
    /// ran and succeeded.
    pub fn runtime_gas(&self) -> Option<u64> {
        if !self.is_fully_executed() {
            return None;
        }
        self.executions
            .iter()
            .map(|record| if record.success { record.gas_used } else { None })
            .sum()
    }

    pub fn execution_status(&self) -> &'static str {
        if let Some(DeploymentOutcome::Failed { .. }) = self.deployment {
            return "deployment-failed";
        }
        if self.executions.is_empty() {
            return "not-executed";
        }
        match self.executions.iter().find(|record| !record.success) {
            Some(record) => record.status(),
            None if self.executions.len() < self.trace_calls => "incomplete",
            None => "success",
        }
    }

    pub fn summary(&self) -> SummaryRow {
        SummaryRow {
            prefix: self.prefix,
            step: self.step,
            step_name: self.step_name.clone(),
            step_duration_us: self.step_duration_us,
            optimization_time_us: self.optimization_time_us,
            build_status: self
                .build_status
                .clone()
                .unwrap_or_else(|| "missing".to_string()),
            build_duration_ms: self.build_duration_us.map(|us| us as f64 / 1000.0),
            bytecode_size: self.bytecode_size,
            creation_gas: self.creation_gas(),
            runtime_gas: self.runtime_gas(),
            execution_status: self.execution_status().to_string(),
        }
    }
}

/// Flat per-prefix row handed to report sinks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SummaryRow {
    pub prefix: usize,
    pub step: Option<char>,
    pub step_name: Option<String>,
    pub step_duration_us: Option<u64>,
    pub optimization_time_us: u64,
    pub build_status: String,
    pub build_duration_ms: Option<f64>,
    pub bytecode_size: Option<usize>,
    pub creation_gas: Option<u64>,
    pub runtime_gas: Option<u64>,
    pub execution_status: String,
}

impl SummaryRow {
    pub const COLUMNS: [&'static str; 11] = [
        "prefix",
        "step",
        "step_name",
        "step_duration_us",
        "optimization_time_us",
        "build_status",
        "build_duration_ms",
        "bytecode_size",
        "creation_gas",
        "runtime_gas",
        "execution_status",
    ];

    /// Cells in [`Self::COLUMNS`] order; missing values are empty strings.
    pub fn cells(&self) -> Vec<String> {
        vec![
            self.prefix.to_string(),
            cell(self.step),
            cell(self.step_name.as_ref()),
            cell(self.step_duration_us),
            self.optimization_time_us.to_string(),
            self.build_status.clone(),
            self.build_duration_ms
                .map(|ms| format!("{ms:.3}"))
                .unwrap_or_default(),
            cell(self.bytecode_size),
            cell(self.creation_gas),
            cell(self.runtime_gas),
            self.execution_status.clone(),
        ]
    }
}

/// Flat per-(prefix, call) row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionRow {
    pub prefix: usize,
    pub call_index: usize,
    pub gas_used: Option<u64>,
    pub success: bool,
    pub return_data: Option<String>,
    pub error: Option<String>,
}

impl ExecutionRow {
    pub const COLUMNS: [&'static str; 6] = [
        "prefix",
        "call_index",
        "gas_used",
        "success",
        "return_data",
        "error",
    ];

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.prefix.to_string(),
            self.call_index.to_string(),
            cell(self.gas_used),
            self.success.to_string(),
            cell(self.return_data.as_ref()),
            cell(self.error.as_ref()),
        ]
    }
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Aggregated result of one (contract, sequence) unit, one row per prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    pub unit: UnitKey,
    /// Rows are prefix-ascending and cover 0..=prefix_count.
    pub prefix_count: usize,
    pub rows: Vec<PrefixRow>,
}

impl Report {
    pub fn row(&self, prefix: usize) -> Option<&PrefixRow> {
        self.rows.get(prefix).filter(|row| row.prefix == prefix)
    }

    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        self.rows.iter().map(PrefixRow::summary).collect()
    }

    pub fn execution_rows(&self) -> Vec<ExecutionRow> {
        self.rows
            .iter()
            .flat_map(|row| {
                row.executions.iter().map(move |record| ExecutionRow {
                    prefix: row.prefix,
                    call_index: record.key.call_index,
                    gas_used: record.gas_used,
                    success: record.success,
                    return_data: record.return_data.clone(),
                    error: record.error.as_ref().map(ToString::to_string),
                })
            })
            .collect()
    }

    pub fn execution_count(&self) -> usize {
        self.rows.iter().map(|row| row.executions.len()).sum()
    }

    /// Prefixes that produced bytecode.
    pub fn compiled_prefixes(&self) -> Vec<usize> {
        self.rows
            .iter()
            .filter(|row| row.build_status.as_deref() == Some("success"))
            .map(|row| row.prefix)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CallFailure, DeploymentRecord, ExecutionKey};

    fn exec(prefix: usize, call_index: usize, gas: u64, error: Option<CallFailure>) -> ExecutionRecord {
        ExecutionRecord {
            key: ExecutionKey {
                unit: UnitKey::new("C", "ab:"),
                prefix,
                call_index,
            },
            gas_used: Some(gas),
            success: error.is_none(),
            return_data: None,
            error,
        }
    }

    fn row(prefix: usize, executions: Vec<ExecutionRecord>) -> PrefixRow {
        PrefixRow {
            prefix,
            step: None,
            step_name: None,
            step_duration_us: None,
            optimization_time_us: 0,
            build_status: Some("success".into()),
            build_duration_us: Some(1500),
            build_error: None,
            bytecode_size: Some(10),
            deployment: Some(DeploymentOutcome::Deployed(DeploymentRecord {
                prefix,
                address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".into(),
                creation_gas: 90_000,
                bytecode_size: 10,
            })),
            trace_calls: executions.len(),
            executions,
        }
    }

    #[test]
    fn runtime_gas_requires_every_call_to_succeed() {
        let ok = row(0, vec![exec(0, 0, 100, None), exec(0, 1, 50, None)]);
        assert_eq!(ok.runtime_gas(), Some(150));
        assert_eq!(ok.execution_status(), "success");

        let reverted = row(
            0,
            vec![
                exec(0, 0, 100, None),
                exec(0, 1, 50, Some(CallFailure::Reverted { data: None })),
            ],
        );
        assert_eq!(reverted.runtime_gas(), None);
        assert_eq!(reverted.execution_status(), "execution-reverted");
    }

    #[test]
    fn partially_replayed_prefix_has_no_runtime_gas() {
        let mut partial = row(0, vec![exec(0, 0, 100, None), exec(0, 1, 100, None)]);
        partial.trace_calls = 5;
        assert!(!partial.is_fully_executed());
        assert_eq!(partial.runtime_gas(), None);
        assert_eq!(partial.execution_status(), "incomplete");
        assert_eq!(partial.summary().runtime_gas, None);
    }

    #[test]
    fn missing_build_is_explicit_in_summary() {
        let mut r = row(2, Vec::new());
        r.build_status = None;
        r.deployment = None;
        let summary = r.summary();
        assert_eq!(summary.build_status, "missing");
        assert_eq!(summary.execution_status, "not-executed");
        assert_eq!(summary.creation_gas, None);
        assert_eq!(summary.cells().len(), SummaryRow::COLUMNS.len());
    }

    #[test]
    fn execution_rows_follow_row_order() {
        let report = Report {
            unit: UnitKey::new("C", "ab:"),
            prefix_count: 1,
            rows: vec![
                row(0, vec![exec(0, 0, 1, None), exec(0, 1, 2, None)]),
                row(1, vec![exec(1, 0, 3, Some(CallFailure::InvalidOpcode))]),
            ],
        };
        let rows = report.execution_rows();
        let keys: Vec<(usize, usize)> = rows.iter().map(|r| (r.prefix, r.call_index)).collect();
        assert_eq!(keys, vec![(0, 0), (0, 1), (1, 0)]);
        assert_eq!(rows[2].error.as_deref(), Some("invalid opcode 0xfe"));
        assert_eq!(report.execution_count(), 3);
        assert_eq!(report.row(1).map(|r| r.prefix), Some(1));
        assert_eq!(report.compiled_prefixes(), vec![0, 1]);
    }
}
