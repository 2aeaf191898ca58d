//! Foundry `cast` against a local dev chain.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use tracing::debug;

use seqbench_ir::{CallFailure, CallSpec};

use super::{BackendError, CallOutcome, Deployment, ExecutionBackend};

const CONNECTION_MARKERS: &[&str] = &[
    "connection refused",
    "error sending request",
    "connection reset",
    "broken pipe",
];

pub struct CastBackend {
    program: PathBuf,
    rpc_url: String,
    private_key: String,
    /// Run `cast call` before each transaction to capture return data.
    capture_return_data: bool,
}

impl fmt::Debug for CastBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CastBackend")
            .field("program", &self.program)
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("capture_return_data", &self.capture_return_data)
            .finish()
    }
}

/// What a failed `cast` invocation means.
#[derive(Debug, PartialEq, Eq)]
enum CastFailure {
    Unavailable(String),
    Call(CallFailure),
}

impl CastBackend {
    pub fn new(rpc_url: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("cast"),
            rpc_url: rpc_url.into(),
            private_key: private_key.into(),
            capture_return_data: false,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_return_data(mut self, capture: bool) -> Self {
        self.capture_return_data = capture;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    fn run(&self, args: &[String]) -> Result<String, CastFailure> {
        debug!(command = args.first().map(String::as_str).unwrap_or(""), "invoking cast");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| {
                CastFailure::Unavailable(format!("{}: {e}", self.program.display()))
            })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
    }

    fn send_args(&self) -> Vec<String> {
        vec![
            "send".into(),
            "--json".into(),
            "--rpc-url".into(),
            self.rpc_url.clone(),
            "--private-key".into(),
            self.private_key.clone(),
        ]
    }
}

fn call_args(call: &CallSpec) -> Vec<String> {
    let mut args = vec![call.signature.clone()];
    args.extend(call.args.iter().cloned());
    if let Some(value) = &call.value {
        args.push("--value".into());
        args.push(value.clone());
    }
    args
}

fn classify_stderr(stderr: &str) -> CastFailure {
    let lower = stderr.to_ascii_lowercase();
    if CONNECTION_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return CastFailure::Unavailable(stderr.trim().to_string());
    }
    if stderr.contains("InvalidFEOpcode") {
        return CastFailure::Call(CallFailure::InvalidOpcode);
    }
    if lower.contains("execution reverted") {
        return CastFailure::Call(CallFailure::Reverted {
            data: revert_data(stderr),
        });
    }
    CastFailure::Call(CallFailure::Other {
        message: stderr.trim().to_string(),
    })
}

/// Pull `0x...` out of `data: Some(String("0x..."))`.
fn revert_data(stderr: &str) -> Option<String> {
    let start = stderr.find("data: Some(String(\"")? + "data: Some(String(\"".len();
    let rest = &stderr[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Receipt quantities come back as `0x`-prefixed hex strings.
fn quantity(receipt: &Value, field: &str) -> Option<u64> {
    match receipt.get(field)? {
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn gas_used(receipt: &Value) -> Option<u64> {
    quantity(receipt, "gasUsed").or_else(|| quantity(receipt, "cumulativeGasUsed"))
}

fn receipt_reverted(receipt: &Value) -> bool {
    quantity(receipt, "status") == Some(0)
}

fn parse_receipt(text: &str) -> Result<Value, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::Protocol {
        message: format!("receipt is not JSON: {e}"),
    })
}

impl ExecutionBackend for CastBackend {
    fn deploy(&mut self, bytecode: &str) -> Result<Deployment, BackendError> {
        super::validate_bytecode(bytecode)?;
        let mut args = self.send_args();
        args.push("--create".into());
        args.push(bytecode.to_string());

        let receipt = match self.run(&args) {
            Ok(text) => parse_receipt(&text)?,
            Err(CastFailure::Unavailable(message)) => {
                return Err(BackendError::Unavailable { message })
            }
            Err(CastFailure::Call(failure)) => {
                return Err(BackendError::DeploymentFailed {
                    message: failure.to_string(),
                })
            }
        };
        if receipt_reverted(&receipt) {
            return Err(BackendError::DeploymentFailed {
                message: "constructor reverted".into(),
            });
        }
        let address = receipt
            .get("contractAddress")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Protocol {
                message: "receipt has no contractAddress".into(),
            })?
            .to_string();
        let creation_gas = gas_used(&receipt).ok_or_else(|| BackendError::Protocol {
            message: "receipt has no gas used".into(),
        })?;
        Ok(Deployment {
            address,
            creation_gas,
        })
    }

    fn call(&mut self, address: &str, call: &CallSpec) -> Result<CallOutcome, BackendError> {
        let mut return_data = None;
        if self.capture_return_data {
            let mut args = vec!["call".into(), "--rpc-url".into(), self.rpc_url.clone()];
            args.push(address.to_string());
            args.extend(call_args(call));
            match self.run(&args) {
                Ok(data) => return_data = Some(data),
                Err(CastFailure::Unavailable(message)) => {
                    return Err(BackendError::Unavailable { message })
                }
                // The transaction below reports the failure.
                Err(CastFailure::Call(_)) => {}
            }
        }

        let mut args = self.send_args();
        args.push(address.to_string());
        args.extend(call_args(call));
        let receipt = match self.run(&args) {
            Ok(text) => parse_receipt(&text)?,
            Err(CastFailure::Unavailable(message)) => {
                return Err(BackendError::Unavailable { message })
            }
            Err(CastFailure::Call(failure)) => return Ok(CallOutcome::failed(None, failure)),
        };
        let gas = gas_used(&receipt);
        if receipt_reverted(&receipt) {
            return Ok(CallOutcome::failed(
                gas,
                CallFailure::Reverted { data: None },
            ));
        }
        let gas = gas.ok_or_else(|| BackendError::Protocol {
            message: "receipt has no gas used".into(),
        })?;
        Ok(CallOutcome::succeeded(gas, return_data))
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        let args = vec![
            "rpc".into(),
            "--rpc-url".into(),
            self.rpc_url.clone(),
            "anvil_reset".into(),
        ];
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(CastFailure::Unavailable(message)) => Err(BackendError::Unavailable { message }),
            Err(CastFailure::Call(failure)) => Err(BackendError::Protocol {
                message: format!("anvil_reset failed: {failure}"),
            }),
        }
    }

    fn restart(&mut self) -> Result<(), BackendError> {
        self.reset()?;
        let args = vec!["chain-id".into(), "--rpc-url".into(), self.rpc_url.clone()];
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(CastFailure::Unavailable(message)) => Err(BackendError::Unavailable { message }),
            Err(CastFailure::Call(failure)) => Err(BackendError::Unavailable {
                message: failure.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stderr_classification() {
        let revert = "Error: server returned an error response: error code 3: execution reverted, data: Some(String(\"0x\"))";
        assert_eq!(
            classify_stderr(revert),
            CastFailure::Call(CallFailure::Reverted {
                data: Some("0x".into())
            })
        );
        let fe = "(code: -32603, message: EVM error InvalidFEOpcode, data: None)";
        assert_eq!(
            classify_stderr(fe),
            CastFailure::Call(CallFailure::InvalidOpcode)
        );
        assert!(matches!(
            classify_stderr("error sending request for url (http://127.0.0.1:8545/)"),
            CastFailure::Unavailable(_)
        ));
        assert!(matches!(
            classify_stderr("Connection refused (os error 111)"),
            CastFailure::Unavailable(_)
        ));
        assert!(matches!(
            classify_stderr("insufficient funds"),
            CastFailure::Call(CallFailure::Other { .. })
        ));
    }

    #[test]
    fn receipt_quantities() {
        let receipt = json!({"status": "0x1", "cumulativeGasUsed": "0x5208", "contractAddress": null});
        assert_eq!(gas_used(&receipt), Some(21_000));
        assert!(!receipt_reverted(&receipt));
        assert!(receipt_reverted(&json!({"status": "0x0"})));
    }

    #[test]
    fn call_arguments_keep_value_flag() {
        let call = CallSpec::new("deposit(uint256)")
            .with_args(["7"])
            .with_value("1ether");
        assert_eq!(
            call_args(&call),
            vec!["deposit(uint256)", "7", "--value", "1ether"]
        );
    }

    #[test]
    fn debug_hides_private_key() {
        let backend = CastBackend::new("http://127.0.0.1:8545", "0xac0974bec39a17e36ba4a6b4d238ff944bacb478");
        assert!(!format!("{backend:?}").contains("ac0974"));
    }

    #[test]
    fn missing_cast_is_unavailable() {
        let mut backend = CastBackend::new("http://127.0.0.1:1", "0x01")
            .with_program("/nonexistent/seqbench-cast");
        assert!(backend.reset().unwrap_err().is_unavailable());
    }
}
