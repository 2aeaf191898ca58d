//! Recorded call traces, replayed identically against every prefix.

use std::fmt;

use thiserror::Error;

/// One recorded call: function signature, arguments and an optional value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CallSpec {
    /// e.g. `transfer(address,uint256)`
    pub signature: String,
    pub args: Vec<String>,
    /// Amount sent with the call, passed through verbatim (`1ether`, `100`).
    #[cfg_attr(feature = "serialize", serde(default))]
    pub value: Option<String>,
}

impl CallSpec {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            args: Vec::new(),
            value: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(value) = &self.value {
            write!(f, " --value {value}")?;
        }
        Ok(())
    }
}

/// Ordered calls recorded once per contract.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CallTrace {
    pub contract: String,
    pub calls: Vec<CallSpec>,
}

impl CallTrace {
    pub fn new(contract: impl Into<String>, calls: Vec<CallSpec>) -> Self {
        Self {
            contract: contract.into(),
            calls,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallTraceError {
    #[error("line {line}: argument '{argument}' is not allowed (only --value may be used)")]
    ForbiddenFlag { line: usize, argument: String },
    #[error("line {line}: --value requires an amount")]
    MissingValue { line: usize },
    #[error("line {line}: --value given more than once")]
    DuplicateValue { line: usize },
    #[error("line {line}: call has a value but no function signature")]
    MissingSignature { line: usize },
}

/// Parse a call definition file: one call per line, `#` comments, tokens
/// separated by whitespace. The first token is the function signature.
pub fn parse_call_definitions(text: &str) -> Result<Vec<CallSpec>, CallTraceError> {
    let mut calls = Vec::new();
    for (i, raw_line) in text.lines().enumerate() {
        let line = i + 1;
        let clean = raw_line.split('#').next().unwrap_or_default();
        let mut tokens = clean.split_whitespace();

        let mut signature: Option<String> = None;
        let mut args = Vec::new();
        let mut value: Option<String> = None;
        while let Some(token) = tokens.next() {
            if token == "--value" {
                if value.is_some() {
                    return Err(CallTraceError::DuplicateValue { line });
                }
                let amount = tokens
                    .next()
                    .ok_or(CallTraceError::MissingValue { line })?;
                value = Some(amount.to_string());
            } else if token.starts_with('-') {
                return Err(CallTraceError::ForbiddenFlag {
                    line,
                    argument: token.to_string(),
                });
            } else if signature.is_none() {
                signature = Some(token.to_string());
            } else {
                args.push(token.to_string());
            }
        }

        match signature {
            Some(signature) => calls.push(CallSpec {
                signature,
                args,
                value,
            }),
            None if value.is_some() => return Err(CallTraceError::MissingSignature { line }),
            None => {}
        }
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_calls_comments_and_values() {
        let text = "\
# setup
mint(address,uint256) 0x00000000000000000000000000000000000000aa 100

transfer(address,uint256) 0x00000000000000000000000000000000000000bb 5 # partial
deposit() --value 1ether
";
        let calls = parse_call_definitions(text).unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].signature, "mint(address,uint256)");
        assert_eq!(calls[0].args.len(), 2);
        assert_eq!(calls[1].args[1], "5");
        assert_eq!(calls[2], CallSpec::new("deposit()").with_value("1ether"));
        assert_eq!(calls[2].to_string(), "deposit() --value 1ether");
    }

    #[test]
    fn rejects_other_flags() {
        let err = parse_call_definitions("f() --gas-limit 5").unwrap_err();
        assert_eq!(
            err,
            CallTraceError::ForbiddenFlag {
                line: 1,
                argument: "--gas-limit".into()
            }
        );
        let err = parse_call_definitions("ok()\nf() -x").unwrap_err();
        assert!(matches!(err, CallTraceError::ForbiddenFlag { line: 2, .. }));
    }

    #[test]
    fn value_needs_amount_and_signature() {
        assert_eq!(
            parse_call_definitions("f() --value").unwrap_err(),
            CallTraceError::MissingValue { line: 1 }
        );
        assert_eq!(
            parse_call_definitions("--value 3").unwrap_err(),
            CallTraceError::MissingSignature { line: 1 }
        );
        assert_eq!(
            parse_call_definitions("f() --value 1 --value 2").unwrap_err(),
            CallTraceError::DuplicateValue { line: 1 }
        );
    }

    #[test]
    fn empty_file_has_no_calls() {
        assert!(parse_call_definitions("# only comments\n\n").unwrap().is_empty());
    }
}
