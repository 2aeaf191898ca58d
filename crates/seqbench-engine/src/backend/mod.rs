//! Execution backend collaborator.
//!
//! A backend session owns the chain state, the funded account and its
//! nonce. The replay engine needs exclusive use of a session for a whole
//! trace, which [`SharedBackend::lease`] provides when sessions are shared
//! between worker threads.

pub mod cast;

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use seqbench_ir::{CallFailure, CallSpec};
use thiserror::Error;

pub use cast::CastBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address: String,
    pub creation_gas: u64,
}

/// Result of one call. Reverts are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub gas_used: Option<u64>,
    pub success: bool,
    pub return_data: Option<String>,
    pub failure: Option<CallFailure>,
}

impl CallOutcome {
    pub fn succeeded(gas_used: u64, return_data: Option<String>) -> Self {
        Self {
            gas_used: Some(gas_used),
            success: true,
            return_data,
            failure: None,
        }
    }

    pub fn failed(gas_used: Option<u64>, failure: CallFailure) -> Self {
        Self {
            gas_used,
            success: false,
            return_data: None,
            failure: Some(failure),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The session cannot be reached. Fatal to the in-flight trace until the
    /// session is restarted.
    #[error("execution backend unavailable: {message}")]
    Unavailable { message: String },
    #[error("invalid bytecode: {reason}")]
    InvalidBytecode { reason: String },
    #[error("deployment failed: {message}")]
    DeploymentFailed { message: String },
    #[error("unexpected backend response: {message}")]
    Protocol { message: String },
}

impl BackendError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}

/// Deploys bytecode and executes calls against one session.
pub trait ExecutionBackend {
    /// Deploy hex bytecode (no `0x`) as a fresh contract.
    fn deploy(&mut self, bytecode: &str) -> Result<Deployment, BackendError>;

    /// Execute `call` against the contract at `address`.
    fn call(&mut self, address: &str, call: &CallSpec) -> Result<CallOutcome, BackendError>;

    /// Drop all chain state of the session.
    fn reset(&mut self) -> Result<(), BackendError>;

    /// Bring an unavailable session back. The chain state after a restart is
    /// unspecified; callers redeploy.
    fn restart(&mut self) -> Result<(), BackendError>;
}

impl<B: ExecutionBackend + ?Sized> ExecutionBackend for &mut B {
    fn deploy(&mut self, bytecode: &str) -> Result<Deployment, BackendError> {
        (**self).deploy(bytecode)
    }

    fn call(&mut self, address: &str, call: &CallSpec) -> Result<CallOutcome, BackendError> {
        (**self).call(address, call)
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        (**self).reset()
    }

    fn restart(&mut self) -> Result<(), BackendError> {
        (**self).restart()
    }
}

/// Check that `bytecode` is hex without a `0x` prefix and whole bytes.
pub fn validate_bytecode(bytecode: &str) -> Result<(), BackendError> {
    if bytecode.starts_with("0x") {
        return Err(BackendError::InvalidBytecode {
            reason: "expected hex-encoded bytecode without 0x prefix".into(),
        });
    }
    if bytecode.is_empty() {
        return Err(BackendError::InvalidBytecode {
            reason: "bytecode is empty".into(),
        });
    }
    if bytecode.len() % 2 != 0 {
        return Err(BackendError::InvalidBytecode {
            reason: "odd number of hexadecimal digits".into(),
        });
    }
    if let Some(bad) = bytecode.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(BackendError::InvalidBytecode {
            reason: format!("'{bad}' is not a hexadecimal digit"),
        });
    }
    Ok(())
}

/// A backend session that several workers may hold in turn.
#[derive(Debug)]
pub struct SharedBackend<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> Clone for SharedBackend<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> SharedBackend<B> {
    pub fn new(backend: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(backend)),
        }
    }

    /// Block until the session is free and hold it until the lease drops.
    pub fn lease(&self) -> Result<SessionLease<'_, B>, BackendError> {
        let guard = self.inner.lock().map_err(|_| BackendError::Unavailable {
            message: "backend session poisoned by a panicked worker".into(),
        })?;
        Ok(SessionLease { guard })
    }

    /// The backend, if no other handle is alive.
    pub fn into_inner(self) -> Option<B> {
        Arc::try_unwrap(self.inner)
            .ok()
            .and_then(|mutex| mutex.into_inner().ok())
    }
}

/// Exclusive use of a shared session.
pub struct SessionLease<'a, B> {
    guard: MutexGuard<'a, B>,
}

impl<B> Deref for SessionLease<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.guard
    }
}

impl<B> DerefMut for SessionLease<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytecode_validation() {
        assert!(validate_bytecode("6080604052").is_ok());
        for bad in ["0x6080", "608", "", "60zz"] {
            assert!(
                matches!(
                    validate_bytecode(bad),
                    Err(BackendError::InvalidBytecode { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn lease_is_exclusive_and_shared_state_persists() {
        let shared = SharedBackend::new(Vec::<u32>::new());
        let other = shared.clone();
        {
            let mut lease = shared.lease().unwrap();
            lease.push(1);
        }
        other.lease().unwrap().push(2);
        drop(other);
        assert_eq!(shared.into_inner(), Some(vec![1, 2]));
    }
}
