//! Error taxonomy for the execution core.
//!
//! | Error | Raised by | Retried? |
//! |---|---|---|
//! | [`SafetyError`] | safety guard | never; aborts the whole run |
//! | [`DriverError`] | driver capture/dispatch | consumes one attempt (or fatal, if configured) |
//! | [`GroundingError`] | grounding client | consumes one attempt |
//! | [`MaxRetryError`] | tactical controller | terminal for the goal |
//! | [`ErrorKind`] | sandbox | recorded in the execution report |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Action;

/// A proposed action violates a physical-bound invariant.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Safety violation: {field} = {value} outside {bound}")]
pub struct SafetyError {
    /// Dotted path of the offending field, e.g. `"swipe.to.x"`.
    pub field: String,
    pub value: f64,
    /// Human-readable description of the allowed range.
    pub bound: String,
}

/// Verification did not succeed within the configured number of attempts.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Goal '{goal}' not achieved after {attempts} attempt(s)")]
pub struct MaxRetryError {
    pub goal: String,
    pub attempts: u32,
    pub last_action: Option<Action>,
    /// Description of the transport or grounding fault on the final attempt,
    /// `None` when the final attempt ended in a negative verification.
    pub last_fault: Option<String>,
}

impl MaxRetryError {
    /// `true` when the final attempt failed on verification rather than on a
    /// transport or grounding fault.
    pub fn is_verification_failure(&self) -> bool {
        self.last_fault.is_none()
    }
}

/// A transport or hardware fault reported by a driver.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Driver fault on {component}: {details}")]
pub struct DriverError {
    pub component: String,
    pub details: String,
}

impl DriverError {
    pub fn new(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            details: details.into(),
        }
    }
}

/// A failure of the grounding model service.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroundingError {
    #[error("Grounding request failed: {0}")]
    Request(String),

    #[error("Unexpected grounding response: {0}")]
    BadResponse(String),

    #[error("Could not parse an action from model reply: {0}")]
    Unparseable(String),
}

/// Terminal failure of one goal-execution call.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GoalError {
    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    MaxRetry(#[from] MaxRetryError),

    /// Only produced when driver faults are configured as fatal.
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Goal '{goal}' cancelled")]
    Cancelled { goal: String },
}

/// Error recorded in an [`ExecutionReport`][crate::ExecutionReport].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[error("SafetyError: {0}")]
    Safety(SafetyError),

    #[error("MaxRetryError: {0}")]
    MaxRetry(MaxRetryError),

    #[error("DriverError: {0}")]
    Driver(DriverError),

    #[error("SandboxViolation at line {line}: {message}")]
    SandboxViolation { line: usize, message: String },

    #[error("SyntaxError at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("ResourceLimit: more than {limit} {resource}")]
    ResourceLimit { resource: String, limit: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("InternalError: {0}")]
    Internal(String),
}

impl From<GoalError> for ErrorKind {
    fn from(err: GoalError) -> Self {
        match err {
            GoalError::Safety(e) => ErrorKind::Safety(e),
            GoalError::MaxRetry(e) => ErrorKind::MaxRetry(e),
            GoalError::Driver(e) => ErrorKind::Driver(e),
            GoalError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

/// `execute` was called while another run was in flight on the same sandbox.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Sandbox is busy: another script is already executing on this instance")]
pub struct SandboxBusy;
