//! [`DispatchGate`] – single interception point between the controller and
//! the driver.
//!
//! The gate takes ownership of the [`Driver`], so nothing downstream of it can
//! reach [`Driver::dispatch`] except through [`DispatchGate::dispatch`], which
//! runs [`SafetyGuard::validate`] immediately before handing the action over.
//! A rejected action never reaches the driver.
//!
//! # Example
//!
//! ```
//! use handeye_hal::SimDriver;
//! use handeye_kernel::{DispatchGate, GateError, SafetyGuard};
//! use handeye_types::Action;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let driver = SimDriver::new("sim");
//! let journal = driver.journal();
//! let mut gate = DispatchGate::new(Box::new(driver), SafetyGuard::default());
//!
//! assert!(gate.dispatch(&Action::tap(0.5, 0.5)).await.is_ok());
//! assert!(matches!(
//!     gate.dispatch(&Action::tap(1.5, 0.5)).await,
//!     Err(GateError::Safety(_))
//! ));
//! assert_eq!(journal.dispatched().len(), 1);
//! # });
//! ```

use handeye_hal::Driver;
use handeye_types::{Action, DriverError, Frame, SafetyError};
use thiserror::Error;
use tracing::{debug, warn};

use crate::safety_guard::SafetyGuard;

/// Why a dispatch through the gate did not happen or did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    /// The guard rejected the action; the driver was not called.
    #[error(transparent)]
    Safety(#[from] SafetyError),

    /// The driver was called and reported a fault.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Owns a [`Driver`] and mediates every action sent to it.
pub struct DispatchGate {
    driver: Box<dyn Driver>,
    guard: SafetyGuard,
}

impl DispatchGate {
    pub fn new(driver: Box<dyn Driver>, guard: SafetyGuard) -> Self {
        Self { driver, guard }
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.guard
    }

    pub fn driver_id(&self) -> &str {
        self.driver.id()
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    pub async fn connect(&mut self) -> Result<(), DriverError> {
        self.driver.connect().await
    }

    pub async fn disconnect(&mut self) -> Result<(), DriverError> {
        self.driver.disconnect().await
    }

    /// Capture a frame.  Capturing has no physical effect and is not guarded.
    pub async fn capture(&mut self) -> Result<Frame, DriverError> {
        self.driver.capture().await
    }

    /// Validate `action` without dispatching it.
    pub fn check(&self, action: &Action) -> Result<(), SafetyError> {
        self.guard.validate(action)
    }

    /// Validate `action` and, only if it passes, dispatch it to the driver.
    ///
    /// # Errors
    ///
    /// - [`GateError::Safety`] – the action violates an invariant; the driver
    ///   was not called.
    /// - [`GateError::Driver`] – the driver reported a fault.
    pub async fn dispatch(&mut self, action: &Action) -> Result<(), GateError> {
        if let Err(e) = self.guard.validate(action) {
            warn!(driver = %self.driver.id(), %action, error = %e, "action rejected by safety guard");
            return Err(e.into());
        }
        debug!(driver = %self.driver.id(), %action, "action cleared");
        self.driver.dispatch(action).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_hal::{SimDriver, SimEvent};

    fn gate_with(driver: SimDriver) -> DispatchGate {
        DispatchGate::new(Box::new(driver), SafetyGuard::default())
    }

    #[tokio::test]
    async fn valid_action_reaches_driver() {
        let driver = SimDriver::new("sim");
        let journal = driver.journal();
        let mut gate = gate_with(driver);
        gate.dispatch(&Action::tap(0.2, 0.2)).await.unwrap();
        assert_eq!(journal.dispatched(), vec![Action::tap(0.2, 0.2)]);
    }

    #[tokio::test]
    async fn rejected_action_never_reaches_driver() {
        let driver = SimDriver::new("sim");
        let journal = driver.journal();
        let mut gate = gate_with(driver);
        let result = gate.dispatch(&Action::swipe(0.5, 0.5, 0.5, 1.01)).await;
        assert!(matches!(result, Err(GateError::Safety(ref e)) if e.field == "swipe.to.y"));
        assert!(journal.events().is_empty());
    }

    #[tokio::test]
    async fn driver_fault_is_reported_as_driver_error() {
        let mut gate = gate_with(SimDriver::new("sim").fail_next_dispatches(1));
        let result = gate.dispatch(&Action::tap(0.5, 0.5)).await;
        assert!(matches!(result, Err(GateError::Driver(_))));
    }

    #[tokio::test]
    async fn capture_and_connection_pass_through() {
        let driver = SimDriver::new("sim");
        let journal = driver.journal();
        let mut gate = gate_with(driver);
        gate.connect().await.unwrap();
        assert!(gate.is_connected());
        gate.capture().await.unwrap();
        assert_eq!(journal.events(), vec![SimEvent::Connect, SimEvent::Capture]);
        assert_eq!(gate.driver_id(), "sim");
    }

    #[test]
    fn check_does_not_dispatch() {
        let driver = SimDriver::new("sim");
        let journal = driver.journal();
        let gate = gate_with(driver);
        assert!(gate.check(&Action::tap(0.5, 0.5)).is_ok());
        assert!(gate.check(&Action::tap(-1.0, 0.5)).is_err());
        assert!(journal.events().is_empty());
    }
}
