//! In-process simulation driver for CI/CD testing without physical hardware.
//!
//! [`SimDriver`] accepts every action, journals each call in order, and
//! returns a blank frame from [`capture`][Driver::capture].  Tests keep a
//! [`SimJournal`] handle to assert on what reached the "hardware" after the
//! driver itself has been moved into a controller.
//!
//! # Example
//!
//! ```rust
//! use handeye_hal::{Driver, SimDriver, SimEvent};
//! use handeye_types::Action;
//!
//! # tokio_test_block(async {
//! let mut driver = SimDriver::new("sim");
//! let journal = driver.journal();
//!
//! driver.connect().await.unwrap();
//! driver.dispatch(&Action::tap(0.5, 0.5)).await.unwrap();
//!
//! assert_eq!(journal.dispatched(), vec![Action::tap(0.5, 0.5)]);
//! assert!(matches!(journal.events()[0], SimEvent::Connect));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f);
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use handeye_types::{Action, DriverError, Frame};
use tracing::{debug, info};

use crate::driver::Driver;

// ────────────────────────────────────────────────────────────────────────────
// Journal
// ────────────────────────────────────────────────────────────────────────────

/// One call observed by a [`SimDriver`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Connect,
    Disconnect,
    Capture,
    Dispatch(Action),
}

/// Shared, cloneable view of everything a [`SimDriver`] has been asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimJournal {
    events: Arc<Mutex<Vec<SimEvent>>>,
}

impl SimJournal {
    /// Every call, in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().clone()
    }

    /// Only the dispatched actions, in order.
    pub fn dispatched(&self) -> Vec<Action> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                SimEvent::Dispatch(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of frames captured so far.
    pub fn captures(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, SimEvent::Capture))
            .count()
    }

    fn record(&self, event: SimEvent) {
        self.lock().push(event);
    }

    // A poisoned journal only means a test thread panicked mid-push; the
    // recorded events are still valid.
    fn lock(&self) -> MutexGuard<'_, Vec<SimEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimDriver
// ────────────────────────────────────────────────────────────────────────────

/// A simulated device: the no-op logging stand-in.
pub struct SimDriver {
    id: String,
    connected: bool,
    journal: SimJournal,
    /// Remaining capture calls that will fail with a transport fault.
    failing_captures: u32,
    /// Remaining dispatch calls that will fail with a transport fault.
    failing_dispatches: u32,
    /// Simulated time each dispatch takes to complete.
    dispatch_latency: Duration,
}

impl SimDriver {
    /// Create a new simulated driver with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: false,
            journal: SimJournal::default(),
            failing_captures: 0,
            failing_dispatches: 0,
            dispatch_latency: Duration::ZERO,
        }
    }

    /// Make the next `n` calls to `capture` fail.
    pub fn fail_next_captures(mut self, n: u32) -> Self {
        self.failing_captures = n;
        self
    }

    /// Make the next `n` calls to `dispatch` fail.
    pub fn fail_next_dispatches(mut self, n: u32) -> Self {
        self.failing_dispatches = n;
        self
    }

    /// Make every dispatch take `latency` of (tokio) time.
    pub fn with_dispatch_latency(mut self, latency: Duration) -> Self {
        self.dispatch_latency = latency;
        self
    }

    /// A handle onto this driver's call journal.
    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }
}

#[async_trait]
impl Driver for SimDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), DriverError> {
        info!(driver = %self.id, "sim driver connected");
        self.connected = true;
        self.journal.record(SimEvent::Connect);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DriverError> {
        info!(driver = %self.id, "sim driver disconnected");
        self.connected = false;
        self.journal.record(SimEvent::Disconnect);
        Ok(())
    }

    async fn capture(&mut self) -> Result<Frame, DriverError> {
        self.journal.record(SimEvent::Capture);
        if self.failing_captures > 0 {
            self.failing_captures -= 1;
            return Err(DriverError::new(&self.id, "simulated capture fault"));
        }
        debug!(driver = %self.id, "capture");
        Ok(Frame::new(4, 4, vec![0u8; 16]))
    }

    async fn dispatch(&mut self, action: &Action) -> Result<(), DriverError> {
        if !self.dispatch_latency.is_zero() {
            tokio::time::sleep(self.dispatch_latency).await;
        }
        self.journal.record(SimEvent::Dispatch(action.clone()));
        if self.failing_dispatches > 0 {
            self.failing_dispatches -= 1;
            return Err(DriverError::new(&self.id, "simulated dispatch fault"));
        }
        info!(driver = %self.id, %action, "dispatch");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_driver_journals_calls_in_order() {
        let mut driver = SimDriver::new("sim");
        let journal = driver.journal();

        driver.connect().await.unwrap();
        driver.capture().await.unwrap();
        driver.dispatch(&Action::swipe(0.5, 0.8, 0.5, 0.2)).await.unwrap();
        driver.disconnect().await.unwrap();

        assert_eq!(
            journal.events(),
            vec![
                SimEvent::Connect,
                SimEvent::Capture,
                SimEvent::Dispatch(Action::swipe(0.5, 0.8, 0.5, 0.2)),
                SimEvent::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn sim_driver_returns_blank_frame() {
        let mut driver = SimDriver::new("sim");
        let frame = driver.capture().await.unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 4);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn injected_capture_faults_are_consumed_in_order() {
        let mut driver = SimDriver::new("sim").fail_next_captures(2);
        assert!(driver.capture().await.is_err());
        assert!(driver.capture().await.is_err());
        assert!(driver.capture().await.is_ok());
    }

    #[tokio::test]
    async fn injected_dispatch_fault_is_reported_with_driver_id() {
        let mut driver = SimDriver::new("arm0").fail_next_dispatches(1);
        let err = driver.dispatch(&Action::tap(0.1, 0.1)).await.unwrap_err();
        assert_eq!(err.component, "arm0");
        assert!(driver.dispatch(&Action::tap(0.1, 0.1)).await.is_ok());
    }

    #[tokio::test]
    async fn connection_state_follows_connect_and_disconnect() {
        let mut driver = SimDriver::new("sim");
        assert!(!driver.is_connected());
        driver.connect().await.unwrap();
        assert!(driver.is_connected());
        driver.disconnect().await.unwrap();
        assert!(!driver.is_connected());
    }
}
