//! [`TacticalController`] – the closed-loop goal executor.
//!
//! Each call to [`TacticalController::execute_goal`] runs up to
//! `max_attempts` rounds of:
//!
//! 1. **Capture** – the driver produces a [`Frame`][handeye_types::Frame].
//! 2. **Plan** – the grounding client proposes an [`Action`].
//! 3. **Guard** – the [`SafetyGuard`] validates it.  A violation ends the goal
//!    immediately with [`GoalError::Safety`]; it is never retried.
//! 4. **Act** – the action goes through the [`DispatchGate`] to the driver.
//! 5. **Settle** – the controller sleeps for `verify_delay`.
//! 6. **Verify** – a second frame is captured and the grounding client judges
//!    whether the goal was achieved.
//!
//! A `false` verdict, a driver fault, or a grounding failure consumes one
//! attempt.  When every attempt is used up the goal fails with
//! [`GoalError::MaxRetry`].
//!
//! Cancellation is honoured before each attempt and during Settle.  An Act in
//! flight always runs to completion.
//!
//! # Example
//!
//! ```rust
//! use handeye_hal::SimDriver;
//! use handeye_perception::ScriptedGrounding;
//! use handeye_runtime::{ControllerConfig, TacticalController};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = ControllerConfig { verify_delay: Duration::ZERO, ..Default::default() };
//! let mut controller = TacticalController::new(
//!     Box::new(SimDriver::new("sim")),
//!     Box::new(ScriptedGrounding::new()),
//!     config,
//! );
//! let outcome = controller.execute_goal("open app").await.unwrap();
//! assert!(outcome.success);
//! assert_eq!(controller.statistics().total_steps, 1);
//! # });
//! ```

use std::time::Duration;

use handeye_hal::Driver;
use handeye_kernel::{DispatchGate, GateError, SafetyGuard};
use handeye_perception::GroundingClient;
use handeye_types::{
    Action, DriverError, ErrorKind, GoalError, GoalOutcome, MaxRetryError, RunStatistics,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`TacticalController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Attempts per goal, the first one included.  Values below 1 act as 1.
    pub max_attempts: u32,
    /// Settle time between Act and Verify.
    pub verify_delay: Duration,
    /// Treat driver faults as terminal instead of consuming an attempt.
    pub driver_faults_fatal: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            verify_delay: Duration::from_secs(2),
            driver_faults_fatal: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attempt result
// ─────────────────────────────────────────────────────────────────────────────

/// How a single non-terminal attempt ended.
enum Attempt {
    Verified,
    NotVerified,
    /// A transient driver or grounding fault, already rendered for the error.
    Fault(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// TacticalController
// ─────────────────────────────────────────────────────────────────────────────

/// Owns one driver (behind a [`DispatchGate`]) and one grounding client.
pub struct TacticalController {
    gate: DispatchGate,
    grounding: Box<dyn GroundingClient>,
    config: ControllerConfig,
    stats: RunStatistics,
    outcomes: Vec<GoalOutcome>,
}

impl TacticalController {
    /// Build a controller with the default [`SafetyGuard`].
    pub fn new(
        driver: Box<dyn Driver>,
        grounding: Box<dyn GroundingClient>,
        config: ControllerConfig,
    ) -> Self {
        Self::with_guard(driver, grounding, SafetyGuard::default(), config)
    }

    pub fn with_guard(
        driver: Box<dyn Driver>,
        grounding: Box<dyn GroundingClient>,
        guard: SafetyGuard,
        config: ControllerConfig,
    ) -> Self {
        Self {
            gate: DispatchGate::new(driver, guard),
            grounding,
            config,
            stats: RunStatistics::default(),
            outcomes: Vec::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Snapshot of the counters accumulated since construction.
    pub fn statistics(&self) -> RunStatistics {
        self.stats
    }

    /// Every outcome produced so far, in call order.
    pub fn outcomes(&self) -> &[GoalOutcome] {
        &self.outcomes
    }

    pub fn driver_id(&self) -> &str {
        self.gate.driver_id()
    }

    /// Open the driver session unless it is already open.
    pub async fn connect_if_needed(&mut self) -> Result<(), DriverError> {
        if !self.gate.is_connected() {
            info!(driver = %self.gate.driver_id(), "connecting driver");
            self.gate.connect().await?;
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), DriverError> {
        if self.gate.is_connected() {
            self.gate.disconnect().await?;
        }
        Ok(())
    }

    /// Execute one goal with no external cancellation.
    pub async fn execute_goal(&mut self, goal: &str) -> Result<GoalOutcome, GoalError> {
        self.execute_goal_with_cancel(goal, &CancellationToken::new())
            .await
    }

    /// Execute one goal, honouring `cancel` at attempt boundaries and during
    /// the settle delay.
    ///
    /// # Errors
    ///
    /// - [`GoalError::Safety`] – the planned action violated an invariant.
    /// - [`GoalError::MaxRetry`] – every attempt ended unverified or faulted.
    /// - [`GoalError::Driver`] – a driver fault with `driver_faults_fatal` set.
    /// - [`GoalError::Cancelled`] – `cancel` fired.
    pub async fn execute_goal_with_cancel(
        &mut self,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<GoalOutcome, GoalError> {
        let span = info_span!("goal", goal = %goal, driver = %self.gate.driver_id());
        self.run_goal(goal, cancel).instrument(span).await
    }

    async fn run_goal(
        &mut self,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<GoalOutcome, GoalError> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        self.stats.total_steps += 1;
        info!(max_attempts, "goal started");

        let mut last_action: Option<Action> = None;
        let mut last_fault: Option<String> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                let err = GoalError::Cancelled {
                    goal: goal.to_string(),
                };
                return Err(self.fail(goal, attempt - 1, last_action, started, err));
            }

            self.stats.total_attempts += 1;
            if attempt > 1 {
                self.stats.total_retries += 1;
            }
            debug!(attempt, "attempt started");

            match self.attempt(goal, cancel, &mut last_action).await {
                Ok(Attempt::Verified) => {
                    info!(attempt, "goal verified");
                    let outcome = GoalOutcome {
                        goal: goal.to_string(),
                        success: true,
                        attempts: attempt,
                        action: last_action,
                        error: None,
                        elapsed_ms: elapsed_ms(started),
                    };
                    self.outcomes.push(outcome.clone());
                    return Ok(outcome);
                }
                Ok(Attempt::NotVerified) => {
                    warn!(attempt, "verification negative");
                    last_fault = None;
                }
                Ok(Attempt::Fault(fault)) => {
                    warn!(attempt, %fault, "attempt faulted");
                    last_fault = Some(fault);
                }
                Err(err) => return Err(self.fail(goal, attempt, last_action, started, err)),
            }
        }

        let err = MaxRetryError {
            goal: goal.to_string(),
            attempts: max_attempts,
            last_action: last_action.clone(),
            last_fault,
        };
        Err(self.fail(goal, max_attempts, last_action, started, err.into()))
    }

    /// Run one capture → plan → guard → act → settle → verify round.
    ///
    /// `Err` is terminal for the goal; every recoverable outcome is `Ok`.
    async fn attempt(
        &mut self,
        goal: &str,
        cancel: &CancellationToken,
        last_action: &mut Option<Action>,
    ) -> Result<Attempt, GoalError> {
        // 1. Capture
        let frame = match self.gate.capture().await {
            Ok(frame) => frame,
            Err(e) => return self.driver_fault(e),
        };
        debug!(frame = %frame.id, "captured");

        // 2. Plan
        let action = match self.grounding.plan(&frame, goal).await {
            Ok(action) => action,
            Err(e) => return Ok(Attempt::Fault(e.to_string())),
        };
        drop(frame);
        debug!(%action, "planned");
        *last_action = Some(action.clone());

        // 3. Guard
        self.gate.check(&action)?;

        // 4. Act: the gate validates again at the driver boundary.
        match self.gate.dispatch(&action).await {
            Ok(()) => {}
            Err(GateError::Safety(e)) => return Err(e.into()),
            Err(GateError::Driver(e)) => return self.driver_fault(e),
        }

        // 5. Settle
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(GoalError::Cancelled { goal: goal.to_string() });
            }
            _ = tokio::time::sleep(self.config.verify_delay) => {}
        }

        // 6. Verify
        let frame = match self.gate.capture().await {
            Ok(frame) => frame,
            Err(e) => return self.driver_fault(e),
        };
        match self.grounding.verify(&frame, goal).await {
            Ok(true) => Ok(Attempt::Verified),
            Ok(false) => Ok(Attempt::NotVerified),
            Err(e) => Ok(Attempt::Fault(e.to_string())),
        }
    }

    fn driver_fault(&self, err: DriverError) -> Result<Attempt, GoalError> {
        if self.config.driver_faults_fatal {
            Err(err.into())
        } else {
            Ok(Attempt::Fault(err.to_string()))
        }
    }

    /// Record a terminal failure and hand the error back.
    fn fail(
        &mut self,
        goal: &str,
        attempts: u32,
        action: Option<Action>,
        started: Instant,
        err: GoalError,
    ) -> GoalError {
        self.stats.total_failures += 1;
        warn!(attempts, error = %err, "goal failed");
        self.outcomes.push(GoalOutcome {
            goal: goal.to_string(),
            success: false,
            attempts,
            action,
            error: Some(ErrorKind::from(err.clone())),
            elapsed_ms: elapsed_ms(started),
        });
        err
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use handeye_hal::{SimDriver, SimEvent, SimJournal};
    use handeye_perception::{GroundingCall, ScriptedGrounding};
    use handeye_types::GroundingError;

    fn instant() -> ControllerConfig {
        ControllerConfig {
            verify_delay: Duration::ZERO,
            ..ControllerConfig::default()
        }
    }

    fn build(
        driver: SimDriver,
        grounding: ScriptedGrounding,
        config: ControllerConfig,
    ) -> (TacticalController, SimJournal) {
        let journal = driver.journal();
        let controller = TacticalController::new(Box::new(driver), Box::new(grounding), config);
        (controller, journal)
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.verify_delay, Duration::from_secs(2));
        assert!(!config.driver_faults_fatal);
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let (mut c, journal) = build(SimDriver::new("sim"), ScriptedGrounding::new(), instant());
        let outcome = c.execute_goal("open app").await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.action, Some(Action::tap(0.5, 0.5)));
        assert_eq!(
            c.statistics(),
            RunStatistics {
                total_steps: 1,
                total_attempts: 1,
                total_retries: 0,
                total_failures: 0,
            }
        );
        assert_eq!(journal.captures(), 2);
        assert_eq!(journal.dispatched().len(), 1);
    }

    #[tokio::test]
    async fn phases_run_in_order() {
        let grounding = ScriptedGrounding::new();
        let calls = grounding.calls();
        let (mut c, journal) = build(SimDriver::new("sim"), grounding, instant());
        c.execute_goal("like").await.unwrap();

        assert_eq!(
            journal.events(),
            vec![
                SimEvent::Capture,
                SimEvent::Dispatch(Action::tap(0.5, 0.5)),
                SimEvent::Capture,
            ]
        );
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                GroundingCall::Plan("like".into()),
                GroundingCall::Verify("like".into())
            ]
        );
    }

    #[tokio::test]
    async fn retry_after_negative_verdict() {
        let grounding = ScriptedGrounding::new().then_verify(false);
        let (mut c, journal) = build(SimDriver::new("sim"), grounding, instant());
        let outcome = c.execute_goal("like").await.unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(c.statistics().total_retries, 1);
        assert_eq!(c.statistics().total_attempts, 2);
        assert_eq!(journal.dispatched().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_yield_max_retry() {
        let grounding = ScriptedGrounding::new()
            .with_default_action(Action::tap(0.2, 0.3))
            .with_default_verdict(false);
        let config = ControllerConfig {
            max_attempts: 3,
            ..instant()
        };
        let (mut c, _) = build(SimDriver::new("sim"), grounding, config);
        let err = c.execute_goal("like").await.unwrap_err();

        match err {
            GoalError::MaxRetry(e) => {
                assert_eq!(e.attempts, 3);
                assert_eq!(e.last_action, Some(Action::tap(0.2, 0.3)));
                assert!(e.is_verification_failure());
            }
            other => panic!("expected MaxRetry, got {other:?}"),
        }
        assert_eq!(c.statistics().total_retries, 2);
        assert_eq!(c.statistics().total_failures, 1);
    }

    #[tokio::test]
    async fn unsafe_plan_is_fatal_and_never_dispatched() {
        let grounding = ScriptedGrounding::new().with_default_action(Action::tap(1.5, 0.5));
        let (mut c, journal) = build(SimDriver::new("sim"), grounding, instant());
        let err = c.execute_goal("like").await.unwrap_err();

        assert!(matches!(err, GoalError::Safety(ref e) if e.field == "tap.point.x"));
        assert!(journal.dispatched().is_empty());
        assert_eq!(c.statistics().total_attempts, 1);
        assert_eq!(c.statistics().total_failures, 1);
    }

    #[tokio::test]
    async fn driver_fault_consumes_an_attempt() {
        let driver = SimDriver::new("sim").fail_next_dispatches(1);
        let (mut c, _) = build(driver, ScriptedGrounding::new(), instant());
        let outcome = c.execute_goal("like").await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(c.statistics().total_retries, 1);
    }

    #[tokio::test]
    async fn repeated_driver_faults_are_reported_in_max_retry() {
        let driver = SimDriver::new("sim").fail_next_captures(2);
        let (mut c, _) = build(driver, ScriptedGrounding::new(), instant());
        match c.execute_goal("like").await.unwrap_err() {
            GoalError::MaxRetry(e) => {
                assert!(!e.is_verification_failure());
                assert!(e.last_fault.unwrap().contains("capture"));
                assert_eq!(e.last_action, None);
            }
            other => panic!("expected MaxRetry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_driver_faults_stop_immediately() {
        let driver = SimDriver::new("sim").fail_next_dispatches(1);
        let config = ControllerConfig {
            driver_faults_fatal: true,
            ..instant()
        };
        let (mut c, _) = build(driver, ScriptedGrounding::new(), config);
        let err = c.execute_goal("like").await.unwrap_err();
        assert!(matches!(err, GoalError::Driver(_)));
        assert_eq!(c.statistics().total_attempts, 1);
    }

    #[tokio::test]
    async fn grounding_failure_is_transient() {
        let grounding =
            ScriptedGrounding::new().then_plan_error(GroundingError::Unparseable("??".into()));
        let (mut c, journal) = build(SimDriver::new("sim"), grounding, instant());
        let outcome = c.execute_goal("like").await.unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(journal.dispatched().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_is_observed() {
        let config = ControllerConfig {
            verify_delay: Duration::from_secs(2),
            ..ControllerConfig::default()
        };
        let (mut c, _) = build(SimDriver::new("sim"), ScriptedGrounding::new(), config);
        let before = Instant::now();
        let outcome = c.execute_goal("like").await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(2));
        assert!(outcome.elapsed_ms >= 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_settle_but_not_act() {
        let driver = SimDriver::new("sim").with_dispatch_latency(Duration::from_millis(500));
        let config = ControllerConfig {
            verify_delay: Duration::from_secs(10),
            ..ControllerConfig::default()
        };
        let (mut c, journal) = build(driver, ScriptedGrounding::new(), config);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = c.execute_goal_with_cancel("like", &cancel).await.unwrap_err();

        assert!(matches!(err, GoalError::Cancelled { .. }));
        // The in-flight dispatch completed; the settle sleep did not.
        assert_eq!(journal.dispatched().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(journal.captures(), 1);
        assert_eq!(c.statistics().total_failures, 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let (mut c, journal) = build(SimDriver::new("sim"), ScriptedGrounding::new(), instant());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = c.execute_goal_with_cancel("like", &cancel).await.unwrap_err();
        assert!(matches!(err, GoalError::Cancelled { .. }));
        assert!(journal.events().is_empty());
        assert_eq!(c.outcomes()[0].attempts, 0);
    }

    #[tokio::test]
    async fn outcomes_are_recorded_for_success_and_failure() {
        let grounding = ScriptedGrounding::new()
            .then_plan(Action::tap(0.1, 0.1))
            .then_plan(Action::tap(2.0, 0.1));
        let (mut c, _) = build(SimDriver::new("sim"), grounding, instant());
        c.execute_goal("first").await.unwrap();
        c.execute_goal("second").await.unwrap_err();

        let outcomes = c.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(matches!(outcomes[1].error, Some(ErrorKind::Safety(_))));
        assert_eq!(outcomes[1].action, Some(Action::tap(2.0, 0.1)));
    }

    #[tokio::test]
    async fn connect_if_needed_connects_once() {
        let (mut c, journal) = build(SimDriver::new("sim"), ScriptedGrounding::new(), instant());
        c.connect_if_needed().await.unwrap();
        c.connect_if_needed().await.unwrap();
        c.disconnect().await.unwrap();
        assert_eq!(journal.events(), vec![SimEvent::Connect, SimEvent::Disconnect]);
    }
}
