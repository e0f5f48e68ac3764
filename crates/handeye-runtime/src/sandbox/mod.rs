//! [`Sandbox`] – restricted script runtime.
//!
//! A script may call exactly one function with an effect outside the
//! interpreter: `step(goal)`, bound to the sandbox's [`TacticalController`].
//! Everything else available to it is a small set of pure helpers
//! (`range`, `len`, `print`, `log`, `str`, `int`, `enumerate`, `min`, `max`,
//! `abs`).
//!
//! Each run goes through:
//!
//! 1. **Parse** – [`parser::parse`]; malformed text ends the run with
//!    [`ErrorKind::Syntax`].
//! 2. **Scan** – [`scan::scan`] rejects imports, attribute access, dunder
//!    names, and any call or name outside the whitelist with
//!    [`ErrorKind::SandboxViolation`] before a single statement executes.
//! 3. **Connect** – the driver session is opened if needed.
//! 4. **Evaluate** – statements run in order in a fresh namespace.  The first
//!    error halts the script.
//!
//! `step` returns `true` on success and `false` when the goal exhausted its
//! attempts without a positive verification.  Safety violations, fatal
//! driver faults, attempts exhausted on faults, and cancellation abort the
//! script instead.
//!
//! # Example
//!
//! ```rust
//! use handeye_hal::SimDriver;
//! use handeye_perception::ScriptedGrounding;
//! use handeye_runtime::{ControllerConfig, Sandbox, SandboxConfig, TacticalController};
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let controller = TacticalController::new(
//!     Box::new(SimDriver::new("sim")),
//!     Box::new(ScriptedGrounding::new()),
//!     ControllerConfig { verify_delay: Duration::ZERO, ..Default::default() },
//! );
//! let sandbox = Sandbox::new(controller, SandboxConfig::default());
//!
//! let report = sandbox.execute("step('open app')").unwrap().await;
//! assert!(report.succeeded);
//! assert_eq!(report.log, vec!["open app: true"]);
//! # });
//! ```

mod eval;
pub mod lexer;
pub mod parser;
pub mod scan;
pub mod value;

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use handeye_types::{ErrorKind, ExecutionReport, RunStatistics, SandboxBusy, SandboxState, Skill};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, info_span};

use crate::controller::TacticalController;
use crate::sandbox::eval::Interpreter;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`Sandbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Most `step()` calls a single run may make.
    pub max_steps: u32,
    /// Most statements plus loop iterations a single run may execute.
    pub max_operations: u64,
    /// Make `step()` abort the script instead of returning `false` when a goal
    /// exhausts its attempts.
    pub abort_on_exhausted_retries: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_operations: 100_000,
            abort_on_exhausted_retries: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────────────────────────────────────

/// Script runtime bound to one [`TacticalController`].
///
/// At most one run is in flight per instance; a second
/// [`execute`](Sandbox::execute) while one is pending is refused with
/// [`SandboxBusy`] at the call site.
pub struct Sandbox {
    controller: Mutex<TacticalController>,
    config: SandboxConfig,
    state: watch::Sender<SandboxState>,
}

impl Sandbox {
    pub fn new(controller: TacticalController, config: SandboxConfig) -> Self {
        Self {
            controller: Mutex::new(controller),
            config,
            state: watch::Sender::new(SandboxState::Idle),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SandboxState {
        self.state.borrow().clone()
    }

    /// Receive every lifecycle transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SandboxState> {
        self.state.subscribe()
    }

    /// Give the controller back, e.g. to inspect its outcome history.
    pub fn into_controller(self) -> TacticalController {
        self.controller.into_inner()
    }

    /// Start running `script`.
    ///
    /// # Errors
    ///
    /// [`SandboxBusy`] if another run on this instance has not finished.
    /// Every other failure is reported inside the [`ExecutionReport`].
    pub fn execute<'a>(
        &'a self,
        script: &'a str,
    ) -> Result<impl Future<Output = ExecutionReport> + Send + 'a, SandboxBusy> {
        self.execute_with_cancel(script, CancellationToken::new())
    }

    /// Like [`execute`](Sandbox::execute), stopping early once `cancel` fires.
    pub fn execute_with_cancel<'a>(
        &'a self,
        script: &'a str,
        cancel: CancellationToken,
    ) -> Result<impl Future<Output = ExecutionReport> + Send + 'a, SandboxBusy> {
        self.start(script, cancel, info_span!("sandbox", skill = tracing::field::Empty))
    }

    /// Run a stored skill's code.
    pub fn execute_skill<'a>(
        &'a self,
        skill: &'a Skill,
    ) -> Result<impl Future<Output = ExecutionReport> + Send + 'a, SandboxBusy> {
        self.execute_skill_with_cancel(skill, CancellationToken::new())
    }

    pub fn execute_skill_with_cancel<'a>(
        &'a self,
        skill: &'a Skill,
        cancel: CancellationToken,
    ) -> Result<impl Future<Output = ExecutionReport> + Send + 'a, SandboxBusy> {
        info!(skill = %skill.id, name = %skill.name, "running stored skill");
        self.start(&skill.code, cancel, info_span!("sandbox", skill = %skill.id))
    }

    fn start<'a>(
        &'a self,
        script: &'a str,
        cancel: CancellationToken,
        span: Span,
    ) -> Result<impl Future<Output = ExecutionReport> + Send + 'a, SandboxBusy> {
        let mut controller = self.controller.try_lock().map_err(|_| SandboxBusy)?;
        Ok(async move {
            self.state.send_replace(SandboxState::Running);
            let report = self.run(&mut controller, script, &cancel).await;
            self.state.send_replace(report.state.clone());
            report
        }
        .instrument(span))
    }

    async fn run(
        &self,
        controller: &mut TacticalController,
        script: &str,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let program = match parser::parse(script) {
            Ok(program) => program,
            Err(e) => {
                let err = ErrorKind::Syntax {
                    line: e.line,
                    message: e.message,
                };
                return report(controller.statistics(), Vec::new(), Vec::new(), Some(err));
            }
        };

        if let Err(v) = scan::scan(&program) {
            let err = ErrorKind::SandboxViolation {
                line: v.line,
                message: v.message,
            };
            return report(controller.statistics(), Vec::new(), Vec::new(), Some(err));
        }

        if let Err(e) = controller.connect_if_needed().await {
            return report(
                controller.statistics(),
                Vec::new(),
                Vec::new(),
                Some(ErrorKind::Driver(e)),
            );
        }

        info!(statements = program.body.len(), "script started");
        let mut interpreter = Interpreter::new(controller, cancel, &self.config);
        let result = AssertUnwindSafe(interpreter.run(&program.body))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ErrorKind::Internal(panic_message(panic.as_ref()))));
        let (log, output) = interpreter.into_transcript();

        report(controller.statistics(), log, output, result.err())
    }
}

fn report(
    statistics: RunStatistics,
    log: Vec<String>,
    output: Vec<String>,
    error: Option<ErrorKind>,
) -> ExecutionReport {
    let state = match &error {
        None => {
            info!(steps = log.len(), "script completed");
            SandboxState::Completed
        }
        Some(e) => {
            error!(steps = log.len(), error = %e, "script aborted");
            SandboxState::Aborted(e.to_string())
        }
    };
    ExecutionReport {
        succeeded: error.is_none(),
        log,
        output,
        error,
        statistics,
        state,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panic during script execution: {detail}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
