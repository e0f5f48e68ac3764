//! `handeye-types` – shared data model for the HandEye execution core.
//!
//! Every value that crosses a crate boundary lives here: the [`Action`]
//! vocabulary the grounding model speaks, the [`Frame`] a driver captures,
//! the per-goal [`GoalOutcome`], the controller's [`RunStatistics`], and the
//! [`ExecutionReport`] handed back to callers of the sandbox.  The error
//! taxonomy is in [`error`].

pub mod error;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::{
    DriverError, ErrorKind, GoalError, GroundingError, MaxRetryError, SafetyError, SandboxBusy,
};

/// Resolution-independent screen/workspace coordinate.
///
/// Both components are expected to lie in `[0.0, 1.0]`.  Construction does not
/// enforce this: producers such as the grounding model may emit anything, and
/// it is the safety guard's job to reject out-of-bounds points before they
/// reach a driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// `true` when both components lie in `[0.0, 1.0]`.  NaN is never in bounds.
    pub fn is_within_bounds(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

impl fmt::Display for NormalizedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

/// A primitive physical action proposed by the grounding model and executed
/// by a driver after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", content = "payload")]
pub enum Action {
    /// Touch a single point.
    Tap { point: NormalizedPoint },
    /// Drag from one point to another.
    Swipe {
        from: NormalizedPoint,
        to: NormalizedPoint,
    },
    /// Enter text into the focused field.
    TypeText { text: String },
    /// Hold still for the given number of milliseconds.
    Wait { duration_ms: u64 },
}

impl Action {
    pub fn tap(x: f64, y: f64) -> Self {
        Action::Tap {
            point: NormalizedPoint::new(x, y),
        }
    }

    pub fn swipe(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Action::Swipe {
            from: NormalizedPoint::new(x1, y1),
            to: NormalizedPoint::new(x2, y2),
        }
    }

    pub fn type_text(text: impl Into<String>) -> Self {
        Action::TypeText { text: text.into() }
    }

    pub fn wait(duration: Duration) -> Self {
        Action::Wait {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Short verb used in log lines and driver journals.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::Swipe { .. } => "swipe",
            Action::TypeText { .. } => "type_text",
            Action::Wait { .. } => "wait",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Tap { point } => write!(f, "tap{point}"),
            Action::Swipe { from, to } => write!(f, "swipe{from}->{to}"),
            Action::TypeText { text } => write!(f, "type_text({text:?})"),
            Action::Wait { duration_ms } => write!(f, "wait({duration_ms}ms)"),
        }
    }
}

/// An opaque captured image of the current hardware state.
///
/// A frame lives for exactly one plan or verify round and is dropped as soon
/// as the grounding client has looked at it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    /// Frame width in pixels (0 when the backend does not report it).
    pub width: u32,
    /// Frame height in pixels (0 when the backend does not report it).
    pub height: u32,
    /// Encoded image bytes (PNG or JPEG, backend dependent).
    pub data: Vec<u8>,
}

impl Frame {
    /// Stamp a freshly captured image with a new id and the current time.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            width,
            height,
            data,
        }
    }
}

/// The result of one goal-execution call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalOutcome {
    pub goal: String,
    pub success: bool,
    /// Attempts consumed, counted from 1.
    pub attempts: u32,
    /// The last action that was dispatched (or proposed, for safety failures).
    pub action: Option<Action>,
    pub error: Option<ErrorKind>,
    pub elapsed_ms: u64,
}

/// Counters owned by one tactical controller for its whole lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Goal-execution calls started.
    pub total_steps: u64,
    /// Capture-plan-act-verify attempts run, first attempts included.
    pub total_attempts: u64,
    /// Attempts after the first one for a goal.
    pub total_retries: u64,
    /// Goals that ended in any terminal failure.
    pub total_failures: u64,
}

/// Lifecycle of a sandbox instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SandboxState {
    Idle,
    Running,
    Completed,
    Aborted(String),
}

/// The sole output surface of the execution core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub succeeded: bool,
    /// One `"<goal>: <true|false>"` line per `step()` call, in call order, including a
    /// call that aborted the script.
    pub log: Vec<String>,
    /// Lines written by `print`/`log` inside the script.
    pub output: Vec<String>,
    pub error: Option<ErrorKind>,
    pub statistics: RunStatistics,
    pub state: SandboxState,
}

/// A reusable orchestration script owned by the skill subsystem.
///
/// The core only ever reads [`Skill::code`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub success_count: u64,
}
