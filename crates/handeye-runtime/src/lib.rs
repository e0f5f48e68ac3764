//! `handeye-runtime` – The Execution Core
//!
//! Turns orchestration scripts into verified physical effects.
//!
//! # Modules
//!
//! - [`controller`] – [`TacticalController`]: the per-goal
//!   capture → plan → guard → act → settle → verify loop with bounded retries
//!   and run statistics.
//! - [`sandbox`] – [`Sandbox`]: runs an untrusted script whose only
//!   capability is `step(goal)`, bound to one controller, and returns a
//!   structured [`ExecutionReport`][handeye_types::ExecutionReport].
//! - [`telemetry`] – `tracing` subscriber and optional OTLP export.

pub mod controller;
pub mod sandbox;
pub mod telemetry;

pub use controller::{ControllerConfig, TacticalController};
pub use sandbox::{Sandbox, SandboxConfig};
