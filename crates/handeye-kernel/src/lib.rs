//! `handeye-kernel` – Safety Enforcement
//!
//! The kernel does not plan and does not observe; it enforces the physical
//! invariants every action must satisfy before it may touch hardware.
//!
//! # Modules
//!
//! - [`safety_guard`] – [`SafetyGuard`]: pure validation of an
//!   [`Action`][handeye_types::Action] against coordinate bounds and
//!   parameter limits.  Fails on the first violation; never clamps.
//! - [`dispatch_gate`] – [`DispatchGate`]: owns the
//!   [`Driver`][handeye_hal::Driver] and is the only path by which an action
//!   reaches it.  Every [`DispatchGate::dispatch`] validates first.

pub mod dispatch_gate;
pub mod safety_guard;

pub use dispatch_gate::{DispatchGate, GateError};
pub use safety_guard::{SafetyGuard, SafetyLimits};
