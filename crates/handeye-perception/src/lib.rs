//! `handeye-perception` – Vision Grounding
//!
//! Maps a goal and a captured frame onto a concrete [`Action`], and judges
//! whether a goal has been achieved.  The execution core consumes this
//! capability as a black box through the [`GroundingClient`] trait.
//!
//! # Modules
//!
//! - [`grounding`] – the [`GroundingClient`] trait (`plan`, `verify`).
//! - [`scripted`] – [`ScriptedGrounding`]: a deterministic stand-in that
//!   replays queued plans and verdicts, for tests and dry runs.
//! - [`vision_client`] – [`VisionGroundingClient`]: an async client for an
//!   OpenAI-compatible vision model, with a tolerant reply parser.
//!
//! [`Action`]: handeye_types::Action

pub mod grounding;
pub mod scripted;
pub mod vision_client;

pub use grounding::GroundingClient;
pub use scripted::{GroundingCall, ScriptedGrounding};
pub use vision_client::{VisionGroundingClient, parse_action, parse_verdict};
