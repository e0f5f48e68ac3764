//! `handeye-hal` – Hardware Abstraction Layer
//!
//! The execution core never talks to serial ports or network sockets
//! directly.  It talks to the [`Driver`] trait, and concrete backends
//! (wired-serial arm, networked device, simulation) are injected at
//! construction time.
//!
//! # Modules
//!
//! - [`driver`] – the [`Driver`] capability trait: connect, capture a
//!   [`Frame`][handeye_types::Frame], dispatch an
//!   [`Action`][handeye_types::Action].
//! - [`sim`] – [`SimDriver`]: an in-process logging stand-in that journals
//!   every call and can inject transport faults, so the whole stack runs in
//!   CI without hardware.

pub mod driver;
pub mod sim;

pub use driver::Driver;
pub use sim::{SimDriver, SimEvent, SimJournal};
