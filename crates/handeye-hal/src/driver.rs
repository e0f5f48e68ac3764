//! Generic `Driver` trait for anything that can observe and act on a screen
//! or workspace: a wired robotic arm with a camera, a networked device, or a
//! simulation.

use async_trait::async_trait;
use handeye_types::{Action, DriverError, Frame};

/// A physical (or simulated) device that can capture frames and execute
/// primitive actions.
///
/// Drivers are exclusively owned by one controller at a time.  They must not
/// validate coordinates themselves; every action reaching
/// [`Driver::dispatch`] has already passed the kernel's safety guard.
#[async_trait]
pub trait Driver: Send {
    /// Stable identifier for this backend, e.g. `"serial:/dev/ttyUSB0"`.
    fn id(&self) -> &str;

    /// `true` once [`connect`][Driver::connect] has succeeded and until
    /// [`disconnect`][Driver::disconnect] is called.
    fn is_connected(&self) -> bool;

    /// Open the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the device cannot be reached.
    async fn connect(&mut self) -> Result<(), DriverError>;

    /// Close the underlying transport.  Disconnecting twice is not an error.
    async fn disconnect(&mut self) -> Result<(), DriverError>;

    /// Capture the current hardware state as a [`Frame`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the frame cannot be captured (camera
    /// unplugged, buffer unavailable, transport closed).
    async fn capture(&mut self) -> Result<Frame, DriverError>;

    /// Execute one primitive action.  Must run to completion once started.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the command cannot be delivered or the
    /// device reports a fault.
    async fn dispatch(&mut self, action: &Action) -> Result<(), DriverError>;
}
