//! The `GroundingClient` capability trait.

use async_trait::async_trait;
use handeye_types::{Action, Frame, GroundingError};

/// A vision-grounding model service.
///
/// Both calls may be slow and may fail; callers treat a failure as a
/// transient fault that costs one attempt.  Implementations are responsible
/// for their own request timeouts.
#[async_trait]
pub trait GroundingClient: Send {
    /// Propose the next action that moves the device towards `goal`.
    async fn plan(&mut self, frame: &Frame, goal: &str) -> Result<Action, GroundingError>;

    /// Decide whether `goal` is visibly achieved in `frame`.
    async fn verify(&mut self, frame: &Frame, goal: &str) -> Result<bool, GroundingError>;
}
