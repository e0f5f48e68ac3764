//! [`SafetyGuard`] – physical safety interlock.
//!
//! Before an [`Action`] is dispatched to a driver, pass it through
//! [`SafetyGuard::validate`].  Checks run field by field in a fixed order and
//! the first violation is returned as a [`SafetyError`]; the action is
//! **not** corrected or clamped.
//!
//! | Action | Checked fields |
//! |---|---|
//! | `Tap` | `point.x`, `point.y` ∈ `[0, 1]` |
//! | `Swipe` | `from.x`, `from.y`, `to.x`, `to.y` ∈ `[0, 1]` |
//! | `TypeText` | `1 ≤ chars ≤ max_text_chars` |
//! | `Wait` | `duration ≤ max_wait` |

use std::time::Duration;

use handeye_types::{Action, NormalizedPoint, SafetyError};

const UNIT_BOUND: &str = "[0.0, 1.0]";

/// Parameter limits applied on top of the fixed coordinate invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyLimits {
    /// Longest `Wait` the device may be told to hold.
    pub max_wait: Duration,
    /// Longest `TypeText` payload, in characters.
    pub max_text_chars: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            max_text_chars: 1000,
        }
    }
}

/// Stateless validator for proposed actions.
///
/// # Example
///
/// ```
/// use handeye_kernel::SafetyGuard;
/// use handeye_types::Action;
///
/// let guard = SafetyGuard::default();
/// assert!(guard.validate(&Action::tap(0.5, 0.5)).is_ok());
///
/// let err = guard.validate(&Action::tap(1.5, 0.5)).unwrap_err();
/// assert_eq!(err.field, "tap.point.x");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGuard {
    limits: SafetyLimits,
}

impl SafetyGuard {
    pub fn new(limits: SafetyLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SafetyLimits {
        self.limits
    }

    /// Validate `action`, returning the first violated invariant.
    pub fn validate(&self, action: &Action) -> Result<(), SafetyError> {
        match action {
            Action::Tap { point } => check_point("tap.point", point),
            Action::Swipe { from, to } => {
                check_point("swipe.from", from)?;
                check_point("swipe.to", to)
            }
            Action::TypeText { text } => {
                let chars = text.chars().count();
                if chars == 0 || chars > self.limits.max_text_chars {
                    return Err(SafetyError {
                        field: "type_text.text".to_string(),
                        value: chars as f64,
                        bound: format!("[1, {}] chars", self.limits.max_text_chars),
                    });
                }
                Ok(())
            }
            Action::Wait { duration_ms } => {
                let max_ms = u64::try_from(self.limits.max_wait.as_millis()).unwrap_or(u64::MAX);
                if *duration_ms > max_ms {
                    return Err(SafetyError {
                        field: "wait.duration_ms".to_string(),
                        value: *duration_ms as f64,
                        bound: format!("[0, {max_ms}] ms"),
                    });
                }
                Ok(())
            }
        }
    }
}

fn check_point(prefix: &str, point: &NormalizedPoint) -> Result<(), SafetyError> {
    check_unit(&format!("{prefix}.x"), point.x)?;
    check_unit(&format!("{prefix}.y"), point.y)
}

fn check_unit(field: &str, value: f64) -> Result<(), SafetyError> {
    // `contains` is false for NaN, so non-finite values are rejected too.
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SafetyError {
            field: field.to_string(),
            value,
            bound: UNIT_BOUND.to_string(),
        })
    }
}
