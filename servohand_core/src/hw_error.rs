//! Maps `Box<dyn Error>` from the `Transport` boundary to typed `HandError`.
//!
//! `servohand_traits::Transport` returns `Box<dyn Error + Send + Sync>`; this
//! module converts those to our error enum, with an optional feature-gated
//! path for `servohand_hardware::HwError` downcasting.

use crate::error::{HandError, ProtocolError};

/// Map a trait-boundary error to a typed `HandError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> HandError {
    #[cfg(feature = "hardware-errors")]
    {
        use servohand_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => HandError::Protocol(ProtocolError::Timeout),
                other => HandError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        HandError::Protocol(ProtocolError::Timeout)
    } else {
        HandError::Transport(s)
    }
}
