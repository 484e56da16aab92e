// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Display;

use thiserror::Error;

/// Failures surfaced by the frame loop.
///
/// Only [`FrameError::OutOfDate`] is recoverable; everything else ends the loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame ring needs at least one frame slot")]
    NoFrameSlots,

    #[error("swapchain is out of date")]
    OutOfDate,

    #[error("device lost")]
    DeviceLost,

    #[error("{op} failed: {message}")]
    Backend { op: &'static str, message: String },
}

impl FrameError {
    pub fn backend(op: &'static str, err: impl Display) -> Self {
        FrameError::Backend {
            op,
            message: err.to_string(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::OutOfDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staleness_is_recoverable() {
        assert!(FrameError::OutOfDate.is_recoverable());
        assert!(!FrameError::DeviceLost.is_recoverable());
        assert!(!FrameError::NoFrameSlots.is_recoverable());
        assert!(!FrameError::backend("queue_submit", "ERROR_OUT_OF_HOST_MEMORY").is_recoverable());
    }

    #[test]
    fn backend_error_names_the_call() {
        let err = FrameError::backend("acquire_next_image", "ERROR_SURFACE_LOST_KHR");
        assert_eq!(
            err.to_string(),
            "acquire_next_image failed: ERROR_SURFACE_LOST_KHR"
        );
    }
}
