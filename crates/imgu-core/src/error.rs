//! Error type for the IMGU streaming core.
//!
//! `ImguError` covers four families of failure:
//!
//! - **Backpressure** (`Busy`, `NoFreeSlot`): not a failure of the device; the
//!   operation is retried on the next opportunity.
//! - **Protocol** (`InvalidQueue`, `UnknownBuffer`): a malformed completion.
//!   The completion is dropped and processing continues.
//! - **Resource** (`Allocation`): fails the enclosing setup step, which unwinds.
//! - **Hardware / lifecycle** (`Hardware`, `NotStreaming`, `InvalidState`):
//!   surfaced to the caller of the top-level operation.
//!
//! Caller misuse (`InvalidBuffer`, `InvalidNode`) and `Config` errors are
//! reported synchronously and never touch hardware state.

use crate::frame::FrameNumber;
use crate::queue::{CssQueue, Node};
use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type ImguResult<T> = std::result::Result<T, ImguError>;

/// Errors raised by the streaming core and the layers below it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImguError {
    /// The hardware queue holds its maximum depth.
    #[error("hardware queue {0} is full")]
    Busy(CssQueue),

    /// Every pool slot is still in use by recent frames.
    #[error("no free pool slot for frame {frame}")]
    NoFreeSlot { frame: FrameNumber },

    /// The firmware reported a queue id outside the queue table.
    #[error("invalid css queue id {0}")]
    InvalidQueue(u32),

    /// A completion named a buffer the core does not own.
    #[error("completion for unknown buffer {index} on {node}")]
    UnknownBuffer { node: Node, index: u32 },

    /// Device memory could not be allocated.
    #[error("failed to allocate {size} bytes of device memory")]
    Allocation { size: usize },

    /// Caller memory could not be mapped for the device.
    #[error("failed to map {size} bytes into the device address space")]
    Mapping { size: usize },

    /// Failure reported by the firmware, power or address-space layer.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// The firmware is not streaming.
    #[error("css is not streaming")]
    NotStreaming,

    /// Operation not allowed in the current stream phase.
    #[error("cannot {op} while {phase}")]
    InvalidState { op: &'static str, phase: &'static str },

    /// The caller buffer cannot be used on this node.
    #[error("invalid buffer for {node}: {reason}")]
    InvalidBuffer { node: Node, reason: String },

    /// The node cannot take this operation.
    #[error("invalid node operation on {node}: {reason}")]
    InvalidNode { node: Node, reason: &'static str },

    /// Configuration rejected at device creation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ImguError {
    /// Whether this error only signals a temporary lack of capacity.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::NoFreeSlot { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImguError::Busy(CssQueue::Out);
        assert_eq!(err.to_string(), "hardware queue output is full");

        let err = ImguError::InvalidState {
            op: "stream on",
            phase: "streaming",
        };
        assert_eq!(err.to_string(), "cannot stream on while streaming");
    }

    #[test]
    fn test_backpressure_classification() {
        assert!(ImguError::Busy(CssQueue::Vf).is_backpressure());
        assert!(ImguError::NoFreeSlot {
            frame: FrameNumber::new(3)
        }
        .is_backpressure());
        assert!(!ImguError::Allocation { size: 16 }.is_backpressure());
        assert!(!ImguError::Hardware("fw".into()).is_backpressure());
    }
}
