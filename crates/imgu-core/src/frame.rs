//! Frame counter used to age pool slots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic frame counter that wraps at `u32::MAX`.
///
/// Distances are taken modulo 2^32, so comparisons stay correct across one
/// wrap of the counter. A frame that appears to lie in the future of another
/// yields a huge distance and therefore counts as "long ago".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameNumber(u32);

impl FrameNumber {
    /// Frame number `value`.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The following frame, wrapping at the end of the range.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Number of frames issued since `earlier`.
    #[must_use]
    pub const fn frames_since(self, earlier: FrameNumber) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
