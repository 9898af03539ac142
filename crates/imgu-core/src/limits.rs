//! Hard limits and default sizes for queues and buffers.

use crate::error::ImguError;
use crate::queue::{CssQueue, PerQueue};

/// Buffers the firmware accepts per queue before reporting busy.
pub const MAX_QUEUE_DEPTH: usize = 2 + 2;

/// Default slot count of parameter pools.
pub const POOL_SIZE: usize = 4;

/// Largest width or height accepted for a pixel format.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Largest single buffer the core will allocate (default: 256MB).
pub const MAX_BUFFER_BYTES: usize = 256 * 1024 * 1024;

/// Default preallocation for filler buffers, sized for the largest expected
/// frame so streaming normally never reallocates.
#[must_use]
pub fn default_dummy_sizes() -> PerQueue<usize> {
    PerQueue::from_fn(|queue| match queue {
        CssQueue::In | CssQueue::Params => 0,
        CssQueue::Out => 4160 * 3120 * 12 / 8,
        CssQueue::Vf => 1920 * 1080 * 12 / 8,
        CssQueue::Stat3a => 125_664,
        CssQueue::StatDvs => 10_336,
    })
}

/// Reject dimensions outside `1..=MAX_FRAME_DIMENSION`.
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ImguError> {
    let valid = |v: u32| (1..=MAX_FRAME_DIMENSION).contains(&v);
    if valid(width) && valid(height) {
        Ok(())
    } else {
        Err(ImguError::Config(format!(
            "frame {width}x{height} outside 1..={MAX_FRAME_DIMENSION}"
        )))
    }
}

/// Size of a 12-bit-per-pixel frame, checked against [`MAX_BUFFER_BYTES`].
pub fn nv12_size(width: u32, height: u32) -> Result<usize, ImguError> {
    let bytes = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(12))
        .map(|bits| bits / 8)
        .ok_or_else(|| ImguError::Config("frame size overflow".into()))?;

    if bytes > MAX_BUFFER_BYTES {
        return Err(ImguError::Config(format!(
            "frame of {bytes} bytes exceeds {MAX_BUFFER_BYTES}"
        )));
    }
    Ok(bytes)
}
