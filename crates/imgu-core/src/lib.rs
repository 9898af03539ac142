//! Core types and traits for the IMGU streaming core.
//!
//! This crate holds everything the pool and the driver core share:
//!
//! - [`ImguError`]: the single error type
//! - [`FrameNumber`]: wrapping frame counter used for pool aging
//! - [`Node`] / [`CssQueue`]: caller nodes and the hardware queues they map to
//! - [`CssBuffer`] / [`BufferHandle`]: hardware buffer state and tagged identity
//! - [`hal`]: the traits implemented by the firmware, IOMMU and power layers
//!
//! Keeping the hardware traits here (and not in the driver crate) lets the pool
//! crate allocate through [`hal::AddressSpace`] without a dependency cycle.

pub mod buffer;
pub mod dma;
pub mod error;
pub mod format;
pub mod frame;
pub mod hal;
pub mod limits;
pub mod queue;

pub use buffer::{
    BufferHandle, BufferMemory, BufferOutcome, BufferState, CallerBuffer, CompletedBuffer,
    CssBuffer,
};
pub use dma::{DmaAddr, DmaMapping, DmaRegion, Segment};
pub use error::{ImguError, ImguResult};
pub use format::{NodeFormat, PixFormat, Rect, Rects};
pub use frame::FrameNumber;
pub use queue::{CssQueue, Direction, Node, PerNode, PerQueue, PipeMode, VfOutput};
