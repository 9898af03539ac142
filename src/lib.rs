//! Buffer management and streaming core for the IPU3 imaging unit (IMGU).
//!
//! The core sits between callers queueing frame buffers on named nodes and
//! the imaging firmware's hardware queues:
//!
//! - Caller buffers are mapped and submitted one frame set at a time, each
//!   set gated by an input buffer. Mandatory queues without a caller buffer
//!   are fed filler buffers that are never handed back.
//! - Parameter sets are double-buffered per block through frame-aged slot
//!   pools ([`imgu_pool`]).
//! - The interrupt handlers reconcile completions with their owners and hand
//!   caller buffers back in FIFO order per node.
//! - [`Imgu::stream_on`], [`Imgu::stream_off`], [`Imgu::suspend`] and
//!   [`Imgu::resume`] drive the hardware lifecycle.
//!
//! The firmware, power and address-space layers are traits in
//! [`imgu_core::hal`]; the `mock` feature provides [`MockHardware`].

pub mod config;
mod device;
mod dispatch;
mod dummy;
mod irq;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod params;
mod stream;

pub use config::{ConfigError, ImguConfig};
pub use device::{Hardware, Imgu};
pub use imgu_core;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockHardware;
pub use stream::StreamPhase;
