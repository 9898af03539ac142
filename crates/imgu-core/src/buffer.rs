//! Hardware buffer state machine and buffer identities.

use crate::dma::{DmaAddr, Segment};
use crate::queue::{CssQueue, Node};
use bytes::Bytes;

/// Lifecycle of a buffer as seen by the hardware queues.
///
/// `New` → `Queued` on successful submission, `Queued` → `Done` / `Failed`
/// when the firmware returns it. A filler buffer goes back to `New` when it
/// is reacquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the core, not submitted.
    New,
    /// Held by the firmware.
    Queued,
    /// Returned by the firmware successfully.
    Done,
    /// Returned by the firmware with an error.
    Failed,
}

/// A buffer as handed to the firmware: queue, device address and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssBuffer {
    queue: CssQueue,
    daddr: DmaAddr,
    state: BufferState,
}

impl CssBuffer {
    /// A fresh buffer for `queue` at `daddr`.
    #[must_use]
    pub fn new(queue: CssQueue, daddr: DmaAddr) -> Self {
        Self {
            queue,
            daddr,
            state: BufferState::New,
        }
    }

    /// Hardware queue the buffer is submitted to.
    #[must_use]
    pub fn queue(&self) -> CssQueue {
        self.queue
    }

    /// Device address handed to the firmware.
    #[must_use]
    pub fn daddr(&self) -> DmaAddr {
        self.daddr
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Whether the firmware currently holds the buffer.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.state == BufferState::Queued
    }

    /// Reinitialise for another submission at `daddr`.
    pub fn reset(&mut self, daddr: DmaAddr) {
        self.daddr = daddr;
        self.state = BufferState::New;
    }

    /// The firmware accepted the buffer.
    pub fn mark_queued(&mut self) {
        self.state = BufferState::Queued;
    }

    /// The firmware returned the buffer.
    pub fn complete(&mut self, ok: bool) {
        self.state = if ok {
            BufferState::Done
        } else {
            BufferState::Failed
        };
    }
}

/// Identity carried through the firmware and back.
///
/// Whether a returned buffer belongs to a caller or is an internal filler is
/// decided when the buffer is selected for submission and travels with it;
/// nothing is inferred from addresses on the way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferHandle {
    /// A buffer queued by the caller on `node` under `index`.
    User { node: Node, index: u32 },
    /// Slot `slot` of the filler set of `queue`.
    Filler { queue: CssQueue, slot: usize },
}

impl BufferHandle {
    /// Whether this is an internal filler rather than a caller buffer.
    #[must_use]
    pub fn is_filler(&self) -> bool {
        matches!(self, Self::Filler { .. })
    }
}

/// Memory backing a caller buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferMemory {
    /// Scatter-gather pages, mapped into the device address space on queue.
    Scatter(Vec<Segment>),
    /// CPU-written payload consumed immediately (parameter blobs).
    Bytes(Bytes),
}

impl BufferMemory {
    /// Total size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Scatter(segments) => segments.iter().map(|s| s.len).sum(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }

    /// Whether the memory holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A buffer supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerBuffer {
    /// Caller-chosen index, unique per node while the core owns the buffer.
    pub index: u32,
    /// Backing memory.
    pub memory: BufferMemory,
}

impl CallerBuffer {
    /// A buffer backed by scatter-gather pages.
    #[must_use]
    pub fn scatter(index: u32, segments: Vec<Segment>) -> Self {
        Self {
            index,
            memory: BufferMemory::Scatter(segments),
        }
    }

    /// A buffer carrying a CPU-written payload.
    #[must_use]
    pub fn bytes(index: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            memory: BufferMemory::Bytes(payload.into()),
        }
    }
}

/// Outcome reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// The buffer was processed.
    Done,
    /// The buffer was not processed; its contents are undefined.
    Error,
}

/// A caller buffer handed back by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedBuffer {
    /// Node the buffer was queued on.
    pub node: Node,
    /// Caller index given at queue time.
    pub index: u32,
    /// Whether the device processed the buffer.
    pub outcome: BufferOutcome,
    /// Per-node sequence number, starting at 1. Zero for device-bound nodes
    /// and for buffers that never reached the hardware.
    pub sequence: u32,
    /// Completion time in nanoseconds since the device was created.
    pub timestamp_ns: u64,
    /// Valid payload length in bytes.
    pub bytes_used: usize,
}

impl CompletedBuffer {
    /// A buffer returned with an error without having produced data.
    #[must_use]
    pub fn failed(node: Node, index: u32) -> Self {
        Self {
            node,
            index,
            outcome: BufferOutcome::Error,
            sequence: 0,
            timestamp_ns: 0,
            bytes_used: 0,
        }
    }
}
