//! Traits implemented by the layers below the streaming core.
//!
//! The core drives these collaborators:
//!
//! - [`Css`]: the imaging firmware with its six bounded hardware queues
//! - [`IrqStatus`]: the firmware's interrupt status register
//! - [`Power`]: device power sequencing
//! - [`AddressSpace`]: the IOMMU that device buffers are allocated in and
//!   caller memory is mapped into
//!
//! All of them are `Send` so the device can be shared between the caller's
//! thread and the interrupt thread.

use crate::buffer::BufferHandle;
use crate::dma::{DmaAddr, DmaMapping, DmaRegion, Segment};
use crate::error::ImguResult;
use crate::format::{PixFormat, Rects};
use crate::queue::{CssQueue, PerQueue, VfOutput};

/// Parameter blocks carried alongside every input submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamBlock {
    /// Accelerator cluster parameters.
    Acc,
    /// Vector memory parameters.
    Vmem0,
    /// Data memory parameters.
    Dmem0,
}

impl ParamBlock {
    /// Number of parameter blocks.
    pub const COUNT: usize = 3;

    /// All blocks in header bit order.
    pub const ALL: [ParamBlock; Self::COUNT] =
        [ParamBlock::Acc, ParamBlock::Vmem0, ParamBlock::Dmem0];

    /// Position in [`ParamBlock::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit announcing this block in the parameter blob header.
    #[must_use]
    pub const fn flag(self) -> u32 {
        1 << (self as u32)
    }

    /// Lowercase block name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ParamBlock::Acc => "acc",
            ParamBlock::Vmem0 => "vmem0",
            ParamBlock::Dmem0 => "dmem0",
        }
    }
}

/// Device addresses of the current parameter set, one per block.
///
/// `None` means the block's slot has never been written.
pub type ParamAddrs = [Option<DmaAddr>; ParamBlock::COUNT];

/// One buffer handed to the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssRequest {
    /// Identity returned with the completion.
    pub handle: BufferHandle,
    /// Target hardware queue.
    pub queue: CssQueue,
    /// Device address of the buffer.
    pub daddr: DmaAddr,
    /// Parameter set accompanying an input buffer.
    pub params: Option<ParamAddrs>,
}

/// One buffer returned by the firmware.
///
/// `queue_id` is the raw id reported by the firmware and is validated by the
/// core before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssCompletion {
    /// Identity given at submission.
    pub handle: BufferHandle,
    /// Raw queue id.
    pub queue_id: u32,
    /// Whether the firmware processed the buffer.
    pub ok: bool,
}

/// Result of one dequeue attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    /// A returned buffer.
    Buffer(CssCompletion),
    /// Transient condition; try again immediately.
    Retry,
    /// Nothing left to dequeue.
    Empty,
    /// The firmware stopped while dequeuing.
    NotStreaming,
    /// Dequeuing failed; nothing more can be taken for now.
    Failed(crate::error::ImguError),
}

/// Whether the interrupt handler wants the threaded half to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not ours.
    None,
    /// Run the threaded half.
    WakeThread,
}

/// The imaging firmware.
pub trait Css: Send {
    /// Configure the pipe for the given per-queue formats.
    fn set_formats(
        &mut self,
        formats: &PerQueue<Option<PixFormat>>,
        rects: &Rects,
        vf_output: VfOutput,
    ) -> ImguResult<()>;

    fn start_streaming(&mut self) -> ImguResult<()>;

    fn stop_streaming(&mut self);

    fn is_streaming(&self) -> bool;

    /// Submit a buffer. Fails with [`crate::ImguError::Busy`] when the
    /// target queue already holds its maximum depth.
    fn queue_buffer(&mut self, request: &CssRequest) -> ImguResult<()>;

    fn dequeue_buffer(&mut self) -> Dequeued;

    /// Whether every buffer submitted so far has been returned.
    fn queue_empty(&self) -> bool;
}

/// Interrupt status of the imaging firmware.
///
/// Kept apart from [`Css`] so the hard interrupt half can acknowledge
/// without waiting for the device state.
pub trait IrqStatus: Send {
    /// Acknowledge the interrupt. Returns `true` when it belonged to the device.
    fn irq_ack(&mut self) -> bool;
}

/// Device power sequencing.
pub trait Power: Send {
    fn power_up(&mut self) -> ImguResult<()>;

    fn power_down(&mut self);
}

/// The device IOMMU.
pub trait AddressSpace: Send {
    /// Allocate `size` zeroed bytes visible to the device.
    fn alloc(&mut self, size: usize) -> ImguResult<DmaRegion>;

    fn free(&mut self, region: DmaRegion);

    /// Map caller memory into the device address space.
    fn map_sg(&mut self, segments: &[Segment]) -> ImguResult<DmaMapping>;

    fn unmap(&mut self, mapping: DmaMapping);

    /// Save translation state before power down.
    fn suspend(&mut self) {}

    /// Restore translation state after power up.
    fn resume(&mut self) {}
}
