//! Device-visible memory.

use bytes::BytesMut;
use std::fmt;

/// Address in the device (IOMMU) address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct DmaAddr(pub u32);

impl fmt::Display for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One physically contiguous piece of a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Physical start address.
    pub phys: u64,
    /// Length in bytes.
    pub len: usize,
}

/// Memory allocated by the core: a device address plus its CPU view.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaRegion {
    daddr: DmaAddr,
    data: BytesMut,
}

impl DmaRegion {
    /// Wrap a zero-filled CPU buffer mapped at `daddr`.
    #[must_use]
    pub fn new(daddr: DmaAddr, size: usize) -> Self {
        Self {
            daddr,
            data: BytesMut::zeroed(size),
        }
    }

    /// Device address of the first byte.
    #[must_use]
    pub fn daddr(&self) -> DmaAddr {
        self.daddr
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// CPU view of the region.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Writable CPU view of the region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Caller memory mapped into the device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMapping {
    /// Device address of the first byte.
    pub daddr: DmaAddr,
    /// Mapped length in bytes.
    pub size: usize,
}
