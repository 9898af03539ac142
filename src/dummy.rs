//! Filler buffers that keep mandatory hardware queues fed.
//!
//! Every non-input queue gets `depth` fillers at stream start. All fillers of
//! a queue point at one shared device region: the firmware writes into it but
//! nobody ever reads the result.

use imgu_core::hal::AddressSpace;
use imgu_core::{BufferHandle, CssBuffer, CssQueue, DmaAddr, DmaRegion, ImguResult, PerQueue};
use imgu_pool::resize_region;
use tracing::debug;

pub(crate) struct DummyBuffers {
    regions: PerQueue<Option<DmaRegion>>,
    fillers: PerQueue<Vec<CssBuffer>>,
    depth: usize,
}

impl DummyBuffers {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            regions: PerQueue::default(),
            fillers: PerQueue::default(),
            depth,
        }
    }

    /// Allocate the shared region of every queue up front.
    ///
    /// The master queue and zero sizes are skipped. On failure everything
    /// allocated so far is freed.
    pub(crate) fn preallocate(
        &mut self,
        space: &mut dyn AddressSpace,
        sizes: &PerQueue<usize>,
    ) -> ImguResult<()> {
        for (queue, &size) in sizes.iter() {
            if queue == CssQueue::MASTER || size == 0 {
                continue;
            }
            if let Err(err) = self.resize(space, queue, size) {
                self.cleanup(space);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Grow the shared region of `queue` to `size` bytes. Never shrinks.
    pub(crate) fn resize(
        &mut self,
        space: &mut dyn AddressSpace,
        queue: CssQueue,
        size: usize,
    ) -> ImguResult<()> {
        resize_region(space, &mut self.regions[queue], size)
    }

    /// Size the region for `size`-byte buffers and create the fillers.
    pub(crate) fn init(
        &mut self,
        space: &mut dyn AddressSpace,
        queue: CssQueue,
        size: usize,
    ) -> ImguResult<()> {
        self.resize(space, queue, size)?;

        let daddr = self.daddr(queue);
        self.fillers[queue] = (0..self.depth)
            .map(|_| CssBuffer::new(queue, daddr))
            .collect();
        debug!(queue = %queue, size, daddr = %daddr, "filler buffers ready");
        Ok(())
    }

    /// Drop the fillers of every queue, keeping the regions.
    pub(crate) fn disable_all(&mut self) {
        for (_, fillers) in self.fillers.iter_mut() {
            fillers.clear();
        }
    }

    /// Take the first filler of `queue` the hardware does not own.
    ///
    /// Returns `None` when the queue has no fillers or all of them are
    /// queued.
    pub(crate) fn acquire(&mut self, queue: CssQueue) -> Option<BufferHandle> {
        let daddr = self.daddr(queue);
        let (slot, filler) = self.fillers[queue]
            .iter_mut()
            .enumerate()
            .find(|(_, filler)| !filler.is_queued())?;

        filler.reset(daddr);
        Some(BufferHandle::Filler { queue, slot })
    }

    pub(crate) fn filler_mut(&mut self, queue: CssQueue, slot: usize) -> Option<&mut CssBuffer> {
        self.fillers[queue].get_mut(slot)
    }

    /// Whether `handle` names one of the fillers.
    pub(crate) fn owns(&self, handle: &BufferHandle) -> bool {
        match *handle {
            BufferHandle::Filler { queue, slot } => slot < self.fillers[queue].len(),
            BufferHandle::User { .. } => false,
        }
    }

    /// Forget hardware ownership after the firmware was stopped.
    pub(crate) fn reset_states(&mut self) {
        for (queue, fillers) in self.fillers.iter_mut() {
            let daddr = self.regions[queue]
                .as_ref()
                .map(DmaRegion::daddr)
                .unwrap_or_default();
            for filler in fillers {
                filler.reset(daddr);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn region_size(&self, queue: CssQueue) -> Option<usize> {
        self.regions[queue].as_ref().map(DmaRegion::size)
    }

    /// Free every region and drop all fillers.
    pub(crate) fn cleanup(&mut self, space: &mut dyn AddressSpace) {
        self.disable_all();
        for (_, region) in self.regions.iter_mut() {
            if let Some(region) = region.take() {
                space.free(region);
            }
        }
    }

    fn daddr(&self, queue: CssQueue) -> DmaAddr {
        self.regions[queue]
            .as_ref()
            .map(DmaRegion::daddr)
            .unwrap_or_default()
    }
}
