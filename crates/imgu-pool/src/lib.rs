//! Frame-aged slot pool.
//!
//! The parameter blocks of the IMGU pipeline are double-buffered in device
//! memory: the firmware may still read the set belonging to a frame that was
//! submitted a few frames ago while the caller is already writing the next
//! one. [`SlotPool`] keeps a small ring of slots and reissues a slot only
//! once more frames than its capacity have been issued since the slot was
//! last handed out. The hardware never has more frames in flight than the
//! pool capacity, so a reissued slot can no longer be referenced.
//!
//! # Example
//!
//! ```
//! use imgu_core::FrameNumber;
//! use imgu_pool::SlotPool;
//!
//! let mut pool = SlotPool::from_items(vec![0u32; 4]).unwrap();
//! let slot = pool.get(FrameNumber::new(1)).unwrap();
//! *pool.item_mut(slot) = 42;
//! assert_eq!(pool.peek_nth(0), Some(&42));
//! ```
//!
//! The pool does no locking of its own; the device serialises all access
//! under its state lock.

use imgu_core::hal::AddressSpace;
use imgu_core::{DmaAddr, DmaRegion, FrameNumber, ImguError, ImguResult};
use tracing::{debug, warn};

#[derive(Debug)]
struct Slot<T> {
    item: T,
    /// Frame this slot was last issued for; `None` until first use and after
    /// a rollback.
    generation: Option<FrameNumber>,
}

/// Fixed ring of reusable slots aged by frame number.
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    /// Most recently issued slot.
    last: usize,
}

impl<T> SlotPool<T> {
    /// Build a pool over `items`, one slot per item, all unused.
    ///
    /// The cursor starts on the last slot so the first [`get`](Self::get)
    /// probes slot 0.
    pub fn from_items(items: Vec<T>) -> ImguResult<Self> {
        if items.is_empty() {
            return Err(ImguError::Config(
                "slot pool needs at least one slot".into(),
            ));
        }

        let last = items.len() - 1;
        let slots = items
            .into_iter()
            .map(|item| Slot {
                item,
                generation: None,
            })
            .collect();

        Ok(Self { slots, last })
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot that the next [`get`](Self::get) for `frame` would issue.
    ///
    /// Only the oldest slot (the one after the cursor) is ever considered.
    /// Fails with [`ImguError::NoFreeSlot`] while that slot is still within
    /// the aging window.
    pub fn check(&self, frame: FrameNumber) -> ImguResult<usize> {
        let n = (self.last + 1) % self.capacity();

        match self.slots[n].generation {
            None => Ok(n),
            Some(issued) if frame.frames_since(issued) as usize > self.capacity() => Ok(n),
            Some(_) => Err(ImguError::NoFreeSlot { frame }),
        }
    }

    /// Issue the oldest slot for `frame`.
    pub fn get(&mut self, frame: FrameNumber) -> ImguResult<usize> {
        let n = self.check(frame)?;

        self.slots[n].generation = Some(frame);
        self.last = n;
        debug!(slot = n, frame = %frame, "pool slot issued");

        Ok(n)
    }

    /// Undo the most recent [`get`](Self::get).
    ///
    /// Only valid directly after a `get` whose slot ends up unused.
    pub fn put(&mut self) {
        let cap = self.capacity();

        self.slots[self.last].generation = None;
        self.last = (self.last + cap - 1) % cap;
    }

    /// Slot index `n` positions behind the cursor, if that slot is in use.
    #[must_use]
    pub fn nth_slot(&self, n: usize) -> Option<usize> {
        let cap = self.capacity();
        if n >= cap {
            debug_assert!(n < cap, "peek {n} beyond pool capacity {cap}");
            warn!(n, capacity = cap, "pool peek beyond capacity");
            return None;
        }

        let i = (self.last + cap - n) % cap;
        self.slots[i].generation.map(|_| i)
    }

    /// Item `n` positions behind the cursor; `peek_nth(0)` is the slot issued
    /// last. `None` when that slot has never been issued.
    #[must_use]
    pub fn peek_nth(&self, n: usize) -> Option<&T> {
        self.nth_slot(n).map(|i| &self.slots[i].item)
    }

    /// Item stored in `slot`.
    ///
    /// # Panics
    ///
    /// If `slot` is not below [`capacity`](Self::capacity).
    #[must_use]
    pub fn item(&self, slot: usize) -> &T {
        &self.slots[slot].item
    }

    /// Mutable access to the item in `slot`; panics like [`item`](Self::item).
    pub fn item_mut(&mut self, slot: usize) -> &mut T {
        &mut self.slots[slot].item
    }

    /// Frame the slot was last issued for.
    #[must_use]
    pub fn generation(&self, slot: usize) -> Option<FrameNumber> {
        self.slots[slot].generation
    }

    /// Forget every issue: all slots unused, cursor back before slot 0.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.generation = None;
        }
        self.last = self.capacity() - 1;
    }
}

/// Pool of device memory regions. Zero-sized pools hold no regions.
pub type RegionPool = SlotPool<Option<DmaRegion>>;

impl SlotPool<Option<DmaRegion>> {
    /// Allocate `capacity` regions of `slot_size` bytes.
    ///
    /// On failure every region allocated so far is freed again.
    pub fn alloc(
        space: &mut dyn AddressSpace,
        capacity: usize,
        slot_size: usize,
    ) -> ImguResult<Self> {
        if capacity == 0 {
            return Err(ImguError::Config(
                "slot pool needs at least one slot".into(),
            ));
        }

        let mut regions = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            if slot_size == 0 {
                regions.push(None);
                continue;
            }
            match space.alloc(slot_size) {
                Ok(region) => regions.push(Some(region)),
                Err(err) => {
                    for region in regions.into_iter().flatten() {
                        space.free(region);
                    }
                    return Err(err);
                }
            }
        }

        Self::from_items(regions)
    }

    /// Free every region and forget all issues.
    pub fn release(&mut self, space: &mut dyn AddressSpace) {
        for slot in &mut self.slots {
            if let Some(region) = slot.item.take() {
                space.free(region);
            }
        }
        self.reset();
    }

    /// Device address of the region `n` positions behind the cursor.
    #[must_use]
    pub fn daddr_nth(&self, n: usize) -> Option<DmaAddr> {
        self.peek_nth(n)
            .and_then(Option::as_ref)
            .map(DmaRegion::daddr)
    }

    /// Initialise the slot issued last with the contents of the one before
    /// it, or with zeros when there is no earlier issue.
    pub fn seed_from_previous(&mut self) {
        let current = self.last;
        let previous = if self.capacity() > 1 {
            self.nth_slot(1)
        } else {
            None
        };

        match previous {
            Some(prev) => {
                let (src, dst) = if prev < current {
                    let (head, tail) = self.slots.split_at_mut(current);
                    (&head[prev], &mut tail[0])
                } else {
                    let (head, tail) = self.slots.split_at_mut(prev);
                    (&tail[0], &mut head[current])
                };
                if let (Some(src), Some(dst)) = (&src.item, &mut dst.item) {
                    let len = src.size().min(dst.size());
                    dst.as_mut_slice()[..len].copy_from_slice(&src.as_slice()[..len]);
                }
            }
            None => {
                if let Some(region) = &mut self.slots[current].item {
                    region.as_mut_slice().fill(0);
                }
            }
        }
    }
}

/// Grow the region in `region` to at least `size` bytes.
///
/// Never shrinks. The old region is freed only after the new one has been
/// allocated, so on failure the old region is kept. Callers must ensure the
/// hardware no longer references the old region.
pub fn resize_region(
    space: &mut dyn AddressSpace,
    region: &mut Option<DmaRegion>,
    size: usize,
) -> ImguResult<()> {
    if size == 0 || region.as_ref().is_some_and(|r| r.size() >= size) {
        return Ok(());
    }

    let grown = space.alloc(size)?;
    if let Some(old) = region.replace(grown) {
        warn!(
            old_size = old.size(),
            new_size = size,
            "device buffer reallocated"
        );
        space.free(old);
    }
    Ok(())
}
