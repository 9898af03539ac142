//! Parameter sets, double-buffered through one slot pool per block.
//!
//! Blob layout, little endian:
//!
//! ```text
//! u32 mask | acc payload (if bit 0) | vmem0 payload (if bit 1) | dmem0 payload (if bit 2)
//! ```
//!
//! Each payload is exactly the configured block size.

use imgu_core::hal::{AddressSpace, ParamAddrs, ParamBlock};
use imgu_core::{FrameNumber, ImguError, ImguResult, Node};
use imgu_pool::RegionPool;
use tracing::debug;

const MASK_BYTES: usize = 4;

pub(crate) struct ParamPools {
    pools: Vec<RegionPool>,
    sizes: [usize; ParamBlock::COUNT],
}

/// A validated blob: the payload slice of every flagged block.
struct ParamUpdate<'a> {
    payloads: [Option<&'a [u8]>; ParamBlock::COUNT],
}

impl ParamPools {
    /// Allocate one pool per block. On failure every pool allocated so far
    /// is released.
    pub(crate) fn alloc(
        space: &mut dyn AddressSpace,
        capacity: usize,
        sizes: [usize; ParamBlock::COUNT],
    ) -> ImguResult<Self> {
        let mut pools: Vec<RegionPool> = Vec::with_capacity(ParamBlock::COUNT);
        for size in sizes {
            match RegionPool::alloc(space, capacity, size) {
                Ok(pool) => pools.push(pool),
                Err(err) => {
                    for pool in &mut pools {
                        pool.release(space);
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self { pools, sizes })
    }

    pub(crate) fn release(&mut self, space: &mut dyn AddressSpace) {
        for pool in &mut self.pools {
            pool.release(space);
        }
    }

    /// Apply `blob` as the parameter set for `frame`.
    ///
    /// Every pool issues a slot seeded with the previous set; flagged blocks
    /// are then overwritten. When any pool has no free slot the pools that
    /// already advanced are rolled back and nothing changes.
    pub(crate) fn apply(&mut self, frame: FrameNumber, blob: &[u8]) -> ImguResult<()> {
        let update = self.parse(blob)?;

        for i in 0..self.pools.len() {
            if let Err(err) = self.pools[i].get(frame) {
                for advanced in &mut self.pools[..i] {
                    advanced.put();
                }
                debug!(frame = %frame, block = ParamBlock::ALL[i].name(), "parameter pool busy");
                return Err(err);
            }
        }

        for (pool, payload) in self.pools.iter_mut().zip(update.payloads) {
            pool.seed_from_previous();
            if let (Some(payload), Some(slot)) = (payload, pool.nth_slot(0)) {
                if let Some(region) = pool.item_mut(slot) {
                    region.as_mut_slice()[..payload.len()].copy_from_slice(payload);
                }
            }
        }
        debug!(frame = %frame, "parameters applied");
        Ok(())
    }

    /// Device addresses of the most recent parameter set.
    pub(crate) fn current_addrs(&self) -> ParamAddrs {
        let mut addrs = [None; ParamBlock::COUNT];
        for (addr, pool) in addrs.iter_mut().zip(&self.pools) {
            *addr = pool.daddr_nth(0);
        }
        addrs
    }

    /// Current contents of `block`, if a set was ever applied.
    pub(crate) fn current_block(&self, block: ParamBlock) -> Option<&[u8]> {
        self.pools[block.index()]
            .peek_nth(0)
            .and_then(Option::as_ref)
            .map(|region| region.as_slice())
    }

    fn parse<'a>(&self, blob: &'a [u8]) -> ImguResult<ParamUpdate<'a>> {
        let invalid = |reason: String| ImguError::InvalidBuffer {
            node: Node::Params,
            reason,
        };

        let (mask, mut rest) = match blob.split_first_chunk::<MASK_BYTES>() {
            Some((mask, rest)) => (u32::from_le_bytes(*mask), rest),
            None => return Err(invalid(format!("blob of {} bytes has no mask", blob.len()))),
        };

        let known = ParamBlock::ALL.iter().fold(0, |acc, block| acc | block.flag());
        if mask & !known != 0 {
            return Err(invalid(format!("unknown parameter flags {mask:#x}")));
        }

        let mut payloads = [None; ParamBlock::COUNT];
        for block in ParamBlock::ALL {
            if mask & block.flag() == 0 {
                continue;
            }
            let size = self.sizes[block.index()];
            if rest.len() < size {
                return Err(invalid(format!(
                    "{} block truncated: {} of {size} bytes",
                    block.name(),
                    rest.len()
                )));
            }
            let (payload, tail) = rest.split_at(size);
            payloads[block.index()] = Some(payload);
            rest = tail;
        }

        if !rest.is_empty() {
            return Err(invalid(format!("{} trailing bytes", rest.len())));
        }
        Ok(ParamUpdate { payloads })
    }
}
