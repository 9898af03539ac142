//! Property tests for slot aging.
//!
//! Run with: `cargo test --package imgu-pool --test pool_properties`

use imgu_core::{FrameNumber, ImguError};
use imgu_pool::SlotPool;
use proptest::prelude::*;

/// One step of a pool workload.
#[derive(Debug, Clone)]
enum Op {
    /// Advance the frame counter by `step` and request a slot; when
    /// `rollback` is set a successful issue is immediately undone.
    Get { step: u32, rollback: bool },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (0u32..3, prop::bool::weighted(0.2)).prop_map(|(step, rollback)| Op::Get { step, rollback })
}

proptest! {
    /// No slot is issued while it is younger than the pool capacity,
    /// wherever the frame counter starts (including just before the wrap).
    #[test]
    fn slot_never_reissued_inside_window(
        capacity in 1usize..8,
        start in prop_oneof![Just(u32::MAX - 16), any::<u32>()],
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let mut pool = SlotPool::from_items(vec![(); capacity]).unwrap();
        let mut issued: Vec<Option<FrameNumber>> = vec![None; capacity];
        let mut frame = FrameNumber::new(start);

        for op in ops {
            let Op::Get { step, rollback } = op;
            for _ in 0..step {
                frame = frame.next();
            }

            match pool.get(frame) {
                Ok(slot) => {
                    if let Some(previous) = issued[slot] {
                        prop_assert!(frame.frames_since(previous) as usize > capacity);
                    }
                    if rollback {
                        pool.put();
                        issued[slot] = None;
                    } else {
                        issued[slot] = Some(frame);
                    }
                }
                Err(err) => prop_assert_eq!(err, ImguError::NoFreeSlot { frame }),
            }
        }
    }

    /// With one issue per frame the pool never reports busy once the
    /// window is wider than the capacity.
    #[test]
    fn steady_stream_every_other_frame_never_busy(
        capacity in 1usize..8,
        start in any::<u32>(),
        frames in 1usize..100,
    ) {
        let mut pool = SlotPool::from_items(vec![(); capacity]).unwrap();
        let mut frame = FrameNumber::new(start);

        for _ in 0..frames {
            prop_assert!(pool.get(frame).is_ok());
            frame = frame.next().next();
        }
    }
}
