//! Caller-visible nodes and the hardware queues behind them.
//!
//! Seven nodes map onto six hardware queues through a fixed table; the
//! viewfinder and postview nodes share the `vf` queue, and which of the two
//! receives its completions depends on whether the viewfinder node is enabled.

use crate::error::ImguError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Hardware queue identities understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CssQueue {
    /// Raw input frames.
    In,
    /// Parameter sets.
    Params,
    /// Main output.
    Out,
    /// Secondary output shared by viewfinder and postview.
    Vf,
    /// 3A statistics.
    Stat3a,
    /// Video stabilisation statistics.
    StatDvs,
}

impl CssQueue {
    /// Number of hardware queues.
    pub const COUNT: usize = 6;

    /// All queues in firmware id order.
    pub const ALL: [CssQueue; Self::COUNT] = [
        CssQueue::In,
        CssQueue::Params,
        CssQueue::Out,
        CssQueue::Vf,
        CssQueue::Stat3a,
        CssQueue::StatDvs,
    ];

    /// The queue that must always be fed with caller buffers.
    pub const MASTER: CssQueue = CssQueue::In;

    /// Position in firmware id order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable queue name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CssQueue::In => "input",
            CssQueue::Params => "parameters",
            CssQueue::Out => "output",
            CssQueue::Vf => "viewfinder",
            CssQueue::Stat3a => "3a stat",
            CssQueue::StatDvs => "dvs stat",
        }
    }
}

impl TryFrom<u32> for CssQueue {
    type Error = ImguError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        usize::try_from(id)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(ImguError::InvalidQueue(id))
    }
}

impl fmt::Display for CssQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which way data flows through a node, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The caller fills the buffer and the device reads it.
    ToDevice,
    /// The device fills the buffer and the caller reads it.
    FromDevice,
}

/// Caller-visible nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    /// Raw input frames.
    In,
    /// Parameter blobs, applied on queue.
    Params,
    /// Main output.
    Out,
    /// Viewfinder output in video mode.
    Vf,
    /// Postview output in capture mode.
    Pv,
    /// 3A statistics.
    Stat3a,
    /// Video stabilisation statistics.
    StatDvs,
}

impl Node {
    /// Number of caller-visible nodes.
    pub const COUNT: usize = 7;

    /// All nodes in dispatch order.
    pub const ALL: [Node; Self::COUNT] = [
        Node::In,
        Node::Params,
        Node::Out,
        Node::Vf,
        Node::Pv,
        Node::Stat3a,
        Node::StatDvs,
    ];

    /// Position in dispatch order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable node name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Node::In => "input",
            Node::Params => "parameters",
            Node::Out => "output",
            Node::Vf => "viewfinder",
            Node::Pv => "postview",
            Node::Stat3a => "3a stat",
            Node::StatDvs => "dvs stat",
        }
    }

    /// Hardware queue this node submits to.
    #[must_use]
    pub const fn css_queue(self) -> CssQueue {
        match self {
            Node::In => CssQueue::In,
            Node::Params => CssQueue::Params,
            Node::Out => CssQueue::Out,
            Node::Vf | Node::Pv => CssQueue::Vf,
            Node::Stat3a => CssQueue::Stat3a,
            Node::StatDvs => CssQueue::StatDvs,
        }
    }

    /// Whether the device reads or fills buffers of this node.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Node::In | Node::Params => Direction::ToDevice,
            _ => Direction::FromDevice,
        }
    }

    /// Metadata nodes size their buffers by a declared byte count rather than
    /// an image format.
    #[must_use]
    pub const fn is_meta(self) -> bool {
        matches!(self, Node::Params | Node::Stat3a | Node::StatDvs)
    }

    /// Next node in the cyclic dispatch order.
    #[must_use]
    pub fn next(self) -> Node {
        Self::ALL[(self.index() + 1) % Self::COUNT]
    }

    /// Node that receives completions of `queue`.
    ///
    /// The shared `vf` queue belongs to the viewfinder node when it is
    /// enabled and to the postview node otherwise.
    #[must_use]
    pub fn for_queue(queue: CssQueue, vf_enabled: bool) -> Node {
        match queue {
            CssQueue::In => Node::In,
            CssQueue::Params => Node::Params,
            CssQueue::Out => Node::Out,
            CssQueue::Vf if vf_enabled => Node::Vf,
            CssQueue::Vf => Node::Pv,
            CssQueue::Stat3a => Node::Stat3a,
            CssQueue::StatDvs => Node::StatDvs,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Processing pipeline mode.
///
/// Video pipes produce the viewfinder stream; capture pipes produce postview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeMode {
    /// Continuous streaming with a viewfinder.
    #[default]
    Video,
    /// Still capture with a postview.
    Capture,
}

/// Which node the firmware should produce the secondary output for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfOutput {
    /// No secondary output.
    Disabled,
    /// Secondary output goes to the viewfinder node.
    Viewfinder,
    /// Secondary output goes to the postview node.
    Postview,
}

macro_rules! per_key_table {
    ($(#[$meta:meta])* $name:ident, $key:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name<T>([T; <$key>::COUNT]);

        impl<T> $name<T> {
            /// Build a table by evaluating `f` for every key.
            pub fn from_fn(mut f: impl FnMut($key) -> T) -> Self {
                Self(std::array::from_fn(|i| f(<$key>::ALL[i])))
            }

            /// Iterate over `(key, value)` pairs in key order.
            pub fn iter(&self) -> impl Iterator<Item = ($key, &T)> {
                <$key>::ALL.into_iter().zip(self.0.iter())
            }

            /// Iterate mutably over `(key, value)` pairs in key order.
            pub fn iter_mut(&mut self) -> impl Iterator<Item = ($key, &mut T)> {
                <$key>::ALL.into_iter().zip(self.0.iter_mut())
            }
        }

        impl<T: Default> Default for $name<T> {
            fn default() -> Self {
                Self::from_fn(|_| T::default())
            }
        }

        impl<T> Index<$key> for $name<T> {
            type Output = T;

            fn index(&self, key: $key) -> &T {
                &self.0[key.index()]
            }
        }

        impl<T> IndexMut<$key> for $name<T> {
            fn index_mut(&mut self, key: $key) -> &mut T {
                &mut self.0[key.index()]
            }
        }
    };
}

per_key_table!(
    /// Fixed table with one entry per caller node.
    PerNode,
    Node
);

per_key_table!(
    /// Fixed table with one entry per hardware queue.
    PerQueue,
    CssQueue
);
