//! The IMGU device: shared state and the caller-facing buffer API.
//!
//! Locks, always taken in this order:
//!
//! 1. `lifecycle`: serialises stream on/off and suspend/resume
//! 2. `qbuf_lock`: the submission gate; held by stop and suspend so the
//!    completion path cannot feed the hardware while it is torn down
//! 3. `irq_lock`: held for the whole threaded interrupt handler, taken and
//!    released by `synchronize_irq`
//! 4. `state`: all buffer, queue and pool state
//!
//! The completion path only ever try-locks the gate. `irq_status` is a leaf
//! taken alone by the hard interrupt half.

use crate::config::ImguConfig;
use crate::dummy::DummyBuffers;
use crate::params::ParamPools;
use crate::stream::{Lifecycle, StreamPhase};
use crossbeam_queue::SegQueue;
use imgu_core::hal::{AddressSpace, Css, IrqStatus, ParamAddrs, ParamBlock, Power};
use imgu_core::{
    BufferMemory, BufferOutcome, BufferState, CallerBuffer, CompletedBuffer, CssBuffer,
    DmaMapping, FrameNumber, ImguError, ImguResult, Node, NodeFormat, PerNode, PipeMode,
    PixFormat, Rects,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// The layers below the core, owned by the device.
pub struct Hardware {
    /// Imaging firmware and its hardware queues
    pub css: Box<dyn Css>,
    /// Interrupt status, acknowledged by [`Imgu::handle_irq`]
    pub irq: Box<dyn IrqStatus>,
    /// Power sequencing
    pub power: Box<dyn Power>,
    /// Device address space (IOMMU)
    pub space: Box<dyn AddressSpace>,
}

/// The hardware layers guarded by the state lock.
pub(crate) struct Backend {
    pub(crate) css: Box<dyn Css>,
    pub(crate) power: Box<dyn Power>,
    pub(crate) space: Box<dyn AddressSpace>,
}

/// A caller buffer owned by the core.
pub(crate) struct UserBuffer {
    pub(crate) index: u32,
    pub(crate) css: CssBuffer,
    pub(crate) mapping: DmaMapping,
}

pub(crate) struct NodeState {
    pub(crate) enabled: bool,
    pub(crate) format: NodeFormat,
    /// Caller buffers in arrival order.
    pub(crate) buffers: VecDeque<UserBuffer>,
    /// Last sequence number handed out.
    pub(crate) sequence: u32,
}

impl NodeState {
    fn new(node: Node) -> Self {
        Self {
            enabled: always_enabled(node),
            format: default_format(node),
            buffers: VecDeque::new(),
            sequence: 0,
        }
    }
}

pub(crate) struct ImguState {
    pub(crate) hw: Backend,
    pub(crate) nodes: PerNode<NodeState>,
    /// Nodes taking part in dispatch, fixed at stream on.
    pub(crate) queue_enabled: PerNode<bool>,
    pub(crate) dummies: DummyBuffers,
    pub(crate) params: ParamPools,
    /// Frame number of the next input submission.
    pub(crate) frame: FrameNumber,
    pub(crate) pipe_mode: PipeMode,
    pub(crate) rects: Rects,
}

#[derive(Default)]
struct DoneQueue {
    items: SegQueue<CompletedBuffer>,
    notify: Notify,
}

/// IMGU streaming core
///
/// # Example
///
/// ```
/// use imgu::{Imgu, ImguConfig, MockHardware};
/// use imgu::imgu_core::{CallerBuffer, Node, Segment};
///
/// let mock = MockHardware::new();
/// let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
///
/// let len = imgu.buffer_size(Node::In);
/// let segments = vec![Segment { phys: 0x8000_0000, len }];
/// imgu.queue_buffer(Node::In, CallerBuffer::scatter(0, segments)).unwrap();
/// imgu.stream_on().unwrap();
///
/// // One input frame plus fillers for output and both statistics queues.
/// assert_eq!(mock.submissions().len(), 4);
/// ```
pub struct Imgu {
    config: ImguConfig,
    pub(crate) state: Mutex<ImguState>,
    pub(crate) irq_status: Mutex<Box<dyn IrqStatus>>,
    pub(crate) qbuf_lock: Mutex<()>,
    pub(crate) irq_lock: Mutex<()>,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) buf_drain: Condvar,
    done: PerNode<DoneQueue>,
    clock: Instant,
}

fn always_enabled(node: Node) -> bool {
    matches!(node, Node::In | Node::Out)
}

const fn nv12(width: u32, height: u32) -> NodeFormat {
    NodeFormat::Pixel(PixFormat {
        width,
        height,
        bytes_per_line: width,
        size_image: width as usize * height as usize * 3 / 2,
    })
}

fn default_format(node: Node) -> NodeFormat {
    match node {
        Node::In | Node::Out => nv12(1920, 1080),
        Node::Vf | Node::Pv => nv12(1280, 720),
        Node::Params => NodeFormat::Meta { buffer_size: 0 },
        Node::Stat3a => NodeFormat::Meta {
            buffer_size: 125_664,
        },
        Node::StatDvs => NodeFormat::Meta {
            buffer_size: 10_336,
        },
    }
}

impl Imgu {
    /// Create the device: allocate the parameter pools and preallocate the
    /// filler regions. Nothing is left allocated on failure.
    pub fn new(config: ImguConfig, hw: Hardware) -> ImguResult<Self> {
        config
            .validate()
            .map_err(|err| ImguError::Config(err.to_string()))?;

        let Hardware {
            css,
            irq,
            power,
            mut space,
        } = hw;

        let mut params = ParamPools::alloc(
            space.as_mut(),
            config.pool.capacity,
            config.pool.block_sizes(),
        )?;

        let mut dummies = DummyBuffers::new(config.queues.max_depth);
        if let Err(err) =
            dummies.preallocate(space.as_mut(), &config.queues.dummy_sizes.to_table())
        {
            params.release(space.as_mut());
            return Err(err);
        }

        info!(
            pool_capacity = config.pool.capacity,
            queue_depth = config.queues.max_depth,
            pipe_mode = ?config.stream.pipe_mode,
            "imgu device ready"
        );

        let state = ImguState {
            hw: Backend { css, power, space },
            nodes: PerNode::from_fn(NodeState::new),
            queue_enabled: PerNode::default(),
            dummies,
            params,
            frame: FrameNumber::default(),
            pipe_mode: config.stream.pipe_mode,
            rects: Rects::default(),
        };

        Ok(Self {
            config,
            state: Mutex::new(state),
            irq_status: Mutex::new(irq),
            qbuf_lock: Mutex::new(()),
            irq_lock: Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle::default()),
            buf_drain: Condvar::new(),
            done: PerNode::default(),
            clock: Instant::now(),
        })
    }

    /// Configuration the device was created with.
    #[must_use]
    pub fn config(&self) -> &ImguConfig {
        &self.config
    }

    /// Hand a buffer to the core.
    ///
    /// Parameter buffers are applied at once and returned immediately. Other
    /// buffers are mapped and queued; while streaming they are submitted as
    /// soon as the hardware has room.
    pub fn queue_buffer(&self, node: Node, buffer: CallerBuffer) -> ImguResult<()> {
        {
            let mut state = self.state.lock();
            if !state.nodes[node].enabled {
                return Err(ImguError::InvalidNode {
                    node,
                    reason: "node is disabled",
                });
            }

            if node == Node::Params {
                let BufferMemory::Bytes(blob) = &buffer.memory else {
                    return Err(ImguError::InvalidBuffer {
                        node,
                        reason: "parameters must be a byte blob".into(),
                    });
                };
                let frame = state.frame;
                let outcome = match state.params.apply(frame, blob) {
                    Ok(()) => BufferOutcome::Done,
                    Err(err) => {
                        warn!(index = buffer.index, frame = %frame, error = %err, "parameters rejected");
                        BufferOutcome::Error
                    }
                };
                drop(state);

                self.deliver(CompletedBuffer {
                    node,
                    index: buffer.index,
                    outcome,
                    sequence: 0,
                    timestamp_ns: self.now_ns(),
                    bytes_used: 0,
                });
                return Ok(());
            }

            state.add_user_buffer(node, buffer)?;
        }

        let _gate = self.qbuf_lock.lock();
        if let Err(err) = self.queue_buffers(crate::dispatch::QueueMode::Incremental) {
            debug!(node = %node, error = %err, "submission after queue failed");
        }
        Ok(())
    }

    /// Take the oldest buffer handed back on `node`, if any.
    pub fn dequeue_completed(&self, node: Node) -> Option<CompletedBuffer> {
        self.done[node].items.pop()
    }

    /// Wait for the next buffer handed back on `node`.
    ///
    /// Supports one waiter per node.
    pub async fn next_completed(&self, node: Node) -> CompletedBuffer {
        loop {
            if let Some(buffer) = self.done[node].items.pop() {
                return buffer;
            }
            self.done[node].notify.notified().await;
        }
    }

    /// Enable or disable a node. Only while stopped.
    pub fn set_node_enabled(&self, node: Node, enabled: bool) -> ImguResult<()> {
        let lifecycle = self.lifecycle.lock();
        lifecycle.require_stopped("change node state")?;

        let mut state = self.state.lock();
        if !enabled && always_enabled(node) {
            return Err(ImguError::InvalidNode {
                node,
                reason: "node is always enabled",
            });
        }
        if !enabled && !state.nodes[node].buffers.is_empty() {
            return Err(ImguError::InvalidNode {
                node,
                reason: "node still owns buffers",
            });
        }
        state.nodes[node].enabled = enabled;
        debug!(node = %node, enabled, "node state changed");
        Ok(())
    }

    /// Set the format a node's buffers are sized by. Only while stopped.
    pub fn set_format(&self, node: Node, format: NodeFormat) -> ImguResult<()> {
        let lifecycle = self.lifecycle.lock();
        lifecycle.require_stopped("set format")?;

        if node.is_meta() != matches!(format, NodeFormat::Meta { .. }) {
            return Err(ImguError::InvalidNode {
                node,
                reason: "format kind does not match node",
            });
        }
        self.state.lock().nodes[node].format = format;
        Ok(())
    }

    /// Set the processing rectangles pushed at stream on. Only while stopped.
    pub fn set_rects(&self, rects: Rects) -> ImguResult<()> {
        let lifecycle = self.lifecycle.lock();
        lifecycle.require_stopped("set rectangles")?;

        self.state.lock().rects = rects;
        Ok(())
    }

    /// Select video or capture pipe. Only while stopped.
    pub fn set_pipe_mode(&self, mode: PipeMode) -> ImguResult<()> {
        let lifecycle = self.lifecycle.lock();
        lifecycle.require_stopped("set pipe mode")?;

        self.state.lock().pipe_mode = mode;
        Ok(())
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> StreamPhase {
        self.lifecycle.lock().phase
    }

    /// Whether the firmware is running.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.lock().hw.css.is_streaming()
    }

    /// State of the caller buffer `index` on `node`, while the core owns it.
    #[must_use]
    pub fn buffer_state(&self, node: Node, index: u32) -> Option<BufferState> {
        self.state.lock().nodes[node]
            .buffers
            .iter()
            .find(|b| b.index == index)
            .map(|b| b.css.state())
    }

    /// Caller buffers of `node` currently owned by the core.
    #[must_use]
    pub fn pending_buffers(&self, node: Node) -> usize {
        self.state.lock().nodes[node].buffers.len()
    }

    /// Bytes a buffer on `node` must hold.
    #[must_use]
    pub fn buffer_size(&self, node: Node) -> usize {
        self.state.lock().nodes[node].format.buffer_size()
    }

    /// Whether `node` takes part in streaming.
    #[must_use]
    pub fn node_enabled(&self, node: Node) -> bool {
        self.state.lock().nodes[node].enabled
    }

    /// Frame number the next input submission will carry.
    #[must_use]
    pub fn frame(&self) -> FrameNumber {
        self.state.lock().frame
    }

    /// Device addresses of the current parameter set.
    #[must_use]
    pub fn param_addrs(&self) -> ParamAddrs {
        self.state.lock().params.current_addrs()
    }

    /// Contents of `block` in the current parameter set.
    #[must_use]
    pub fn param_block(&self, block: ParamBlock) -> Option<Vec<u8>> {
        self.state.lock().params.current_block(block).map(<[u8]>::to_vec)
    }

    pub(crate) fn deliver(&self, buffer: CompletedBuffer) {
        debug!(
            node = %buffer.node,
            index = buffer.index,
            outcome = ?buffer.outcome,
            sequence = buffer.sequence,
            "buffer handed back"
        );
        let done = &self.done[buffer.node];
        done.items.push(buffer);
        done.notify.notify_one();
    }

    pub(crate) fn deliver_all(&self, buffers: Vec<CompletedBuffer>) {
        for buffer in buffers {
            self.deliver(buffer);
        }
    }

    pub(crate) fn now_ns(&self) -> u64 {
        u64::try_from(self.clock.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Drop for Imgu {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.hw.css.is_streaming() {
            state.hw.css.stop_streaming();
            state.power_down();
        }
        state.return_all();
        state.dummies.cleanup(state.hw.space.as_mut());
        state.params.release(state.hw.space.as_mut());
    }
}

impl ImguState {
    fn add_user_buffer(&mut self, node: Node, buffer: CallerBuffer) -> ImguResult<()> {
        let BufferMemory::Scatter(segments) = &buffer.memory else {
            return Err(ImguError::InvalidBuffer {
                node,
                reason: "scatter-gather memory required".into(),
            });
        };

        let needed = self.nodes[node].format.buffer_size();
        let len = buffer.memory.len();
        if len < needed {
            return Err(ImguError::InvalidBuffer {
                node,
                reason: format!("{len} bytes, format needs {needed}"),
            });
        }
        if self.nodes[node]
            .buffers
            .iter()
            .any(|b| b.index == buffer.index)
        {
            return Err(ImguError::InvalidBuffer {
                node,
                reason: format!("index {} already queued", buffer.index),
            });
        }

        let mapping = self.hw.space.map_sg(segments)?;
        self.nodes[node].buffers.push_back(UserBuffer {
            index: buffer.index,
            css: CssBuffer::new(node.css_queue(), mapping.daddr),
            mapping,
        });
        debug!(node = %node, index = buffer.index, daddr = %mapping.daddr, "buffer queued by caller");
        Ok(())
    }

    /// Remove the buffers of `node` matching `take`, unmapped and marked
    /// failed.
    pub(crate) fn take_buffers(
        &mut self,
        node: Node,
        mut take: impl FnMut(&UserBuffer) -> bool,
    ) -> Vec<CompletedBuffer> {
        let space = self.hw.space.as_mut();
        let buffers = &mut self.nodes[node].buffers;
        let mut kept = VecDeque::with_capacity(buffers.len());
        let mut failed = Vec::new();

        for buffer in buffers.drain(..) {
            if take(&buffer) {
                space.unmap(buffer.mapping);
                failed.push(CompletedBuffer::failed(node, buffer.index));
            } else {
                kept.push_back(buffer);
            }
        }
        *buffers = kept;
        failed
    }

    /// Every caller buffer the hardware does not hold, on every node taking
    /// part in dispatch.
    pub(crate) fn fail_unqueued(&mut self) -> Vec<CompletedBuffer> {
        let mut failed = Vec::new();
        for node in Node::ALL {
            if self.queue_enabled[node] {
                failed.extend(self.take_buffers(node, |b| !b.css.is_queued()));
            }
        }
        failed
    }

    /// Every caller buffer on every node.
    pub(crate) fn return_all(&mut self) -> Vec<CompletedBuffer> {
        let mut returned = Vec::new();
        for node in Node::ALL {
            returned.extend(self.take_buffers(node, |_| true));
        }
        returned
    }

    /// Forget hardware ownership after the firmware was stopped without
    /// returning its buffers; they are resubmitted on the next start.
    pub(crate) fn reclaim_queued(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            for buffer in node.buffers.iter_mut().filter(|b| b.css.is_queued()) {
                let daddr = buffer.css.daddr();
                buffer.css.reset(daddr);
            }
        }
        self.dummies.reset_states();
    }

    /// Power sequencing: device first, then address-space state.
    pub(crate) fn power_up(&mut self) -> ImguResult<()> {
        self.hw.power.power_up()?;
        self.hw.space.resume();
        Ok(())
    }

    pub(crate) fn power_down(&mut self) {
        self.hw.space.suspend();
        self.hw.power.power_down();
    }
}
