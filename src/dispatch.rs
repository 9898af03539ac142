//! Queue dispatcher: feeds the hardware queues one frame set at a time.

use crate::device::{Imgu, ImguState};
use imgu_core::hal::CssRequest;
use imgu_core::{BufferHandle, BufferState, ImguError, ImguResult, Node, PipeMode};
use tracing::{debug, error};

/// Which caller drives a submission pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueMode {
    /// Stream on and resume. Failures propagate; the caller unwinds.
    Initial,
    /// Buffer queue and completion handling. Failures hand back every caller
    /// buffer the hardware does not hold.
    Incremental,
}

impl Imgu {
    /// Submit as many buffers as the hardware accepts.
    ///
    /// A full hardware queue ends the pass without error; what was not
    /// submitted is picked up by a later pass.
    pub(crate) fn queue_buffers(&self, mode: QueueMode) -> ImguResult<()> {
        let mut state = self.state.lock();
        if !state.hw.css.is_streaming() {
            return Ok(());
        }

        match state.submit_ready() {
            Ok(()) => Ok(()),
            Err(ImguError::Busy(queue)) => {
                debug!(queue = %queue, "hardware queue full");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, mode = ?mode, "failed to queue buffer to css");
                if mode == QueueMode::Incremental {
                    let failed = state.fail_unqueued();
                    drop(state);
                    self.deliver_all(failed);
                }
                Err(err)
            }
        }
    }
}

impl ImguState {
    /// One pass over the nodes, starting after input, until a queue runs
    /// dry or no input buffer is left.
    fn submit_ready(&mut self) -> ImguResult<()> {
        // A frame set is only submitted when its input buffer is ready.
        if self.next_user(Node::In).is_none() {
            return Ok(());
        }

        let mut node = Node::In.next();
        loop {
            if !self.skip_node(node) && self.queue_enabled[node] {
                let Some(handle) = self.select(node) else {
                    break;
                };
                self.submit(node, handle)?;
            }

            if node == Node::In && self.next_user(Node::In).is_none() {
                break;
            }
            node = node.next();
        }
        Ok(())
    }

    /// Viewfinder output exists only in video mode, postview only in capture
    /// mode, and each only while its node is enabled.
    fn skip_node(&self, node: Node) -> bool {
        match node {
            Node::Vf => self.pipe_mode == PipeMode::Capture || !self.nodes[Node::Vf].enabled,
            Node::Pv => self.pipe_mode == PipeMode::Video || !self.nodes[Node::Pv].enabled,
            _ => false,
        }
    }

    /// Index of the oldest caller buffer of `node` not yet submitted.
    fn next_user(&self, node: Node) -> Option<u32> {
        self.nodes[node]
            .buffers
            .iter()
            .find(|b| b.css.state() == BufferState::New)
            .map(|b| b.index)
    }

    /// Oldest new caller buffer, else a filler.
    fn select(&mut self, node: Node) -> Option<BufferHandle> {
        match self.next_user(node) {
            Some(index) => Some(BufferHandle::User { node, index }),
            None => self.dummies.acquire(node.css_queue()),
        }
    }

    fn submit(&mut self, node: Node, handle: BufferHandle) -> ImguResult<()> {
        let queue = node.css_queue();
        let daddr = match handle {
            BufferHandle::User { index, .. } => self.nodes[node]
                .buffers
                .iter()
                .find(|b| b.index == index)
                .map(|b| b.css.daddr()),
            BufferHandle::Filler { queue, slot } => {
                self.dummies.filler_mut(queue, slot).map(|f| f.daddr())
            }
        }
        .ok_or(ImguError::UnknownBuffer {
            node,
            index: handle_index(&handle),
        })?;

        let params = (node == Node::In).then(|| self.params.current_addrs());
        let request = CssRequest {
            handle,
            queue,
            daddr,
            params,
        };
        self.hw.css.queue_buffer(&request)?;

        match handle {
            BufferHandle::User { index, .. } => {
                if let Some(buffer) = self.nodes[node].buffers.iter_mut().find(|b| b.index == index) {
                    buffer.css.mark_queued();
                }
            }
            BufferHandle::Filler { queue, slot } => {
                if let Some(filler) = self.dummies.filler_mut(queue, slot) {
                    filler.mark_queued();
                }
            }
        }

        debug!(
            kind = if handle.is_filler() { "dummy" } else { "user" },
            node = %node,
            index = handle_index(&handle),
            daddr = %daddr,
            frame = %self.frame,
            "queue buffer to css"
        );
        if node == Node::In {
            self.frame = self.frame.next();
        }
        Ok(())
    }
}

fn handle_index(handle: &BufferHandle) -> u32 {
    match *handle {
        BufferHandle::User { index, .. } => index,
        BufferHandle::Filler { slot, .. } => u32::try_from(slot).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImguConfig;
    use crate::mock::MockHardware;
    use imgu_core::{CallerBuffer, CssQueue, Segment};

    fn scatter(index: u32, len: usize) -> CallerBuffer {
        CallerBuffer::scatter(index, vec![Segment { phys: 0x1000, len }])
    }

    #[test]
    fn test_no_submission_without_input() {
        let mock = MockHardware::new();
        let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
        imgu.queue_buffer(Node::Out, scatter(0, imgu.buffer_size(Node::Out)))
            .unwrap();

        imgu.stream_on().unwrap();
        assert!(mock.submissions().is_empty());
    }

    #[test]
    fn test_postview_only_in_capture_mode() {
        let mock = MockHardware::new();
        let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
        imgu.set_node_enabled(Node::Pv, true).unwrap();
        imgu.set_pipe_mode(PipeMode::Capture).unwrap();
        imgu.queue_buffer(Node::Pv, scatter(0, imgu.buffer_size(Node::Pv)))
            .unwrap();
        imgu.queue_buffer(Node::In, scatter(0, imgu.buffer_size(Node::In)))
            .unwrap();

        imgu.stream_on().unwrap();
        let pv = mock
            .submissions()
            .into_iter()
            .find(|r| r.queue == CssQueue::Vf)
            .unwrap();
        assert_eq!(pv.handle, BufferHandle::User { node: Node::Pv, index: 0 });
    }

    #[test]
    fn test_input_carries_param_addresses() {
        let mock = MockHardware::new();
        let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
        imgu.set_node_enabled(Node::Params, true).unwrap();

        let blob = 0u32.to_le_bytes().to_vec();
        imgu.queue_buffer(Node::Params, CallerBuffer::bytes(0, blob))
            .unwrap();
        imgu.queue_buffer(Node::In, scatter(0, imgu.buffer_size(Node::In)))
            .unwrap();
        imgu.stream_on().unwrap();

        let input = mock
            .submissions()
            .into_iter()
            .find(|r| r.queue == CssQueue::In)
            .unwrap();
        assert_eq!(input.params, Some(imgu.param_addrs()));
        assert_eq!(imgu.frame().get(), 1);
    }

    #[test]
    fn test_busy_ends_pass_quietly() {
        let mock = MockHardware::with_depth(1);
        let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
        for index in 0..3 {
            imgu.queue_buffer(Node::In, scatter(index, imgu.buffer_size(Node::In)))
                .unwrap();
        }

        imgu.stream_on().unwrap();
        assert_eq!(mock.queued(CssQueue::In), 1);
        assert_eq!(imgu.pending_buffers(Node::In), 3);
        assert!(imgu.dequeue_completed(Node::In).is_none());
    }
}
