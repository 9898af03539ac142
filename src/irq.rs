//! Completion reconciler: the interrupt handlers.
//!
//! [`Imgu::handle_irq`] is the hard half and only acknowledges the
//! interrupt. [`Imgu::irq_thread`] drains the firmware's completions, hands
//! caller buffers back, and refills the queues when the submission gate is
//! free.

use crate::device::{Imgu, ImguState};
use crate::dispatch::QueueMode;
use imgu_core::hal::{CssCompletion, Dequeued, IrqReturn};
use imgu_core::{
    BufferHandle, BufferOutcome, CompletedBuffer, CssQueue, Direction, ImguError, ImguResult, Node,
};
use tracing::{debug, error};

impl Imgu {
    /// Acknowledge an interrupt.
    ///
    /// Takes only the interrupt status lock, so it returns promptly while
    /// stream control or the threaded half holds the device state.
    pub fn handle_irq(&self) -> IrqReturn {
        if self.irq_status.lock().irq_ack() {
            IrqReturn::WakeThread
        } else {
            IrqReturn::None
        }
    }

    /// Threaded interrupt handler.
    pub fn irq_thread(&self) {
        let _fence = self.irq_lock.lock();

        loop {
            let timestamp_ns = self.now_ns();
            let completion = match self.dequeue() {
                Dequeued::Buffer(completion) => completion,
                Dequeued::Empty | Dequeued::NotStreaming | Dequeued::Retry => break,
                Dequeued::Failed(err) => {
                    error!(error = %err, "failed to dequeue buffers");
                    break;
                }
            };

            let mut state = self.state.lock();
            match state.reconcile(&completion, timestamp_ns) {
                Ok(Some(buffer)) => self.deliver(buffer),
                Ok(None) => {}
                Err(err) => {
                    error!(queue_id = completion.queue_id, error = %err, "dropping completion");
                }
            }
            if state.hw.css.queue_empty() {
                self.buf_drain.notify_all();
            }
        }

        // Stop and suspend hold the gate while tearing down; never wait for it.
        if let Some(_gate) = self.qbuf_lock.try_lock() {
            let _ = self.queue_buffers(QueueMode::Incremental);
        } else {
            debug!("submission gate busy, skipping refill");
        }
    }

    /// Run both halves, as an interrupt line would.
    pub fn service_interrupt(&self) {
        if self.handle_irq() == IrqReturn::WakeThread {
            self.irq_thread();
        }
    }

    /// Wait until a running threaded handler has finished.
    pub(crate) fn synchronize_irq(&self) {
        drop(self.irq_lock.lock());
    }

    fn dequeue(&self) -> Dequeued {
        loop {
            let dequeued = self.state.lock().hw.css.dequeue_buffer();
            if !matches!(dequeued, Dequeued::Retry) {
                return dequeued;
            }
        }
    }
}

impl ImguState {
    /// Match a completion to its owner and update it.
    ///
    /// Returns the caller buffer to hand back, or `None` for fillers.
    fn reconcile(
        &mut self,
        completion: &CssCompletion,
        timestamp_ns: u64,
    ) -> ImguResult<Option<CompletedBuffer>> {
        let queue = CssQueue::try_from(completion.queue_id)?;

        match completion.handle {
            BufferHandle::Filler { queue: owner, slot } => {
                if owner != queue || !self.dummies.owns(&completion.handle) {
                    return Err(ImguError::InvalidQueue(completion.queue_id));
                }
                if let Some(filler) = self.dummies.filler_mut(owner, slot) {
                    filler.complete(completion.ok);
                }
                let node = Node::for_queue(queue, self.nodes[Node::Vf].enabled);
                debug!(node = %node, slot, "dequeue dummy buffer from css");
                Ok(None)
            }
            BufferHandle::User { node, index } => {
                if node.css_queue() != queue {
                    return Err(ImguError::InvalidQueue(completion.queue_id));
                }
                let state = &mut self.nodes[node];
                let position = state
                    .buffers
                    .iter()
                    .position(|b| b.index == index && b.css.is_queued())
                    .ok_or(ImguError::UnknownBuffer { node, index })?;
                let Some(mut buffer) = state.buffers.remove(position) else {
                    return Err(ImguError::UnknownBuffer { node, index });
                };

                buffer.css.complete(completion.ok);
                self.hw.space.unmap(buffer.mapping);

                let outcome = if completion.ok {
                    BufferOutcome::Done
                } else {
                    BufferOutcome::Error
                };
                let mut done = CompletedBuffer {
                    node,
                    index,
                    outcome,
                    sequence: 0,
                    timestamp_ns: 0,
                    bytes_used: 0,
                };
                if node.direction() == Direction::FromDevice {
                    state.sequence = state.sequence.wrapping_add(1);
                    done.sequence = state.sequence;
                    done.timestamp_ns = timestamp_ns;
                    done.bytes_used = state.format.buffer_size();
                }
                debug!(node = %node, index, ok = completion.ok, "dequeue user buffer from css");
                Ok(Some(done))
            }
        }
    }
}
