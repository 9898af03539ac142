//! Stream lifecycle: start, stop, suspend and resume.

use crate::device::{Imgu, ImguState};
use crate::dispatch::QueueMode;
use imgu_core::{CssQueue, ImguError, ImguResult, Node, PerQueue, VfOutput};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where the device is in its streaming lifecycle.
///
/// ```
/// use imgu::{Imgu, ImguConfig, MockHardware, StreamPhase};
///
/// let mock = MockHardware::new();
/// let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
/// assert_eq!(imgu.phase(), StreamPhase::Stopped);
///
/// imgu.stream_on().unwrap();
/// assert_eq!(imgu.phase().name(), "streaming");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamPhase {
    /// Not streaming and powered down.
    #[default]
    Stopped,
    /// Power up and initial submission in progress.
    Starting,
    /// Frames are flowing.
    Streaming,
    /// Teardown in progress.
    Stopping,
    /// Powered down mid-stream; resume restarts the pipeline.
    Suspended,
}

impl StreamPhase {
    /// Lowercase name used in errors and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StreamPhase::Stopped => "stopped",
            StreamPhase::Starting => "starting",
            StreamPhase::Streaming => "streaming",
            StreamPhase::Stopping => "stopping",
            StreamPhase::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub(crate) phase: StreamPhase,
    /// The firmware was streaming when suspend ran.
    suspend_in_stream: bool,
}

impl Lifecycle {
    pub(crate) fn require_stopped(&self, op: &'static str) -> ImguResult<()> {
        self.require(op, &[StreamPhase::Stopped])
    }

    fn require(&self, op: &'static str, allowed: &[StreamPhase]) -> ImguResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(ImguError::InvalidState {
                op,
                phase: self.phase.name(),
            })
        }
    }
}

impl Imgu {
    /// Start streaming.
    ///
    /// Pushes the formats, powers up, starts the firmware, creates the
    /// fillers and submits everything that is ready. A failing step undoes
    /// the earlier ones; buffers the hardware took are kept for the next
    /// start.
    pub fn stream_on(&self) -> ImguResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.require("stream on", &[StreamPhase::Stopped])?;
        lifecycle.phase = StreamPhase::Starting;

        if let Err(err) = self.state.lock().start() {
            lifecycle.phase = StreamPhase::Stopped;
            return Err(err);
        }

        let _gate = self.qbuf_lock.lock();
        if let Err(err) = self.queue_buffers(QueueMode::Initial) {
            let mut state = self.state.lock();
            state.hw.css.stop_streaming();
            state.reclaim_queued();
            state.dummies.disable_all();
            state.power_down();
            lifecycle.phase = StreamPhase::Stopped;
            return Err(err);
        }

        lifecycle.phase = StreamPhase::Streaming;
        info!(frame = %self.frame(), "stream on");
        Ok(())
    }

    /// Stop streaming and hand every caller buffer back with an error
    /// outcome.
    pub fn stream_off(&self) -> ImguResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.require(
            "stream off",
            &[StreamPhase::Streaming, StreamPhase::Suspended],
        )?;
        let powered = lifecycle.phase == StreamPhase::Streaming;
        lifecycle.phase = StreamPhase::Stopping;

        {
            let _gate = self.qbuf_lock.lock();
            self.state.lock().hw.css.stop_streaming();
            self.synchronize_irq();
        }

        let returned = {
            let mut state = self.state.lock();
            if powered {
                state.power_down();
            }
            state.dummies.disable_all();
            state.return_all()
        };
        let count = returned.len();
        self.deliver_all(returned);

        lifecycle.phase = StreamPhase::Stopped;
        lifecycle.suspend_in_stream = false;
        info!(returned = count, "stream off");
        Ok(())
    }

    /// Quiesce the hardware and power down.
    ///
    /// Waits up to the configured drain timeout for the hardware queues to
    /// empty. Buffers the firmware still held are resubmitted on resume.
    /// Does nothing unless streaming.
    pub fn suspend(&self) -> ImguResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.phase == StreamPhase::Suspended {
            return Ok(());
        }

        lifecycle.suspend_in_stream = self.is_streaming();
        if !lifecycle.suspend_in_stream {
            debug!(phase = lifecycle.phase.name(), "suspend while not streaming");
            return Ok(());
        }

        {
            let _gate = self.qbuf_lock.lock();
            let timeout = self.config().stream.drain_timeout();
            let deadline = Instant::now() + timeout;

            let mut state = self.state.lock();
            while !state.hw.css.queue_empty() {
                if self.buf_drain.wait_until(&mut state, deadline).timed_out() {
                    error!(timeout_ms = timeout.as_millis(), "wait buffer drain timeout");
                    break;
                }
            }
            state.hw.css.stop_streaming();
            drop(state);

            self.synchronize_irq();
        }

        let mut state = self.state.lock();
        state.reclaim_queued();
        state.power_down();
        lifecycle.phase = StreamPhase::Suspended;
        info!("suspended");
        Ok(())
    }

    /// Restart a stream that was running when suspended.
    ///
    /// Failures are logged and leave the device suspended, so a later
    /// resume can try again.
    pub fn resume(&self) -> ImguResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.phase != StreamPhase::Suspended || !lifecycle.suspend_in_stream {
            return Ok(());
        }

        if let Err(err) = self.state.lock().restart() {
            error!(error = %err, "failed to resume streaming");
            return Ok(());
        }

        {
            let _gate = self.qbuf_lock.lock();
            if let Err(err) = self.queue_buffers(QueueMode::Initial) {
                warn!(error = %err, "resubmission after resume failed");
            }
        }

        lifecycle.phase = StreamPhase::Streaming;
        lifecycle.suspend_in_stream = false;
        info!(frame = %self.frame(), "resumed");
        Ok(())
    }
}

impl ImguState {
    /// Bring the hardware up for a new stream.
    fn start(&mut self) -> ImguResult<()> {
        for node in Node::ALL {
            self.queue_enabled[node] = match node {
                Node::Out | Node::Vf | Node::Pv | Node::Stat3a | Node::StatDvs => true,
                Node::Params => false,
                Node::In => self.nodes[node].enabled,
            };
            self.nodes[node].sequence = 0;
        }

        let vf_enabled = self.nodes[Node::Vf].enabled;
        let formats = PerQueue::from_fn(|queue| {
            let node = Node::for_queue(queue, vf_enabled);
            if node.is_meta() || !self.queue_enabled[node] {
                return None;
            }
            self.nodes[node].format.pixel().copied()
        });
        let vf_output = if vf_enabled {
            VfOutput::Viewfinder
        } else if self.nodes[Node::Pv].enabled {
            VfOutput::Postview
        } else {
            VfOutput::Disabled
        };
        self.hw.css.set_formats(&formats, &self.rects, vf_output)?;

        self.power_up()?;
        if let Err(err) = self.hw.css.start_streaming() {
            self.power_down();
            return Err(err);
        }

        if let Err(err) = self.init_fillers(vf_output) {
            self.hw.css.stop_streaming();
            self.dummies.disable_all();
            self.power_down();
            return Err(err);
        }
        Ok(())
    }

    fn init_fillers(&mut self, vf_output: VfOutput) -> ImguResult<()> {
        let vf_enabled = vf_output == VfOutput::Viewfinder;
        for queue in CssQueue::ALL {
            if queue == CssQueue::MASTER {
                continue;
            }
            let node = Node::for_queue(queue, vf_enabled);
            if !self.queue_enabled[node]
                || (queue == CssQueue::Vf && vf_output == VfOutput::Disabled)
            {
                continue;
            }
            let size = self.nodes[node].format.buffer_size();
            self.dummies.init(self.hw.space.as_mut(), queue, size)?;
        }
        Ok(())
    }

    /// Power up and restart the firmware after a suspend.
    fn restart(&mut self) -> ImguResult<()> {
        self.power_up()?;
        if let Err(err) = self.hw.css.start_streaming() {
            self.power_down();
            return Err(err);
        }
        Ok(())
    }
}
