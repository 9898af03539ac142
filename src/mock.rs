//! In-memory hardware for tests and the simulator
//!
//! [`MockHardware`] implements the firmware, power and address-space traits
//! on one shared state. It provides:
//! - Bounded hardware queues that report busy at the configured depth
//! - Explicit completion control (`complete_next`, `complete_frame`, ...)
//! - Controllable failure injection
//! - Call logging for test verification
//!
//! Handles are cheap clones of the same state: keep one in the test and
//! hand [`MockHardware::hardware`] to the device.

use crate::device::Hardware;
use imgu_core::hal::{AddressSpace, Css, CssCompletion, CssRequest, Dequeued, IrqStatus, Power};
use imgu_core::limits::MAX_QUEUE_DEPTH;
use imgu_core::{
    CssQueue, DmaAddr, DmaMapping, DmaRegion, ImguError, ImguResult, PerQueue, PixFormat, Rects,
    Segment, VfOutput,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Operations that can be made to fail on their next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `Css::set_formats`
    SetFormats,
    /// `Power::power_up`
    PowerUp,
    /// `Css::start_streaming`
    StartStreaming,
}

/// Format configuration last pushed to the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedFormats {
    /// Pixel format per queue, `None` for queues without one.
    pub formats: PerQueue<Option<PixFormat>>,
    /// Processing rectangles
    pub rects: Rects,
    /// Where the secondary output goes
    pub vf_output: VfOutput,
}

struct MockState {
    depth: usize,
    powered: bool,
    streaming: bool,
    queues: PerQueue<VecDeque<CssRequest>>,
    completed: VecDeque<Dequeued>,
    submissions: Vec<CssRequest>,
    irq_pending: bool,
    formats: Option<PushedFormats>,
    submit_budget: Option<usize>,
    alloc_budget: Option<usize>,
    faults: Vec<Fault>,
    next_daddr: u32,
    live_allocations: usize,
    live_mappings: usize,
    call_log: Vec<String>,
}

impl MockState {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            powered: false,
            streaming: false,
            queues: PerQueue::default(),
            completed: VecDeque::new(),
            submissions: Vec::new(),
            irq_pending: false,
            formats: None,
            submit_budget: None,
            alloc_budget: None,
            faults: Vec::new(),
            next_daddr: 0,
            live_allocations: 0,
            live_mappings: 0,
            call_log: Vec::new(),
        }
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(i) => {
                self.faults.remove(i);
                true
            }
            None => false,
        }
    }

    fn next_daddr(&mut self) -> DmaAddr {
        self.next_daddr = self.next_daddr.wrapping_add(0x10_0000);
        DmaAddr(self.next_daddr)
    }

    fn complete_front(&mut self, queue: CssQueue, ok: bool) -> bool {
        match self.queues[queue].pop_front() {
            Some(request) => {
                self.completed.push_back(Dequeued::Buffer(CssCompletion {
                    handle: request.handle,
                    queue_id: queue.index() as u32,
                    ok,
                }));
                self.irq_pending = true;
                true
            }
            None => false,
        }
    }
}

/// Mock IMGU hardware
///
/// # Example
///
/// ```
/// use imgu::mock::MockHardware;
/// use imgu::imgu_core::hal::Power;
///
/// let mock = MockHardware::new();
/// let mut power = mock.clone();
/// power.power_up().unwrap();
/// assert!(mock.is_powered());
/// ```
#[derive(Clone)]
pub struct MockHardware {
    inner: Arc<Mutex<MockState>>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHardware {
    /// Create mock hardware with the default queue depth
    pub fn new() -> Self {
        Self::with_depth(MAX_QUEUE_DEPTH)
    }

    /// Create mock hardware whose queues hold `depth` buffers each
    pub fn with_depth(depth: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::new(depth))),
        }
    }

    /// Bundle handles to this mock for the device
    pub fn hardware(&self) -> Hardware {
        Hardware {
            css: Box::new(self.clone()),
            irq: Box::new(self.clone()),
            power: Box::new(self.clone()),
            space: Box::new(self.clone()),
        }
    }

    /// Return the oldest buffer of `queue`. Returns false if the queue is empty.
    pub fn complete_next(&self, queue: CssQueue, ok: bool) -> bool {
        self.inner.lock().complete_front(queue, ok)
    }

    /// Return the oldest buffer of every queue, as the firmware does when it
    /// finishes one frame. Returns the number of buffers returned.
    pub fn complete_frame(&self, ok: bool) -> usize {
        let mut state = self.inner.lock();
        CssQueue::ALL
            .into_iter()
            .filter(|&queue| state.complete_front(queue, ok))
            .count()
    }

    /// Return every queued buffer. Returns the number of buffers returned.
    pub fn complete_all(&self, ok: bool) -> usize {
        let mut total = 0;
        loop {
            match self.complete_frame(ok) {
                0 => return total,
                n => total += n,
            }
        }
    }

    /// Make the next dequeue report `entry`, bypassing the queues
    pub fn inject_dequeue(&self, entry: Dequeued) {
        let mut state = self.inner.lock();
        state.completed.push_back(entry);
        state.irq_pending = true;
    }

    /// Report a completion for a raw (possibly invalid) queue id
    pub fn inject_raw_completion(&self, completion: CssCompletion) {
        self.inject_dequeue(Dequeued::Buffer(completion));
    }

    /// Let `n` more submissions succeed, then fail the next one once
    pub fn fail_submit_after(&self, n: usize) {
        self.inner.lock().submit_budget = Some(n);
    }

    /// Let `n` more allocations succeed, then fail all further ones
    pub fn fail_alloc_after(&self, n: usize) {
        self.inner.lock().alloc_budget = Some(n);
    }

    /// Fail the next call of the given operation
    pub fn inject_fault(&self, fault: Fault) {
        self.inner.lock().faults.push(fault);
    }

    /// Remove every pending failure injection
    pub fn clear_faults(&self) {
        let mut state = self.inner.lock();
        state.faults.clear();
        state.submit_budget = None;
        state.alloc_budget = None;
    }

    /// Every request accepted so far, in submission order
    pub fn submissions(&self) -> Vec<CssRequest> {
        self.inner.lock().submissions.clone()
    }

    /// Clear the submission history
    pub fn clear_submissions(&self) {
        self.inner.lock().submissions.clear();
    }

    /// Buffers currently held by `queue`
    pub fn queued(&self, queue: CssQueue) -> usize {
        self.inner.lock().queues[queue].len()
    }

    /// Whether the device is powered up
    pub fn is_powered(&self) -> bool {
        self.inner.lock().powered
    }

    /// Whether the firmware is streaming
    pub fn is_streaming(&self) -> bool {
        self.inner.lock().streaming
    }

    /// Regions allocated and not yet freed
    pub fn live_allocations(&self) -> usize {
        self.inner.lock().live_allocations
    }

    /// Caller mappings not yet unmapped
    pub fn live_mappings(&self) -> usize {
        self.inner.lock().live_mappings
    }

    /// Formats from the last `set_formats` call
    pub fn formats(&self) -> Option<PushedFormats> {
        self.inner.lock().formats.clone()
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        self.inner.lock().call_log.clone()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        self.inner.lock().call_log.clear();
    }

    fn log_call(&self, call: &str) {
        self.inner.lock().call_log.push(call.to_string());
    }
}

impl Css for MockHardware {
    fn set_formats(
        &mut self,
        formats: &PerQueue<Option<PixFormat>>,
        rects: &Rects,
        vf_output: VfOutput,
    ) -> ImguResult<()> {
        self.log_call("set_formats");
        let mut state = self.inner.lock();
        if state.take_fault(Fault::SetFormats) {
            return Err(ImguError::Hardware("injected set_formats failure".into()));
        }
        state.formats = Some(PushedFormats {
            formats: formats.clone(),
            rects: *rects,
            vf_output,
        });
        Ok(())
    }

    fn start_streaming(&mut self) -> ImguResult<()> {
        self.log_call("start_streaming");
        let mut state = self.inner.lock();
        if state.take_fault(Fault::StartStreaming) {
            return Err(ImguError::Hardware("injected start failure".into()));
        }
        if !state.powered {
            return Err(ImguError::Hardware("started while powered down".into()));
        }
        state.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.log_call("stop_streaming");
        let mut state = self.inner.lock();
        state.streaming = false;
        for (_, queue) in state.queues.iter_mut() {
            queue.clear();
        }
        state.completed.clear();
        state.irq_pending = false;
    }

    fn is_streaming(&self) -> bool {
        self.inner.lock().streaming
    }

    fn queue_buffer(&mut self, request: &CssRequest) -> ImguResult<()> {
        let mut state = self.inner.lock();
        if !state.streaming {
            return Err(ImguError::NotStreaming);
        }
        if state.queues[request.queue].len() >= state.depth {
            return Err(ImguError::Busy(request.queue));
        }
        match state.submit_budget {
            Some(0) => {
                state.submit_budget = None;
                return Err(ImguError::Hardware("injected submit failure".into()));
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        state.queues[request.queue].push_back(request.clone());
        state.submissions.push(request.clone());
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Dequeued {
        let mut state = self.inner.lock();
        match state.completed.pop_front() {
            Some(entry) => entry,
            None if state.streaming => Dequeued::Empty,
            None => Dequeued::NotStreaming,
        }
    }

    fn queue_empty(&self) -> bool {
        let state = self.inner.lock();
        state.queues.iter().all(|(_, queue)| queue.is_empty())
            && !state
                .completed
                .iter()
                .any(|entry| matches!(entry, Dequeued::Buffer(_)))
    }
}

impl IrqStatus for MockHardware {
    fn irq_ack(&mut self) -> bool {
        std::mem::take(&mut self.inner.lock().irq_pending)
    }
}

impl Power for MockHardware {
    fn power_up(&mut self) -> ImguResult<()> {
        self.log_call("power_up");
        let mut state = self.inner.lock();
        if state.take_fault(Fault::PowerUp) {
            return Err(ImguError::Hardware("injected power up failure".into()));
        }
        state.powered = true;
        Ok(())
    }

    fn power_down(&mut self) {
        self.log_call("power_down");
        self.inner.lock().powered = false;
    }
}

impl AddressSpace for MockHardware {
    fn alloc(&mut self, size: usize) -> ImguResult<DmaRegion> {
        let mut state = self.inner.lock();
        match state.alloc_budget {
            Some(0) => return Err(ImguError::Allocation { size }),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        state.live_allocations += 1;
        let daddr = state.next_daddr();
        Ok(DmaRegion::new(daddr, size))
    }

    fn free(&mut self, _region: DmaRegion) {
        let mut state = self.inner.lock();
        state.live_allocations = state.live_allocations.saturating_sub(1);
    }

    fn map_sg(&mut self, segments: &[Segment]) -> ImguResult<DmaMapping> {
        let mut state = self.inner.lock();
        state.live_mappings += 1;
        Ok(DmaMapping {
            daddr: state.next_daddr(),
            size: segments.iter().map(|s| s.len).sum(),
        })
    }

    fn unmap(&mut self, _mapping: DmaMapping) {
        let mut state = self.inner.lock();
        state.live_mappings = state.live_mappings.saturating_sub(1);
    }

    fn suspend(&mut self) {
        self.log_call("mmu_suspend");
    }

    fn resume(&mut self) {
        self.log_call("mmu_resume");
    }
}
