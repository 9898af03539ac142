//! Suspend and resume against the mock hardware.

use imgu::imgu_core::{BufferOutcome, BufferState, CallerBuffer, CssQueue, Node, Segment};
use imgu::{Imgu, ImguConfig, MockHardware, StreamPhase};
use std::thread;
use std::time::{Duration, Instant};
use tracing_test::traced_test;

fn queue(imgu: &Imgu, node: Node, index: u32) {
    let len = imgu.buffer_size(node);
    let segments = vec![Segment {
        phys: 0x2000_0000 + u64::from(index) * 0x100_0000,
        len,
    }];
    imgu.queue_buffer(node, CallerBuffer::scatter(index, segments))
        .unwrap();
}

fn streaming(drain_timeout_ms: u64) -> (MockHardware, Imgu) {
    let mut config = ImguConfig::default();
    config.stream.drain_timeout_ms = drain_timeout_ms;
    let mock = MockHardware::new();
    let imgu = Imgu::new(config, mock.hardware()).unwrap();
    queue(&imgu, Node::In, 0);
    queue(&imgu, Node::Out, 0);
    imgu.stream_on().unwrap();
    (mock, imgu)
}

fn count(log: &[String], call: &str) -> usize {
    log.iter().filter(|c| *c == call).count()
}

#[test]
#[traced_test]
fn test_suspend_waits_for_late_completion() {
    let (mock, imgu) = streaming(1000);

    let elapsed = thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(200));
            mock.complete_all(true);
            imgu.service_interrupt();
        });

        let start = Instant::now();
        imgu.suspend().unwrap();
        start.elapsed()
    });

    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");
    assert!(!logs_contain("wait buffer drain timeout"));
    assert_eq!(imgu.phase(), StreamPhase::Suspended);

    // Completions that arrived before the stop are handed back normally.
    assert_eq!(imgu.dequeue_completed(Node::In).unwrap().outcome, BufferOutcome::Done);
    assert_eq!(imgu.dequeue_completed(Node::Out).unwrap().outcome, BufferOutcome::Done);
    assert_eq!(mock.queued(CssQueue::In), 0);
}

#[test]
#[traced_test]
fn test_suspend_gives_up_after_timeout() {
    let (mock, imgu) = streaming(100);

    let start = Instant::now();
    imgu.suspend().unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(logs_contain("wait buffer drain timeout"));
    assert!(!mock.is_streaming());
    assert!(!mock.is_powered());

    // The firmware dropped the buffers; the core still owns them.
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::New));
    assert_eq!(imgu.buffer_state(Node::Out, 0), Some(BufferState::New));
    assert!(imgu.dequeue_completed(Node::In).is_none());
}

#[test]
fn test_resume_resubmits_reclaimed_buffers() {
    let (mock, imgu) = streaming(10);
    imgu.suspend().unwrap();
    mock.clear_submissions();

    imgu.resume().unwrap();
    assert_eq!(imgu.phase(), StreamPhase::Streaming);
    assert!(mock.is_powered());
    assert_eq!(mock.submissions().len(), 4);
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::Queued));

    mock.complete_frame(true);
    imgu.service_interrupt();
    let out = imgu.dequeue_completed(Node::Out).unwrap();
    assert_eq!((out.index, out.outcome), (0, BufferOutcome::Done));
}

#[test]
fn test_power_sequencing() {
    let (mock, imgu) = streaming(10);
    imgu.suspend().unwrap();
    imgu.resume().unwrap();

    let log = mock.call_log();
    let order: Vec<_> = log
        .iter()
        .filter(|c| c.starts_with("power") || c.starts_with("mmu"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        order,
        vec![
            "power_up",
            "mmu_resume",
            "mmu_suspend",
            "power_down",
            "power_up",
            "mmu_resume"
        ]
    );
}

#[test]
fn test_stream_off_from_suspend_powers_down_once() {
    let (mock, imgu) = streaming(10);
    imgu.suspend().unwrap();
    imgu.suspend().unwrap();

    imgu.stream_off().unwrap();
    assert_eq!(imgu.phase(), StreamPhase::Stopped);
    assert_eq!(count(&mock.call_log(), "power_down"), 1);
    assert_eq!(
        imgu.dequeue_completed(Node::In).unwrap().outcome,
        BufferOutcome::Error
    );

    // Nothing to resume once stopped.
    imgu.resume().unwrap();
    assert_eq!(imgu.phase(), StreamPhase::Stopped);
}
