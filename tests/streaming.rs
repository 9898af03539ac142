//! End-to-end streaming tests against the mock hardware.

use imgu::imgu_core::hal::{CssRequest, ParamBlock};
use imgu::imgu_core::{
    BufferHandle, BufferOutcome, BufferState, CallerBuffer, CssQueue, ImguError, Node, Segment,
};
use imgu::mock::Fault;
use imgu::{Imgu, ImguConfig, MockHardware, StreamPhase};

fn scatter(node: Node, index: u32, len: usize) -> CallerBuffer {
    let base = 0x1000_0000 * (node.index() as u64 + 1);
    CallerBuffer::scatter(
        index,
        vec![Segment {
            phys: base + u64::from(index) * 0x100_0000,
            len,
        }],
    )
}

fn queue(imgu: &Imgu, node: Node, index: u32) {
    imgu.queue_buffer(node, scatter(node, index, imgu.buffer_size(node)))
        .unwrap();
}

fn device() -> (MockHardware, Imgu) {
    let mock = MockHardware::new();
    let imgu = Imgu::new(ImguConfig::default(), mock.hardware()).unwrap();
    (mock, imgu)
}

fn drain(imgu: &Imgu, node: Node) -> Vec<(u32, BufferOutcome)> {
    std::iter::from_fn(|| imgu.dequeue_completed(node))
        .map(|b| (b.index, b.outcome))
        .collect()
}

fn filler(queue: CssQueue, slot: usize) -> BufferHandle {
    BufferHandle::Filler { queue, slot }
}

fn handles(requests: &[CssRequest]) -> Vec<BufferHandle> {
    requests.iter().map(|r| r.handle).collect()
}

#[test]
fn test_start_with_input_and_output_fills_mandatory_queues() {
    let (mock, imgu) = device();
    imgu.set_node_enabled(Node::Vf, true).unwrap();
    queue(&imgu, Node::In, 0);
    queue(&imgu, Node::Out, 0);

    imgu.stream_on().unwrap();
    assert_eq!(imgu.phase(), StreamPhase::Streaming);

    assert_eq!(
        handles(&mock.submissions()),
        vec![
            BufferHandle::User {
                node: Node::Out,
                index: 0
            },
            filler(CssQueue::Vf, 0),
            filler(CssQueue::Stat3a, 0),
            filler(CssQueue::StatDvs, 0),
            BufferHandle::User {
                node: Node::In,
                index: 0
            },
        ]
    );
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::Queued));
    assert_eq!(imgu.frame().get(), 1);
}

#[test]
fn test_nothing_submitted_until_input_arrives() {
    let (mock, imgu) = device();
    queue(&imgu, Node::Out, 0);
    imgu.stream_on().unwrap();
    assert!(mock.submissions().is_empty());

    queue(&imgu, Node::In, 0);
    let submitted = handles(&mock.submissions());
    assert_eq!(submitted.len(), 4);
    assert_eq!(
        submitted[0],
        BufferHandle::User {
            node: Node::Out,
            index: 0
        }
    );
}

#[test]
fn test_incremental_failure_returns_unqueued_buffers() {
    let (mock, imgu) = device();
    queue(&imgu, Node::In, 0);
    queue(&imgu, Node::Out, 0);
    imgu.stream_on().unwrap();

    queue(&imgu, Node::Out, 1);
    mock.fail_submit_after(0);
    queue(&imgu, Node::In, 1);

    assert_eq!(drain(&imgu, Node::Out), vec![(1, BufferOutcome::Error)]);
    assert_eq!(drain(&imgu, Node::In), vec![(1, BufferOutcome::Error)]);
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::Queued));
    assert_eq!(imgu.buffer_state(Node::Out, 0), Some(BufferState::Queued));
    assert_eq!(imgu.phase(), StreamPhase::Streaming);
}

#[test]
fn test_completions_are_fifo_per_node() {
    let (mock, imgu) = device();
    for index in 0..3 {
        queue(&imgu, Node::In, index);
        queue(&imgu, Node::Out, index);
    }
    imgu.stream_on().unwrap();

    assert_eq!(mock.complete_all(true), 12);
    imgu.service_interrupt();

    let out: Vec<_> = std::iter::from_fn(|| imgu.dequeue_completed(Node::Out)).collect();
    assert_eq!(
        out.iter().map(|b| (b.index, b.sequence)).collect::<Vec<_>>(),
        vec![(0, 1), (1, 2), (2, 3)]
    );
    assert_eq!(
        drain(&imgu, Node::In),
        vec![
            (0, BufferOutcome::Done),
            (1, BufferOutcome::Done),
            (2, BufferOutcome::Done)
        ]
    );
}

#[test]
fn test_fillers_are_never_handed_back() {
    let (mock, imgu) = device();
    imgu.set_node_enabled(Node::Stat3a, true).unwrap();
    queue(&imgu, Node::In, 0);
    queue(&imgu, Node::In, 1);
    imgu.stream_on().unwrap();

    mock.complete_all(true);
    imgu.service_interrupt();

    assert_eq!(drain(&imgu, Node::In).len(), 2);
    for node in [Node::Out, Node::Vf, Node::Stat3a, Node::StatDvs] {
        assert!(imgu.dequeue_completed(node).is_none(), "{node}");
    }
}

#[test]
fn test_steady_stream_with_parameters() {
    let (mock, imgu) = device();
    imgu.set_node_enabled(Node::Params, true).unwrap();
    for index in 0..2 {
        queue(&imgu, Node::In, index);
        queue(&imgu, Node::Out, index);
    }
    imgu.stream_on().unwrap();

    let mut params = 0;
    for frame in 0..40 {
        assert!(mock.complete_frame(true) > 0);
        imgu.service_interrupt();

        for (index, outcome) in drain(&imgu, Node::Out) {
            assert_eq!(outcome, BufferOutcome::Done);
            queue(&imgu, Node::Out, index);
        }
        for (index, outcome) in drain(&imgu, Node::In) {
            assert_eq!(outcome, BufferOutcome::Done);
            if frame % 2 == 0 {
                imgu.queue_buffer(
                    Node::Params,
                    CallerBuffer::bytes(params, 0u32.to_le_bytes().to_vec()),
                )
                .unwrap();
                params += 1;
            }
            queue(&imgu, Node::In, index);
        }
    }

    let applied = drain(&imgu, Node::Params);
    assert_eq!(applied.len(), params as usize);
    assert!(applied.iter().all(|(_, o)| *o == BufferOutcome::Done));
    assert!(imgu.frame().get() > 40);

    let last_input = mock
        .submissions()
        .into_iter()
        .filter(|r| r.queue == CssQueue::In)
        .last()
        .unwrap();
    assert_eq!(last_input.params, Some(imgu.param_addrs()));
}

#[test]
fn test_parameter_pool_backpressure() {
    let (_mock, imgu) = device();
    imgu.set_node_enabled(Node::Params, true).unwrap();

    let acc = imgu.config().pool.block_size(ParamBlock::Acc);
    let mut blob = 1u32.to_le_bytes().to_vec();
    blob.extend(std::iter::repeat(0xa5).take(acc));

    for index in 0..5 {
        imgu.queue_buffer(Node::Params, CallerBuffer::bytes(index, blob.clone()))
            .unwrap();
    }
    let outcomes: Vec<_> = drain(&imgu, Node::Params)
        .into_iter()
        .map(|(_, outcome)| outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            BufferOutcome::Done,
            BufferOutcome::Done,
            BufferOutcome::Done,
            BufferOutcome::Done,
            BufferOutcome::Error,
        ]
    );
    assert_eq!(imgu.param_block(ParamBlock::Acc), Some(vec![0xa5; acc]));
    assert_eq!(
        imgu.param_block(ParamBlock::Vmem0),
        Some(vec![0; imgu.config().pool.block_size(ParamBlock::Vmem0)])
    );
}

#[test]
fn test_stream_off_returns_everything() {
    let (mock, imgu) = device();
    queue(&imgu, Node::In, 0);
    queue(&imgu, Node::In, 1);
    queue(&imgu, Node::Out, 0);
    imgu.stream_on().unwrap();

    imgu.stream_off().unwrap();
    assert_eq!(
        drain(&imgu, Node::In),
        vec![(0, BufferOutcome::Error), (1, BufferOutcome::Error)]
    );
    assert_eq!(drain(&imgu, Node::Out), vec![(0, BufferOutcome::Error)]);
    assert_eq!(mock.live_mappings(), 0);
    assert!(!mock.is_streaming());
    assert!(!mock.is_powered());

    queue(&imgu, Node::In, 0);
    imgu.stream_on().unwrap();
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::Queued));
}

#[test]
fn test_power_failure_leaves_device_stopped() {
    let (mock, imgu) = device();
    queue(&imgu, Node::In, 0);
    mock.inject_fault(Fault::PowerUp);

    let err = imgu.stream_on().unwrap_err();
    assert!(matches!(err, ImguError::Hardware(_)));
    assert_eq!(imgu.phase(), StreamPhase::Stopped);
    assert!(!mock.call_log().iter().any(|c| c == "start_streaming"));
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::New));
}

#[test]
fn test_initial_submission_failure_unwinds() {
    let (mock, imgu) = device();
    queue(&imgu, Node::In, 0);
    queue(&imgu, Node::Out, 0);

    // Every attempt fails after the output buffer went in; the device must
    // come back to the same stopped state each time.
    for attempt in 0..3 {
        mock.fail_submit_after(1);
        let err = imgu.stream_on().unwrap_err();
        assert!(matches!(err, ImguError::Hardware(_)), "{attempt}: {err}");

        assert_eq!(imgu.phase(), StreamPhase::Stopped);
        assert!(!mock.is_powered());
        assert!(!mock.is_streaming());
        assert!(imgu.dequeue_completed(Node::In).is_none());
        assert!(imgu.dequeue_completed(Node::Out).is_none());
        assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::New));
        assert_eq!(imgu.buffer_state(Node::Out, 0), Some(BufferState::New));
    }

    imgu.stream_on().unwrap();
    assert_eq!(imgu.phase(), StreamPhase::Streaming);
    assert_eq!(imgu.buffer_state(Node::In, 0), Some(BufferState::Queued));
    assert_eq!(imgu.buffer_state(Node::Out, 0), Some(BufferState::Queued));
}

#[test]
fn test_format_failure_is_reported() {
    let (mock, imgu) = device();
    mock.inject_fault(Fault::SetFormats);

    assert!(imgu.stream_on().is_err());
    assert!(!mock.is_powered());
    imgu.stream_on().unwrap();
}

#[test]
fn test_configuration_locked_while_streaming() {
    let (_mock, imgu) = device();
    imgu.stream_on().unwrap();

    assert!(matches!(
        imgu.set_node_enabled(Node::Vf, true),
        Err(ImguError::InvalidState { .. })
    ));
    assert!(imgu.set_rects(Default::default()).is_err());
}

#[test]
fn test_next_completed_waits_for_delivery() {
    let (mock, imgu) = device();
    queue(&imgu, Node::In, 0);
    imgu.stream_on().unwrap();

    let mut waiter = tokio_test::task::spawn(imgu.next_completed(Node::In));
    tokio_test::assert_pending!(waiter.poll());

    mock.complete_frame(true);
    imgu.service_interrupt();
    assert!(waiter.is_woken());
    let done = tokio_test::assert_ready!(waiter.poll());
    assert_eq!((done.index, done.outcome), (0, BufferOutcome::Done));
}
