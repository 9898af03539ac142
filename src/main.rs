//! IMGU simulator: streams frames through the core on mock hardware.
//!
//! A producer keeps input buffers in circulation, consumers recycle output
//! and statistics buffers, and a hardware task completes one frame per
//! period and runs the interrupt handlers.
//!
//! ```bash
//! # 120 frames at 2 ms, suspending once after frame 60
//! imgu-sim --frames 120 --period-ms 2 --suspend-at 60
//!
//! # Trace every submission
//! RUST_LOG=imgu=debug imgu-sim --frames 8
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use imgu::imgu_core::{
    BufferOutcome, CallerBuffer, CompletedBuffer, ImguResult, Node, PerNode, Segment,
};
use imgu::{Imgu, ImguConfig, MockHardware};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// IMGU streaming simulator
#[derive(Parser)]
#[command(name = "imgu-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML). IMGU_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames the hardware completes before stopping
    #[arg(short, long, default_value_t = 30)]
    frames: u32,

    /// Hardware frame period in milliseconds
    #[arg(long, default_value_t = 5)]
    period_ms: u64,

    /// Buffers per node kept in circulation
    #[arg(long, default_value_t = 4)]
    buffers: u32,

    /// Suspend and resume after this frame
    #[arg(long)]
    suspend_at: Option<u32>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Default)]
struct Tally {
    done: AtomicU64,
    error: AtomicU64,
}

type Tallies = Arc<PerNode<Tally>>;

fn record(tallies: &Tallies, buffer: &CompletedBuffer) {
    let tally = &tallies[buffer.node];
    match buffer.outcome {
        BufferOutcome::Done => tally.done.fetch_add(1, Ordering::Relaxed),
        BufferOutcome::Error => tally.error.fetch_add(1, Ordering::Relaxed),
    };
}

fn scatter(node: Node, index: u32, len: usize) -> CallerBuffer {
    let base = 0x1_0000_0000 * (node.index() as u64 + 1);
    CallerBuffer::scatter(
        index,
        vec![Segment {
            phys: base + u64::from(index) * len as u64,
            len,
        }],
    )
}

/// Empty update: keeps the previous parameter set for the next frame.
fn param_blob() -> Bytes {
    Bytes::copy_from_slice(&0u32.to_le_bytes())
}

/// Hand a completed buffer of `node` back to the device. Returns whether it
/// was requeued.
///
/// Parameter blobs are never recycled; a fresh one goes with every other
/// input. Blocks on the device's submission gate.
fn recycle(imgu: &Imgu, node: Node, index: u32, recycled: u64) -> ImguResult<bool> {
    if node == Node::Params {
        return Ok(false);
    }
    if node == Node::In && recycled % 2 == 0 {
        let params = CallerBuffer::bytes(u32::try_from(recycled).unwrap_or(0), param_blob());
        if let Err(err) = imgu.queue_buffer(Node::Params, params) {
            warn!(error = %err, "failed to queue parameters");
        }
    }
    imgu.queue_buffer(node, scatter(node, index, imgu.buffer_size(node)))?;
    Ok(true)
}

/// Hand completed buffers of `node` back to the device until aborted.
fn spawn_consumer(imgu: Arc<Imgu>, node: Node, tallies: Tallies) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut recycled = 0u64;
        loop {
            let buffer = imgu.next_completed(node).await;
            record(&tallies, &buffer);
            if buffer.outcome == BufferOutcome::Error {
                continue;
            }

            // Suspend holds the gate for up to the drain timeout.
            match tokio::task::block_in_place(|| recycle(&imgu, node, buffer.index, recycled)) {
                Ok(true) => recycled += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(node = %node, index = buffer.index, error = %err, "failed to recycle buffer");
                }
            }
        }
    })
}

/// Complete one frame on every hardware queue and run the interrupt
/// handlers.
async fn hardware_frame(mock: &MockHardware, imgu: &Arc<Imgu>) -> Result<usize> {
    let completed = mock.complete_frame(true);
    let device = imgu.clone();
    tokio::task::spawn_blocking(move || device.service_interrupt())
        .await
        .context("interrupt handler panicked")?;
    Ok(completed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => ImguConfig::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ImguConfig::load().context("failed to load configuration")?,
    };

    let mock = MockHardware::with_depth(config.queues.max_depth);
    let imgu = Arc::new(Imgu::new(config, mock.hardware()).context("failed to create device")?);
    imgu.set_node_enabled(Node::Params, true)?;
    imgu.set_node_enabled(Node::Stat3a, true)?;

    for node in [Node::In, Node::Out, Node::Stat3a] {
        let len = imgu.buffer_size(node);
        for index in 0..cli.buffers {
            imgu.queue_buffer(node, scatter(node, index, len))
                .with_context(|| format!("failed to queue {node} buffer {index}"))?;
        }
    }
    imgu.queue_buffer(Node::Params, CallerBuffer::bytes(0, param_blob()))?;

    imgu.stream_on().context("failed to start streaming")?;
    info!(frames = cli.frames, period_ms = cli.period_ms, "streaming");

    let tallies: Tallies = Arc::new(PerNode::default());
    let consumers: Vec<_> = [Node::In, Node::Params, Node::Out, Node::Stat3a]
        .into_iter()
        .map(|node| spawn_consumer(imgu.clone(), node, tallies.clone()))
        .collect();

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.period_ms.max(1)));
    for frame in 1..=cli.frames {
        ticker.tick().await;
        let completed = hardware_frame(&mock, &imgu).await?;
        debug!(frame, completed, "hardware frame done");

        if cli.suspend_at == Some(frame) {
            let device = imgu.clone();
            let mut cycle = tokio::task::spawn_blocking(move || {
                device.suspend()?;
                device.resume()
            });
            // The hardware keeps running so suspend can drain its queues.
            loop {
                tokio::select! {
                    result = &mut cycle => {
                        result
                            .context("suspend task panicked")?
                            .context("suspend/resume cycle failed")?;
                        break;
                    }
                    _ = ticker.tick() => {
                        hardware_frame(&mock, &imgu).await?;
                    }
                }
            }
            info!(frame, "suspend and resume done");
        }
    }

    imgu.stream_off().context("failed to stop streaming")?;
    tokio::task::yield_now().await;
    for consumer in consumers {
        consumer.abort();
        let _ = consumer.await;
    }

    println!("\n=== {} frames ===", cli.frames);
    for (node, tally) in tallies.iter() {
        let mut done = tally.done.load(Ordering::Relaxed);
        let mut error = tally.error.load(Ordering::Relaxed);
        while let Some(buffer) = imgu.dequeue_completed(node) {
            match buffer.outcome {
                BufferOutcome::Done => done += 1,
                BufferOutcome::Error => error += 1,
            }
        }
        if done + error > 0 {
            println!("{:>8}  done {done:>6}  error {error:>6}", node.name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgu::imgu_core::{BufferState, CssQueue};
    use std::time::Instant;

    fn device(drain_timeout_ms: u64) -> (MockHardware, Arc<Imgu>) {
        let mut config = ImguConfig::default();
        config.stream.drain_timeout_ms = drain_timeout_ms;
        let mock = MockHardware::new();
        let imgu = Imgu::new(config, mock.hardware()).unwrap();
        (mock, Arc::new(imgu))
    }

    #[test]
    fn test_parameter_completions_are_not_recycled() {
        let (_mock, imgu) = device(100);
        imgu.set_node_enabled(Node::Params, true).unwrap();
        imgu.queue_buffer(Node::Params, CallerBuffer::bytes(0, param_blob()))
            .unwrap();
        let applied = imgu.dequeue_completed(Node::Params).unwrap();
        assert_eq!(applied.outcome, BufferOutcome::Done);

        assert!(!recycle(&imgu, Node::Params, applied.index, 0).unwrap());
        assert!(imgu.dequeue_completed(Node::Params).is_none());
    }

    #[test]
    fn test_input_recycle_carries_parameters() {
        let (_mock, imgu) = device(100);
        imgu.set_node_enabled(Node::Params, true).unwrap();

        assert!(recycle(&imgu, Node::In, 3, 0).unwrap());
        assert_eq!(imgu.buffer_state(Node::In, 3), Some(BufferState::New));
        let params = imgu.dequeue_completed(Node::Params).unwrap();
        assert_eq!(params.outcome, BufferOutcome::Done);

        // Odd recycles leave the previous parameter set in place.
        assert!(recycle(&imgu, Node::In, 4, 1).unwrap());
        assert!(imgu.dequeue_completed(Node::Params).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_consumer_blocked_on_suspend_does_not_stall_hardware() {
        let (mock, imgu) = device(2000);
        let len = imgu.buffer_size(Node::In);
        for index in 0..2 {
            imgu.queue_buffer(Node::In, scatter(Node::In, index, len))
                .unwrap();
        }
        imgu.stream_on().unwrap();
        mock.complete_next(CssQueue::In, true);
        imgu.service_interrupt();

        let start = Instant::now();
        let device = imgu.clone();
        let suspend = tokio::task::spawn_blocking(move || device.suspend());
        std::thread::sleep(Duration::from_millis(20));

        // The consumer's requeue waits on the gate that suspend holds, while
        // the hardware task shares the only runtime worker with it.
        let tallies: Tallies = Arc::new(PerNode::default());
        let consumer = spawn_consumer(imgu.clone(), Node::In, tallies.clone());
        let hardware = {
            let (mock, imgu) = (mock.clone(), imgu.clone());
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                mock.complete_all(true);
                hardware_frame(&mock, &imgu).await
            })
        };

        hardware.await.unwrap().unwrap();
        suspend.await.unwrap().unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");
        assert!(tallies[Node::In].done.load(Ordering::Relaxed) >= 1);
        consumer.abort();
    }
}
