//! Run command implementation.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use weir::{
    BufferedChannel, ChannelOptions, DataMessage, MessageChannel, StatsSnapshot, Transferable,
};

use crate::OutputFormat;

type Payload = Vec<u8>;

/// Parameters for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub count: u64,
    pub capacity: usize,
    pub payload_size: usize,
    pub timeout_ms: u64,
    pub fail_every: u64,
    pub delay_every: u64,
    pub delay_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    messages: u64,
    succeeded: u64,
    failed: u64,
    /// Payload buffers whose ownership moved to the worker.
    transferred: u64,
    elapsed_ms: f64,
    messages_per_sec: f64,
    main: StatsSnapshot,
    worker: StatsSnapshot,
}

pub async fn run(config: RunConfig, format: OutputFormat) -> Result<()> {
    let report = execute(&config).await?;

    match format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

/// Drive `config.count` messages from a coordinator to a worker.
pub async fn execute(config: &RunConfig) -> Result<RunReport> {
    let capacity = config.capacity.max(1);
    let (main_port, worker_port) = MessageChannel::new().into_ports();
    let main = BufferedChannel::<Payload>::new(main_port, capacity, ChannelOptions::named("main"));
    let worker =
        BufferedChannel::<Payload>::new(worker_port, capacity, ChannelOptions::named("worker"));

    let responder = tokio::spawn(respond(worker.clone(), config.clone()));

    let timeout = Duration::from_millis(config.timeout_ms);
    let payload = vec![0u8; config.payload_size];
    let start = Instant::now();

    // At most `capacity` sends are polled at once; the channel enforces the same bound.
    let (succeeded, failed, transferred) = futures::stream::iter(0..config.count)
        .map(|_| {
            let message = DataMessage::new(weir::generate_message_id(), payload.clone());
            let buffer = Transferable::new();
            let send = main.send_data(message, vec![buffer.clone()], Some(timeout));
            async move { (send.await, buffer.is_detached()) }
        })
        .buffer_unordered(capacity)
        .fold(
            (0u64, 0u64, 0u64),
            |(ok, failed, transferred), (result, detached)| async move {
                let transferred = transferred + u64::from(detached);
                match result {
                    Ok(()) => (ok + 1, failed, transferred),
                    Err(err) => {
                        tracing::debug!(error = %err, "Send failed");
                        (ok, failed + 1, transferred)
                    }
                }
            },
        )
        .await;

    let elapsed = start.elapsed();
    main.close();
    responder.await.context("worker task panicked")?;

    let secs = elapsed.as_secs_f64();
    Ok(RunReport {
        messages: config.count,
        succeeded,
        failed,
        transferred,
        elapsed_ms: secs * 1000.0,
        messages_per_sec: if secs > 0.0 {
            config.count as f64 / secs
        } else {
            0.0
        },
        main: main.stats().snapshot(),
        worker: worker.stats().snapshot(),
    })
}

/// Acknowledge every inbound message until the channel closes.
async fn respond(worker: BufferedChannel<Payload>, config: RunConfig) {
    let delay = Duration::from_millis(config.delay_ms);
    let (delay_every, fail_every) = (config.delay_every, config.fail_every);
    let every = |n: u64, period: u64| period > 0 && n % period == 0;

    worker
        .receive()
        .zip(futures::stream::iter(1u64..))
        .for_each_concurrent(None, |(msg, n)| {
            let worker = worker.clone();
            async move {
                if every(n, delay_every) {
                    tokio::time::sleep(delay).await;
                }
                let result = if every(n, fail_every) {
                    worker
                        .nack(msg.id, format!("simulated failure on message {n}"))
                        .await
                } else {
                    worker
                        .ack(msg.id, json!({ "received": msg.data.len() }))
                        .await
                };
                if let Err(err) = result {
                    tracing::warn!(error = %err, "Failed to acknowledge message");
                }
            }
        })
        .await;
}

fn print_text(report: &RunReport) {
    println!(
        "Sent {} messages in {:.1} ms ({:.0} msg/s)",
        report.messages, report.elapsed_ms, report.messages_per_sec
    );
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed: {}", report.failed);
    println!("  Buffers transferred: {}", report.transferred);
    for (name, stats) in [("main", &report.main), ("worker", &report.worker)] {
        println!("{name}:");
        println!("  Sent messages: {}", stats.sent_messages);
        println!("  Received acks: {}", stats.received_acks);
        match stats.average_latency_ms {
            Some(avg) => println!("  Average latency: {avg:.3} ms"),
            None => println!("  Average latency: n/a"),
        }
        println!("  Errors: {}", stats.errors);
    }
}
