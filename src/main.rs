use crossbeam_utils::{Backoff, CachePadded};
use log_buffer::utils::rate_per_sec;
use log_buffer::{Latencies, LogBuffer, LogBufferConfig, Offer, Result, mono_time_ns};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use tracing_subscriber::EnvFilter;

const PARTITION_SIZE: u32 = 16 * 1024 * 1024;
const PAYLOAD_SIZE: usize = 200;
const TRIALS: usize = 1_000_000;
const BATCH_FRAGMENTS: usize = 4;

#[derive(Clone, Copy, Debug)]
enum Mode {
    Offer,
    Claim,
    Batch,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} offer|claim|batch [producers]", program);
    std::process::exit(1);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }
    let mode = match args[1].as_str() {
        "offer" => Mode::Offer,
        "claim" => Mode::Claim,
        "batch" => Mode::Batch,
        _ => usage(&args[0]),
    };
    let producers = match args.get(2).map(|s| s.parse::<usize>()) {
        None => 1,
        Some(Ok(n)) if n > 0 => n,
        Some(_) => usage(&args[0]),
    };

    let buffer = Arc::new(LogBuffer::new(LogBufferConfig::new(PARTITION_SIZE))?);
    let done = Arc::new(AtomicBool::new(false));
    let cleaned = Arc::new(CachePadded::new(AtomicU64::new(0)));

    // stands in for the maintenance task that owns cleaning
    let cleaner = {
        let buffer = buffer.clone();
        let done = done.clone();
        let cleaned = cleaned.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let n = buffer.clean_partitions();
                if n == 0 {
                    std::hint::spin_loop();
                } else {
                    cleaned.fetch_add(n as u64, Ordering::Relaxed);
                }
            }
        })
    };

    let start = mono_time_ns();
    let handles: Vec<_> = (0..producers)
        .map(|id| {
            let buffer = buffer.clone();
            thread::spawn(move || producer(&buffer, mode, id as i32))
        })
        .collect();

    let mut latencies = Latencies::with_capacity(TRIALS * producers);
    for handle in handles {
        match handle.join() {
            Ok(result) => latencies.merge(result?),
            Err(_) => {
                eprintln!("producer thread panicked");
                std::process::exit(2);
            }
        }
    }
    let elapsed = mono_time_ns() - start;

    done.store(true, Ordering::Release);
    if cleaner.join().is_err() {
        eprintln!("cleaner thread panicked");
        std::process::exit(2);
    }

    let frames = (latencies.count() * frames_per_trial(mode)) as u64;
    if let Some(summary) = latencies.summarize() {
        summary.print_csv(&format!("{:?}x{}", mode, producers));
    }

    println!(
        "frames={} elapsed_ms={} frames_per_sec={:.0} partitions_cleaned={} active_partition_id={}",
        frames,
        elapsed / 1_000_000,
        rate_per_sec(frames, elapsed),
        cleaned.load(Ordering::Relaxed),
        buffer.active_partition_id(),
    );

    match Arc::try_unwrap(buffer) {
        Ok(buffer) => buffer.close(),
        Err(_) => Ok(()),
    }
}

fn frames_per_trial(mode: Mode) -> usize {
    match mode {
        Mode::Offer | Mode::Claim => 1,
        Mode::Batch => BATCH_FRAGMENTS,
    }
}

/// Retries on back-pressure until the cleaner or another producer catches up.
#[inline]
fn until_accepted<T>(mut offer: impl FnMut() -> Result<Offer<T>>) -> Result<T> {
    let backoff = Backoff::new();
    loop {
        match offer()? {
            Offer::Accepted(value) => return Ok(value),
            Offer::AwaitingCleaning | Offer::AwaitingRotation => backoff.snooze(),
        }
    }
}

#[inline(never)]
fn producer(buffer: &LogBuffer, mode: Mode, stream_id: i32) -> Result<Latencies> {
    let mut latencies = Latencies::with_capacity(TRIALS);
    let mut payload = [0u8; PAYLOAD_SIZE];

    for _ in 0..TRIALS {
        let ts0 = mono_time_ns();
        payload[..8].copy_from_slice(&ts0.to_le_bytes());
        match mode {
            Mode::Offer => {
                until_accepted(|| buffer.offer(&payload, stream_id))?;
            }
            Mode::Claim => {
                let mut claim = until_accepted(move || buffer.claim(PAYLOAD_SIZE, stream_id))?;
                claim.buffer_mut().copy_from_slice(&payload);
                claim.commit();
            }
            Mode::Batch => {
                let fragment = PAYLOAD_SIZE / BATCH_FRAGMENTS;
                let mut batch =
                    until_accepted(move || buffer.claim_batch(BATCH_FRAGMENTS, PAYLOAD_SIZE))?;
                for chunk in payload.chunks(fragment) {
                    batch
                        .next_fragment(chunk.len(), stream_id)?
                        .copy_from_slice(chunk);
                }
                batch.commit();
            }
        }
        let ts1 = mono_time_ns();
        latencies.record(ts1 - ts0);
    }

    Ok(latencies)
}
