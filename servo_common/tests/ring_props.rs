//! Telemetry ring under overrun and concurrent access.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use proptest::prelude::*;
use servo_common::channel::{TelemetryRing, TelemetrySample};

fn sample(n: u64) -> TelemetrySample {
    TelemetrySample {
        timestamp_ns: n,
        position: n as i32,
        velocity: -(n as i32),
        torque: (n % 1000) as i16,
        mode: 8,
    }
}

proptest! {
    #[test]
    fn every_sample_is_read_or_counted_dropped(
        capacity in 1usize..64,
        bursts in prop::collection::vec((0u64..200, 1usize..100), 1..20),
    ) {
        let ring = TelemetryRing::new(capacity);
        let mut pushed = 0u64;
        let mut seen = 0u64;
        let mut last: Option<u64> = None;

        for (count, max) in bursts {
            for _ in 0..count {
                ring.push(sample(pushed));
                pushed += 1;
            }
            let stats = ring.drain(max, |s| {
                let n = s.timestamp_ns;
                assert!(last.is_none_or(|l| n > l));
                assert!(n < pushed);
                last = Some(n);
            });
            prop_assert!(stats.read <= max as u64);
            seen += stats.read + stats.dropped;
            prop_assert!(ring.pending() <= capacity as u64);
        }

        let rest = ring.drain(usize::MAX, |_| {});
        seen += rest.read + rest.dropped;
        prop_assert_eq!(seen, pushed);
        prop_assert_eq!(ring.published(), pushed);
    }
}

#[test]
fn concurrent_reader_never_sees_torn_or_future_samples() {
    const TOTAL: u64 = 200_000;
    let ring = Arc::new(TelemetryRing::new(64));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let ring = Arc::clone(&ring);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            for n in 0..TOTAL {
                ring.push(sample(n));
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut last: Option<u64> = None;
    let mut read = 0u64;
    let mut dropped = 0u64;
    loop {
        let finished = done.load(Ordering::Acquire);
        let stats = ring.drain(usize::MAX, |s| {
            let n = s.timestamp_ns;
            assert_eq!(s.velocity, -s.position, "torn sample {s:?}");
            assert!(last.is_none_or(|l| n > l));
            last = Some(n);
        });
        let published = ring.published();
        if let Some(n) = last {
            assert!(n < published, "sample {n} ahead of writer at {published}");
        }
        read += stats.read;
        dropped += stats.dropped;
        if finished && ring.pending() == 0 {
            break;
        }
    }
    writer.join().unwrap();

    let rest = ring.drain(usize::MAX, |_| {});
    assert_eq!(read + dropped + rest.read + rest.dropped, TOTAL);
}
