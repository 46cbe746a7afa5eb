//! Fixed-capacity telemetry ring.
//!
//! One writer (the cyclic loop) and one reader (the console). The writer
//! never blocks and overwrites the oldest samples on overrun. Each slot
//! carries a sequence word using the same odd/even protocol as a seqlock:
//! odd while the slot is being written, `2 * n + 2` once sample `n` is
//! complete. The reader only consumes sample numbers below the published
//! write cursor and drops any slot whose sequence no longer matches, so a
//! lapped reader sees gaps, never torn or future samples.

use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicU8, AtomicU64, Ordering, fence,
};

/// One cyclic feedback sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySample {
    /// Time since the cyclic loop started [ns].
    pub timestamp_ns: u64,
    pub position: i32,
    pub velocity: i32,
    pub torque: i16,
    /// Mode display reported by the drive.
    pub mode: u8,
}

#[derive(Default)]
struct Slot {
    seq: AtomicU64,
    timestamp_ns: AtomicU64,
    position: AtomicI32,
    velocity: AtomicI32,
    torque: AtomicI16,
    mode: AtomicU8,
}

impl Slot {
    fn store(&self, n: u64, s: &TelemetrySample) {
        self.seq.store(2 * n + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        self.timestamp_ns.store(s.timestamp_ns, Ordering::Relaxed);
        self.position.store(s.position, Ordering::Relaxed);
        self.velocity.store(s.velocity, Ordering::Relaxed);
        self.torque.store(s.torque, Ordering::Relaxed);
        self.mode.store(s.mode, Ordering::Relaxed);
        self.seq.store(2 * n + 2, Ordering::Release);
    }

    /// Sample `n`, or `None` if the slot was overwritten meanwhile.
    fn load(&self, n: u64) -> Option<TelemetrySample> {
        let expected = 2 * n + 2;
        if self.seq.load(Ordering::Acquire) != expected {
            return None;
        }
        let sample = TelemetrySample {
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
            position: self.position.load(Ordering::Relaxed),
            velocity: self.velocity.load(Ordering::Relaxed),
            torque: self.torque.load(Ordering::Relaxed),
            mode: self.mode.load(Ordering::Relaxed),
        };
        fence(Ordering::Acquire);
        (self.seq.load(Ordering::Relaxed) == expected).then_some(sample)
    }
}

/// Outcome of one [`TelemetryRing::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainStats {
    pub read: u64,
    /// Samples lost to overrun since the previous drain.
    pub dropped: u64,
}

pub struct TelemetryRing {
    slots: Box<[Slot]>,
    /// Samples published so far.
    write: AtomicU64,
    /// Next sample number the reader wants.
    read: AtomicU64,
}

impl TelemetryRing {
    /// Allocate a ring. Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::default()).collect();
        Self {
            slots,
            write: AtomicU64::new(0),
            read: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, n: u64) -> &Slot {
        &self.slots[(n % self.slots.len() as u64) as usize]
    }

    /// Writer side. Never blocks.
    pub fn push(&self, sample: TelemetrySample) {
        let n = self.write.load(Ordering::Relaxed);
        self.slot(n).store(n, &sample);
        self.write.store(n + 1, Ordering::Release);
    }

    /// Total samples ever published.
    pub fn published(&self) -> u64 {
        self.write.load(Ordering::Acquire)
    }

    /// Samples waiting for the reader (capped at capacity).
    pub fn pending(&self) -> u64 {
        let published = self.published();
        let read = self.read.load(Ordering::Relaxed);
        published.saturating_sub(read).min(self.slots.len() as u64)
    }

    /// Reader side: hand up to `max` samples to `f`, oldest first.
    pub fn drain(&self, max: usize, mut f: impl FnMut(TelemetrySample)) -> DrainStats {
        let published = self.published();
        let capacity = self.slots.len() as u64;
        let mut next = self.read.load(Ordering::Relaxed);
        let mut stats = DrainStats::default();

        if published.saturating_sub(next) > capacity {
            let oldest = published - capacity;
            stats.dropped += oldest - next;
            next = oldest;
        }

        while next < published && stats.read < max as u64 {
            match self.slot(next).load(next) {
                Some(sample) => {
                    f(sample);
                    stats.read += 1;
                }
                None => stats.dropped += 1,
            }
            next += 1;
        }

        self.read.store(next, Ordering::Relaxed);
        stats
    }

    /// Most recent sample without moving the read cursor.
    pub fn latest(&self) -> Option<TelemetrySample> {
        let published = self.published();
        let n = published.checked_sub(1)?;
        self.slot(n).load(n)
    }
}
