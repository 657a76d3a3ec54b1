//! Frame-rate statistics shared between the producer and the control loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

/// Snapshot recomputed on every frame arrival
#[derive(Debug, Clone, PartialEq)]
pub struct RateStats {
    /// 1 / inter-arrival time
    pub observed_fps: f64,
    /// Sequence gap / inter-arrival time; counts frames dropped upstream
    pub source_fps: f64,
    pub last_sequence: u64,
    pub frames: u64,
    /// First arrival, measured from stream start rather than a previous frame
    pub warmup: bool,
}

impl RateStats {
    pub fn idle() -> Self {
        Self {
            observed_fps: 0.0,
            source_fps: 0.0,
            last_sequence: 0,
            frames: 0,
            warmup: true,
        }
    }
}

/// Lock-free handle to the latest snapshot
#[derive(Clone)]
pub struct SharedStats(Arc<ArcSwap<RateStats>>);

impl SharedStats {
    pub fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(RateStats::idle())))
    }

    pub fn store(&self, stats: RateStats) {
        self.0.store(Arc::new(stats));
    }

    pub fn load(&self) -> Arc<RateStats> {
        self.0.load_full()
    }
}

impl Default for SharedStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable rate state owned by the producer
#[derive(Debug)]
pub struct RateTracker {
    last_sequence: u64,
    last_frame_at: Instant,
    frames: u64,
}

impl RateTracker {
    /// Start timing from the moment streaming began
    pub fn new(started_at: Instant) -> Self {
        Self {
            last_sequence: 0,
            last_frame_at: started_at,
            frames: 0,
        }
    }

    pub fn record(&mut self, sequence: u64, now: Instant) -> RateStats {
        let elapsed = now
            .saturating_duration_since(self.last_frame_at)
            .max(Duration::from_nanos(1))
            .as_secs_f64();
        let skipped = sequence.saturating_sub(self.last_sequence);

        let stats = RateStats {
            observed_fps: 1.0 / elapsed,
            source_fps: skipped as f64 / elapsed,
            last_sequence: sequence,
            frames: self.frames + 1,
            warmup: self.frames == 0,
        };

        self.last_sequence = sequence;
        self.last_frame_at = now;
        self.frames += 1;
        stats
    }
}

/// One line of the periodic report
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub observed_fps: f64,
    pub source_fps: f64,
    pub round_trip: Duration,
    pub warmup: bool,
}
