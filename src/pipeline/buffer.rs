//! Two-slot frame buffer between the sensor callback and the encoder feed

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use crate::capture::Frame;

/// Index value before the first publish
const EMPTY: usize = usize::MAX;

/// Double buffer holding the latest completed frame.
///
/// Single writer, single reader. The writer always fills the slot that is
/// not marked latest, then flips `latest` to it; the reader only ever
/// loads the slot `latest` points at, so it can never see a frame that is
/// still being written. Intermediate frames are overwritten, not queued.
pub struct FrameBuffer {
    slots: [ArcSwapOption<Frame>; 2],

    /// Slot holding the latest completed frame, or `EMPTY`
    latest: CachePadded<AtomicUsize>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicUsize,
    frames_read: AtomicUsize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slots: [ArcSwapOption::empty(), ArcSwapOption::empty()],
            latest: CachePadded::new(AtomicUsize::new(EMPTY)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: write into the free slot, then mark it latest
    pub fn publish(&self, frame: Frame) {
        let write = match self.latest.load(Ordering::Acquire) {
            EMPTY => 0,
            current => current ^ 1,
        };

        self.slots[write].store(Some(Arc::new(frame)));
        self.latest.store(write, Ordering::Release);
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: most recently completed frame, `None` before the first publish
    pub fn latest(&self) -> Option<Arc<Frame>> {
        match self.latest.load(Ordering::Acquire) {
            EMPTY => None,
            index => {
                let frame = self.slots[index].load_full();
                if frame.is_some() {
                    self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                }
                frame
            }
        }
    }

    pub fn has_first_frame(&self) -> bool {
        self.latest.load(Ordering::Acquire) != EMPTY
    }

    /// Startup barrier: poll until a frame is published or `keep_going` fails.
    ///
    /// Returns whether a frame is available.
    pub fn wait_for_first(&self, poll: Duration, keep_going: impl Fn() -> bool) -> bool {
        while !self.has_first_frame() {
            if !keep_going() {
                return false;
            }
            thread::sleep(poll);
        }
        true
    }

    /// (published, read)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.frames_published.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
        )
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
