//! Sensor callback side: validate, time and publish each frame

use std::sync::Arc;
use std::time::Instant;

use flume::Sender;
use tracing::{error, trace};

use crate::capture::frame::{FrameMetadata, PixelFormat, RawImage};
use crate::capture::source::FrameCallback;
use crate::capture::Frame;
use crate::pipeline::buffer::FrameBuffer;
use crate::pipeline::stats::{RateTracker, SharedStats};
use crate::pipeline::SessionEvent;
use crate::StreamError;

/// Runs on the data source's callback thread. Never blocks, never sleeps.
pub struct FrameProducer {
    buffer: Arc<FrameBuffer>,
    stats: SharedStats,
    tracker: RateTracker,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FrameProducer {
    pub fn new(
        buffer: Arc<FrameBuffer>,
        stats: SharedStats,
        width: u32,
        height: u32,
        format: PixelFormat,
        started_at: Instant,
    ) -> Self {
        Self {
            buffer,
            stats,
            tracker: RateTracker::new(started_at),
            width,
            height,
            format,
        }
    }

    pub fn on_frame(&mut self, image: RawImage) -> Result<(), StreamError> {
        self.on_frame_at(image, Instant::now())
    }

    /// Same as `on_frame` with an explicit arrival time
    pub fn on_frame_at(&mut self, image: RawImage, now: Instant) -> Result<(), StreamError> {
        let expected = Frame::expected_len(self.width, self.height, self.format);
        if image.raw_data.len() != expected {
            return Err(StreamError::MalformedFrame {
                sequence: image.frame_number,
                expected,
                actual: image.raw_data.len(),
            });
        }

        let stats = self.tracker.record(image.frame_number, now);
        trace!(
            sequence = image.frame_number,
            observed_fps = stats.observed_fps,
            source_fps = stats.source_fps,
            "frame arrived"
        );
        metrics::counter!("simstream_frames_published_total").increment(1);
        self.stats.store(stats);

        self.buffer.publish(Frame::new(
            image.raw_data,
            FrameMetadata {
                sequence: image.frame_number,
                width: self.width,
                height: self.height,
                format: self.format,
            },
            now,
        ));
        Ok(())
    }

    /// Adapt into a data-source callback.
    ///
    /// The first error is reported on `events`; later frames are ignored.
    pub fn into_callback(mut self, events: Sender<SessionEvent>) -> FrameCallback {
        let mut failed = false;
        Box::new(move |image| {
            if failed {
                return;
            }
            if let Err(e) = self.on_frame(image) {
                error!("Producer stopped: {}", e);
                failed = true;
                let _ = events.send(SessionEvent::ProducerFailed(e));
            }
        })
    }
}
