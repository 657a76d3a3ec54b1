//! Fixed-cadence feed from the frame buffer into the encoder's stdin

use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::Sender;
use tracing::{debug, error, info, instrument, warn};

use crate::pipeline::buffer::FrameBuffer;
use crate::pipeline::shutdown::ShutdownState;
use crate::pipeline::SessionEvent;
use crate::{StreamConfig, StreamError};

/// Output cadence of the consumer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// `1 / fps - correction`, never negative
    pub period: Duration,
    /// Sleep between polls while waiting for the first frame
    pub barrier_poll: Duration,
}

impl Pacing {
    pub fn new(fps: u32, correction: Duration) -> Self {
        let frame = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        Self {
            period: frame.saturating_sub(correction),
            barrier_poll: Duration::from_millis(5),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            barrier_poll: Duration::from_millis(config.barrier_poll_ms),
            ..Self::new(config.fps, Duration::from_micros(config.correction_us))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerReport {
    pub frames_written: u64,
    /// Cycles where the write alone took longer than the period
    pub late_cycles: u64,
}

pub struct FrameConsumer {
    buffer: Arc<FrameBuffer>,
    pacing: Pacing,
    state: ShutdownState,
}

impl FrameConsumer {
    pub fn new(buffer: Arc<FrameBuffer>, pacing: Pacing, state: ShutdownState) -> Self {
        Self {
            buffer,
            pacing,
            state,
        }
    }

    /// Drain the buffer into `sink` until streaming stops or a write fails.
    ///
    /// Writes block; a slow encoder slows this loop down. Falling behind is
    /// tolerated and never made up by skipping or shortening later cycles.
    #[instrument(skip_all, fields(period = ?self.pacing.period))]
    pub fn run<W: Write>(&self, mut sink: W) -> Result<ConsumerReport, StreamError> {
        let mut report = ConsumerReport::default();

        let state = &self.state;
        if !self
            .buffer
            .wait_for_first(self.pacing.barrier_poll, || state.is_streaming())
        {
            debug!("Streaming stopped before the first frame");
            return Ok(report);
        }
        info!("First frame available, feeding encoder");

        while self.state.is_streaming() {
            let started = Instant::now();

            if let Some(frame) = self.buffer.latest() {
                sink.write_all(&frame.data)
                    .and_then(|_| sink.flush())
                    .map_err(StreamError::EncoderWrite)?;
                report.frames_written += 1;
                metrics::counter!("simstream_frames_written_total").increment(1);
            }

            match self.pacing.period.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => thread::sleep(remaining),
                _ => {
                    report.late_cycles += 1;
                    metrics::counter!("simstream_late_cycles_total").increment(1);
                }
            }
        }

        Ok(report)
    }

    /// Run on a dedicated thread; the outcome is sent on `events`
    pub fn spawn<W>(self, sink: W, events: Sender<SessionEvent>) -> std::io::Result<JoinHandle<()>>
    where
        W: Write + Send + 'static,
    {
        thread::Builder::new()
            .name("frame-consumer".into())
            .spawn(move || {
                let result = self.run(sink);
                match &result {
                    Ok(report) => info!(
                        frames = report.frames_written,
                        late = report.late_cycles,
                        "Frame consumer finished"
                    ),
                    Err(e) => {
                        error!("Frame consumer failed: {}", e);
                        // readers watching the flag stop too
                        self.state.stop();
                    }
                }
                if events.send(SessionEvent::ConsumerEnded(result)).is_err() {
                    warn!("Session ended before the consumer reported");
                }
            })
    }
}
