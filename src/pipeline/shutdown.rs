//! Orderly stop of the encoder on termination requests.
//!
//! Signal handlers only enqueue a `ShutdownRequest`; the grace-period wait
//! and the kill run on the coordinator's own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::Sender;
use tracing::{debug, info, warn};

use crate::encoder::EncoderControl;

/// How often the coordinator checks whether the encoder exited
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Grace period cap on user interrupt
const INTERRUPT_GRACE: Duration = Duration::from_millis(500);

/// Process-wide streaming flag. Only ever goes from true to false.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    continue_streaming: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            continue_streaming: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.continue_streaming.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.continue_streaming.store(false, Ordering::Release);
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    /// SIGTERM: stop the encoder gracefully and end the program
    Terminate,
    /// Ctrl-C: leave right away, no retry
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Another caller already ran the sequence
    AlreadyStopping,
    /// Encoder exited within the grace period
    Exited,
    /// Encoder had to be force-killed
    Killed,
}

pub struct ShutdownCoordinator {
    state: ShutdownState,
    grace_period: Duration,
    begun: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(state: ShutdownState, grace_period: Duration) -> Self {
        Self {
            state,
            grace_period,
            begun: AtomicBool::new(false),
        }
    }

    pub fn has_begun(&self) -> bool {
        self.begun.load(Ordering::Acquire)
    }

    /// Graceful stop, wait up to the grace period, then force-kill.
    ///
    /// Only the first call does anything.
    pub fn shutdown(&self, encoder: &mut dyn EncoderControl) -> ShutdownOutcome {
        self.stop_with_grace(encoder, self.grace_period)
    }

    /// Same sequence with a short grace; the caller is leaving right away
    pub fn interrupt(&self, encoder: &mut dyn EncoderControl) -> ShutdownOutcome {
        self.stop_with_grace(encoder, self.grace_period.min(INTERRUPT_GRACE))
    }

    fn stop_with_grace(
        &self,
        encoder: &mut dyn EncoderControl,
        grace_period: Duration,
    ) -> ShutdownOutcome {
        if self.begun.swap(true, Ordering::AcqRel) {
            debug!("Shutdown already in progress");
            return ShutdownOutcome::AlreadyStopping;
        }

        info!(grace = ?grace_period, "Stopping encoder");
        if let Err(e) = encoder.stop(true) {
            warn!("Graceful stop request failed: {}", e);
        }
        self.state.stop();

        let deadline = Instant::now() + grace_period;
        loop {
            match encoder.has_exited() {
                Ok(true) => {
                    info!("Encoder exited");
                    return ShutdownOutcome::Exited;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to poll encoder: {}", e),
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }

        warn!("Encoder still running after grace period, killing it");
        if let Err(e) = encoder.stop(false) {
            warn!("Force kill failed: {}", e);
        }
        ShutdownOutcome::Killed
    }
}

/// Forward SIGTERM and Ctrl-C as shutdown requests until the receiver is gone
pub async fn forward_signals(requests: Sender<ShutdownRequest>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        let request = tokio::select! {
            _ = terminate.recv() => ShutdownRequest::Terminate,
            result = tokio::signal::ctrl_c() => {
                result?;
                ShutdownRequest::Interrupt
            }
        };
        info!(?request, "Signal received");
        if requests.send_async(request).await.is_err() {
            return Ok(());
        }
    }
}
