//! Top-level retry loop: reconnect and start a fresh session after any
//! session-level failure, with bounded exponential backoff.

use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use tracing::{error, info, warn};

use crate::capture::Connector;
use crate::encoder::EncoderLauncher;
use crate::pipeline::{DriveMode, ShutdownRequest};
use crate::session::{Session, SessionOutcome};
use crate::{Config, StreamError, SupervisorConfig};

/// Why the supervisor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Terminated,
    Interrupted,
}

impl From<ShutdownRequest> for SupervisorExit {
    fn from(request: ShutdownRequest) -> Self {
        match request {
            ShutdownRequest::Terminate => SupervisorExit::Terminated,
            ShutdownRequest::Interrupt => SupervisorExit::Interrupted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1),
            attempt: 0,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.backoff_multiplier,
        )
    }

    /// `initial * multiplier^attempt`, capped at `max`
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub struct Supervisor<C: Connector, L: EncoderLauncher> {
    connector: C,
    launcher: L,
    config: Config,
    mode: DriveMode,
    requests: Receiver<ShutdownRequest>,
    backoff: Backoff,
}

impl<C: Connector, L: EncoderLauncher> Supervisor<C, L> {
    pub fn new(connector: C, launcher: L, config: Config, requests: Receiver<ShutdownRequest>) -> Self {
        Self {
            mode: DriveMode::new(config.control.autopilot),
            backoff: Backoff::from_config(&config.supervisor),
            connector,
            launcher,
            config,
            requests,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Run sessions until a termination signal or user interrupt
    pub fn run(&mut self) -> SupervisorExit {
        let stable_after = Duration::from_millis(self.config.supervisor.stable_after_ms);

        loop {
            if let Ok(request) = self.requests.try_recv() {
                return request.into();
            }

            let started = Instant::now();
            match self.run_once() {
                Ok(SessionOutcome::Terminated) => {
                    info!("Session terminated");
                    return SupervisorExit::Terminated;
                }
                Ok(SessionOutcome::Interrupted) => return SupervisorExit::Interrupted,
                Err(e) => {
                    error!("{}", e);
                    if started.elapsed() >= stable_after {
                        self.backoff.reset();
                    }
                }
            }

            let delay = self.backoff.next_delay();
            warn!(
                attempt = self.backoff.attempts(),
                ?delay,
                "Restarting session"
            );
            match self.requests.recv_timeout(delay) {
                Ok(request) => return request.into(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(delay),
            }
        }
    }

    fn run_once(&self) -> Result<SessionOutcome, StreamError> {
        let source_config = &self.config.source;
        info!(
            "listening to server {}:{}",
            source_config.host, source_config.port
        );
        let source = self.connector.connect(
            &source_config.host,
            source_config.port,
            Duration::from_millis(source_config.timeout_ms),
        )?;

        Session::new(&self.config, &self.launcher, self.mode.clone()).run(source, &self.requests)
    }
}
