//! Shared helpers: a mock encoder launcher that records every write.

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use simstream::encoder::{EncoderArgs, EncoderControl, EncoderInput, EncoderLauncher};
use simstream::{Config, StreamError};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simstream=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Small, fast settings for session tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.encoder.grace_period_ms = 300;
    config.control.tick_ms = 5;
    config.supervisor.initial_backoff_ms = 20;
    config.supervisor.max_backoff_ms = 100;
    config
}

/// Writes seen by the mock encoder, with arrival times
#[derive(Clone, Default)]
pub struct Recording(Arc<Mutex<Vec<(Instant, usize)>>>);

impl Recording {
    pub fn writes(&self) -> Vec<(Instant, usize)> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.count() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

/// Stdin stand-in; fails with a broken pipe once the process is gone
pub struct RecordingSink {
    recording: Recording,
    closed: Arc<AtomicBool>,
    delay: Duration,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            closed: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
            fail_after: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire)
            || self.fail_after.is_some_and(|n| self.recording.count() >= n)
        {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.recording.0.lock().unwrap().push((Instant::now(), buf.len()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Control requests the mock processes received
#[derive(Default)]
pub struct ProcessLog {
    pub launches: AtomicU32,
    pub graceful: AtomicU32,
    pub kills: AtomicU32,
}

impl ProcessLog {
    pub fn graceful(&self) -> u32 {
        self.graceful.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }
}

pub struct MockProcess {
    exit_after: Option<Duration>,
    interrupted_at: Option<Instant>,
    killed: bool,
    closed: Arc<AtomicBool>,
    log: Arc<ProcessLog>,
}

impl EncoderControl for MockProcess {
    fn stop(&mut self, graceful: bool) -> Result<(), StreamError> {
        if graceful {
            self.log.graceful.fetch_add(1, Ordering::SeqCst);
            self.interrupted_at.get_or_insert_with(Instant::now);
        } else {
            self.log.kills.fetch_add(1, Ordering::SeqCst);
            self.killed = true;
            self.closed.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn has_exited(&mut self) -> Result<bool, StreamError> {
        let exited = self.killed
            || matches!(
                (self.interrupted_at, self.exit_after),
                (Some(at), Some(after)) if at.elapsed() >= after
            );
        if exited {
            self.closed.store(true, Ordering::Release);
        }
        Ok(exited)
    }
}

/// Launches `MockProcess`es that exit `exit_after` a graceful stop, or never
#[derive(Clone)]
pub struct MockLauncher {
    pub recording: Recording,
    pub log: Arc<ProcessLog>,
    pub exit_after: Option<Duration>,
    pub write_delay: Duration,
    pub fail_after: Option<usize>,
}

impl MockLauncher {
    pub fn new(exit_after: Option<Duration>) -> Self {
        Self {
            recording: Recording::default(),
            log: Arc::new(ProcessLog::default()),
            exit_after,
            write_delay: Duration::ZERO,
            fail_after: None,
        }
    }
}

impl EncoderLauncher for MockLauncher {
    type Process = MockProcess;

    fn launch(&self, args: &EncoderArgs) -> Result<(MockProcess, EncoderInput), StreamError> {
        assert_eq!(args.value_of("-i"), Some("-"));
        self.log.launches.fetch_add(1, Ordering::SeqCst);

        let mut sink = RecordingSink::new(self.recording.clone()).with_delay(self.write_delay);
        sink.fail_after = self.fail_after;
        let process = MockProcess {
            exit_after: self.exit_after,
            interrupted_at: None,
            killed: false,
            closed: sink.closed.clone(),
            log: self.log.clone(),
        };
        Ok((process, Box::new(sink)))
    }
}
