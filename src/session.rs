//! One streaming session: actors, encoder, producer, consumer, control loop.
//!
//! Everything a session creates is torn down before `run` returns; a retry
//! always starts from a fresh session.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, info_span, instrument, warn};

use crate::capture::source::{
    ActorGuard, ActorId, DataSource, CAMERA_BLUEPRINT, CAMERA_POSITION, START_POSITION,
    VEHICLE_FILTER,
};
use crate::encoder::{EncoderArgs, EncoderControl, EncoderLauncher};
use crate::pipeline::{
    ControlLoop, DriveMode, FrameBuffer, FrameConsumer, FrameProducer, Pacing, SessionEvent,
    SharedStats, ShutdownCoordinator, ShutdownRequest, ShutdownState,
};
use crate::{Config, StreamError};

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Termination signal handled; the program should exit
    Terminated,
    /// User interrupt; exit without retrying
    Interrupted,
}

impl From<ShutdownRequest> for SessionOutcome {
    fn from(request: ShutdownRequest) -> Self {
        match request {
            ShutdownRequest::Terminate => SessionOutcome::Terminated,
            ShutdownRequest::Interrupt => SessionOutcome::Interrupted,
        }
    }
}

pub struct Session<'a, L: EncoderLauncher> {
    config: &'a Config,
    launcher: &'a L,
    mode: DriveMode,
}

impl<'a, L: EncoderLauncher> Session<'a, L> {
    pub fn new(config: &'a Config, launcher: &'a L, mode: DriveMode) -> Self {
        Self {
            config,
            launcher,
            mode,
        }
    }

    /// Run until a shutdown request or a fatal error
    #[instrument(skip_all)]
    pub fn run(
        &self,
        source: Arc<dyn DataSource>,
        requests: &Receiver<ShutdownRequest>,
    ) -> Result<SessionOutcome, StreamError> {
        let source_config = &self.config.source;
        let mut actors = ActorGuard::new(source.clone());
        let (vehicle, camera) = self.spawn_actors(source.as_ref(), &mut actors)?;

        let args = EncoderArgs::ffmpeg(
            &self.config.encoder,
            source_config.width,
            source_config.height,
            source_config.format,
            self.config.stream.fps,
            Utc::now(),
        );
        let (process, input) = self.launcher.launch(&args)?;
        let encoder = Arc::new(Mutex::new(process));

        let buffer = Arc::new(FrameBuffer::new());
        let stats = SharedStats::new();
        let state = ShutdownState::new();
        let coordinator = Arc::new(ShutdownCoordinator::new(
            state.clone(),
            self.config.grace_period(),
        ));
        let (events_tx, events_rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::bounded::<()>(1);

        let coordinator_thread = spawn_coordinator(
            coordinator.clone(),
            encoder.clone(),
            requests.clone(),
            done_rx,
            events_tx.clone(),
        )?;

        let mut consumer_thread = None;
        let result = (|| -> Result<SessionOutcome, StreamError> {
            let producer = FrameProducer::new(
                buffer.clone(),
                stats.clone(),
                source_config.width,
                source_config.height,
                source_config.format,
                Instant::now(),
            );
            source.listen(camera, producer.into_callback(events_tx.clone()))?;

            let consumer = FrameConsumer::new(
                buffer.clone(),
                Pacing::from_config(&self.config.stream),
                state.clone(),
            );
            consumer_thread = Some(consumer.spawn(input, events_tx.clone())?);

            let control = ControlLoop::new(
                source.clone(),
                vehicle,
                self.mode.clone(),
                stats.clone(),
                &self.config.control,
            );
            self.drive(control, &events_rx)
        })();

        // teardown
        state.stop();
        drop(done_tx);
        let handled = coordinator_thread.join().unwrap_or_else(|_| {
            warn!("Shutdown coordinator panicked");
            None
        });
        {
            let mut encoder = encoder.lock().unwrap_or_else(PoisonError::into_inner);
            coordinator.shutdown(&mut *encoder);
        }
        if let Some(handle) = consumer_thread {
            if handle.join().is_err() {
                warn!("Frame consumer panicked");
            }
        }
        let (published, read) = buffer.stats();
        debug!(published, read, "Session buffer totals");
        drop(actors);

        match (result, handled) {
            (Ok(outcome), _) => Ok(outcome),
            // a shutdown request raced with the failure; honour the request
            (Err(e), Some(request)) => {
                debug!("Session error during shutdown: {}", e);
                Ok(request.into())
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Vehicle at the start position with the camera attached to it
    fn spawn_actors(
        &self,
        source: &dyn DataSource,
        actors: &mut ActorGuard,
    ) -> Result<(ActorId, ActorId), StreamError> {
        let blueprint = source
            .blueprints(VEHICLE_FILTER)?
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::BlueprintNotFound(VEHICLE_FILTER.into()))?;
        let vehicle = actors.track(source.spawn_actor(&blueprint, START_POSITION, None)?);
        source.set_autopilot(vehicle, self.mode.autopilot())?;
        info!(?vehicle, blueprint = %blueprint.id, "Vehicle spawned");

        let mut camera_blueprint = source.find_blueprint(CAMERA_BLUEPRINT)?;
        camera_blueprint.set_attribute("image_size_x", self.config.source.width);
        camera_blueprint.set_attribute("image_size_y", self.config.source.height);
        let camera =
            actors.track(source.spawn_actor(&camera_blueprint, CAMERA_POSITION, Some(vehicle))?);
        info!(?camera, "Camera attached");

        Ok((vehicle, camera))
    }

    /// Control loop on the calling thread, reacting to session events
    fn drive(
        &self,
        mut control: ControlLoop,
        events: &Receiver<SessionEvent>,
    ) -> Result<SessionOutcome, StreamError> {
        let tick = Duration::from_millis(self.config.control.tick_ms);
        let _span = info_span!("control").entered();

        loop {
            match events.recv_timeout(tick) {
                Ok(SessionEvent::ShutdownComplete(request, outcome)) => {
                    info!(?request, ?outcome, "Shutdown complete");
                    return Ok(request.into());
                }
                Ok(SessionEvent::ProducerFailed(e)) => return Err(e),
                Ok(SessionEvent::ConsumerEnded(Err(e))) => return Err(e),
                Ok(SessionEvent::ConsumerEnded(Ok(report))) => {
                    debug!(frames = report.frames_written, "Consumer ended");
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(StreamError::Source("session event channel closed".into()));
                }
            }

            control.tick(Instant::now())?;
        }
    }
}

/// Wait for a shutdown request, or for the session to end first.
///
/// Returns the request it handled, if any.
fn spawn_coordinator<P: EncoderControl + 'static>(
    coordinator: Arc<ShutdownCoordinator>,
    encoder: Arc<Mutex<P>>,
    requests: Receiver<ShutdownRequest>,
    done: Receiver<()>,
    events: Sender<SessionEvent>,
) -> std::io::Result<JoinHandle<Option<ShutdownRequest>>> {
    thread::Builder::new()
        .name("shutdown-coordinator".into())
        .spawn(move || {
            let request = flume::Selector::new()
                .recv(&requests, |request| request.ok())
                .recv(&done, |_| None)
                .wait()?;

            let outcome = {
                let mut encoder = encoder.lock().unwrap_or_else(PoisonError::into_inner);
                match request {
                    ShutdownRequest::Terminate => coordinator.shutdown(&mut *encoder),
                    ShutdownRequest::Interrupt => coordinator.interrupt(&mut *encoder),
                }
            };
            let _ = events.send(SessionEvent::ShutdownComplete(request, outcome));
            Some(request)
        })
}
