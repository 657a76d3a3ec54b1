//! Built-in data source producing a moving BGRA test pattern.
//!
//! Stands in for the simulator so the whole pipeline can run locally and in
//! tests. Frame numbers can skip to mimic frames dropped upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::capture::frame::RawImage;
use crate::capture::source::{
    ActorId, Blueprint, Connector, DataSource, FrameCallback, Transform, VehicleControl,
    CAMERA_BLUEPRINT,
};
use crate::{SourceConfig, StreamError};

const VEHICLE_BLUEPRINTS: &[&str] = &["vehicle.tesla.model3", "vehicle.audi.tt"];

#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub width: u32,
    pub height: u32,
    pub interval: Duration,
    /// Every n-th frame number is skipped
    pub skip_every: Option<u64>,
    pub ping_latency: Duration,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            interval: Duration::from_millis(20),
            skip_every: None,
            ping_latency: Duration::from_millis(1),
        }
    }
}

impl SyntheticOptions {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            interval: Duration::from_millis(config.synthetic_interval_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Actor {
    blueprint: Blueprint,
    parent: Option<ActorId>,
    autopilot: bool,
    /// Cleared on destroy; stops the sensor thread
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct Counters {
    controls: AtomicU64,
    pings: AtomicU64,
    frames: AtomicU64,
}

pub struct SyntheticSource {
    options: SyntheticOptions,
    next_actor: AtomicU64,
    actors: Mutex<HashMap<ActorId, Actor>>,
    last_control: Mutex<Option<VehicleControl>>,
    counters: Arc<Counters>,
}

impl SyntheticSource {
    pub fn new(options: SyntheticOptions) -> Self {
        Self {
            options,
            next_actor: AtomicU64::new(1),
            actors: Mutex::new(HashMap::new()),
            last_control: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    fn actors(&self) -> MutexGuard<'_, HashMap<ActorId, Actor>> {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn live_actors(&self) -> usize {
        self.actors().len()
    }

    pub fn autopilot(&self, actor: ActorId) -> Option<bool> {
        self.actors().get(&actor).map(|a| a.autopilot)
    }

    pub fn parent_of(&self, actor: ActorId) -> Option<ActorId> {
        self.actors().get(&actor).and_then(|a| a.parent)
    }

    pub fn controls_applied(&self) -> u64 {
        self.counters.controls.load(Ordering::Relaxed)
    }

    pub fn last_control(&self) -> Option<VehicleControl> {
        *self
            .last_control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pings(&self) -> u64 {
        self.counters.pings.load(Ordering::Relaxed)
    }

    pub fn frames_emitted(&self) -> u64 {
        self.counters.frames.load(Ordering::Relaxed)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        for actor in self.actors().values() {
            actor.alive.store(false, Ordering::Release);
        }
    }
}

impl DataSource for SyntheticSource {
    fn blueprints(&self, filter: &str) -> Result<Vec<Blueprint>, StreamError> {
        let library = VEHICLE_BLUEPRINTS
            .iter()
            .copied()
            .chain(std::iter::once(CAMERA_BLUEPRINT));
        Ok(library
            .filter(|id| id.contains(filter))
            .map(Blueprint::new)
            .collect())
    }

    fn spawn_actor(
        &self,
        blueprint: &Blueprint,
        _transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<ActorId, StreamError> {
        let mut actors = self.actors();
        if let Some(parent) = attach_to {
            if !actors.contains_key(&parent) {
                return Err(StreamError::Source(format!(
                    "cannot attach to unknown actor {:?}",
                    parent
                )));
            }
        }

        let id = ActorId(self.next_actor.fetch_add(1, Ordering::Relaxed));
        actors.insert(
            id,
            Actor {
                blueprint: blueprint.clone(),
                parent: attach_to,
                autopilot: false,
                alive: Arc::new(AtomicBool::new(true)),
            },
        );
        debug!(?id, blueprint = %blueprint.id, "spawned synthetic actor");
        Ok(id)
    }

    fn listen(&self, sensor: ActorId, mut callback: FrameCallback) -> Result<(), StreamError> {
        let (alive, width, height) = {
            let actors = self.actors();
            let actor = actors
                .get(&sensor)
                .ok_or_else(|| StreamError::Source(format!("unknown sensor {:?}", sensor)))?;
            let dim = |key: &str, fallback: u32| {
                actor
                    .blueprint
                    .attribute(key)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(fallback)
            };
            (
                actor.alive.clone(),
                dim("image_size_x", self.options.width),
                dim("image_size_y", self.options.height),
            )
        };

        let interval = self.options.interval;
        let skip_every = self.options.skip_every;
        let counters = self.counters.clone();

        thread::Builder::new()
            .name(format!("synthetic-sensor-{}", sensor.0))
            .spawn(move || {
                let mut frame_number = 0u64;
                let mut next = Instant::now() + interval;
                while alive.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    next += interval;
                    if !alive.load(Ordering::Acquire) {
                        break;
                    }

                    frame_number += 1;
                    if skip_every.is_some_and(|n| n > 0 && frame_number % n == 0) {
                        frame_number += 1;
                    }

                    counters.frames.fetch_add(1, Ordering::Relaxed);
                    callback(RawImage {
                        frame_number,
                        width,
                        height,
                        raw_data: test_pattern(width, height, frame_number),
                    });
                }
                debug!(?sensor, "synthetic sensor stopped");
            })?;

        Ok(())
    }

    fn apply_control(&self, actor: ActorId, control: &VehicleControl) -> Result<(), StreamError> {
        if !self.actors().contains_key(&actor) {
            return Err(StreamError::Source(format!("unknown actor {:?}", actor)));
        }
        self.counters.controls.fetch_add(1, Ordering::Relaxed);
        *self
            .last_control
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(*control);
        Ok(())
    }

    fn set_autopilot(&self, actor: ActorId, enabled: bool) -> Result<(), StreamError> {
        let mut actors = self.actors();
        let actor = actors
            .get_mut(&actor)
            .ok_or_else(|| StreamError::Source(format!("unknown actor {:?}", actor)))?;
        actor.autopilot = enabled;
        Ok(())
    }

    fn ping(&self) -> Result<(), StreamError> {
        self.counters.pings.fetch_add(1, Ordering::Relaxed);
        if !self.options.ping_latency.is_zero() {
            thread::sleep(self.options.ping_latency);
        }
        Ok(())
    }

    fn destroy_actor(&self, actor: ActorId) -> Result<(), StreamError> {
        let removed = self
            .actors()
            .remove(&actor)
            .ok_or_else(|| StreamError::Source(format!("unknown actor {:?}", actor)))?;
        removed.alive.store(false, Ordering::Release);
        Ok(())
    }
}

/// Diagonal gradient scrolling one pixel per frame
pub fn test_pattern(width: u32, height: u32, frame_number: u64) -> Bytes {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    let shift = frame_number as usize;
    for y in 0..height as usize {
        for x in 0..width as usize {
            let v = ((x + y + shift) & 0xff) as u8;
            data.extend_from_slice(&[v, v.wrapping_mul(2), 255 - v, 255]);
        }
    }
    Bytes::from(data)
}

/// Hands out a new `SyntheticSource` per session
pub struct SyntheticConnector {
    options: SyntheticOptions,
    fail_first: AtomicU32,
    connects: AtomicU32,
}

impl SyntheticConnector {
    pub fn new(options: SyntheticOptions) -> Self {
        Self {
            options,
            fail_first: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    /// Refuse the next `n` connection attempts
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::Relaxed);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.connects.load(Ordering::Relaxed)
    }
}

impl Connector for SyntheticConnector {
    #[instrument(skip(self))]
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Arc<dyn DataSource>, StreamError> {
        self.connects.fetch_add(1, Ordering::Relaxed);

        let refused = self
            .fail_first
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StreamError::Connect {
                host: host.to_string(),
                port,
                reason: "connection refused".into(),
            });
        }

        info!("Connected to synthetic world at {}:{}", host, port);
        Ok(Arc::new(SyntheticSource::new(self.options.clone())))
    }
}
