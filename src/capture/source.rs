//! Interface to the external world/data source.
//!
//! The streaming core only needs the source as an event source (the sensor
//! callback) and a command sink (vehicle control and ping). Actor spawning
//! is here so a session can set itself up from scratch after a reconnect.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::capture::frame::RawImage;
use crate::StreamError;

/// Blueprint filter used to pick the vehicle
pub const VEHICLE_FILTER: &str = "vehicle";
/// RGB camera sensor blueprint
pub const CAMERA_BLUEPRINT: &str = "sensor.camera.rgb";

/// Where the vehicle is spawned
pub const START_POSITION: Transform = Transform::at(180.0, 199.0, 40.0);
/// Camera mount relative to the vehicle
pub const CAMERA_POSITION: Transform = Transform::at(0.5, 0.0, 1.40);

pub type FrameCallback = Box<dyn FnMut(RawImage) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub location: Location,
}

impl Transform {
    pub const fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            location: Location { x, y, z },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

impl Blueprint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn set_attribute(&mut self, key: &str, value: impl ToString) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleControl {
    pub throttle: f32,
    pub steer: f32,
    pub brake: f32,
    pub hand_brake: bool,
    pub reverse: bool,
}

/// A connected world.
///
/// `listen` callbacks run on the source's own thread and must not block.
pub trait DataSource: Send + Sync {
    /// Blueprints whose id contains `filter`
    fn blueprints(&self, filter: &str) -> Result<Vec<Blueprint>, StreamError>;

    fn find_blueprint(&self, id: &str) -> Result<Blueprint, StreamError> {
        self.blueprints(id)?
            .into_iter()
            .find(|bp| bp.id == id)
            .ok_or_else(|| StreamError::BlueprintNotFound(id.to_string()))
    }

    fn spawn_actor(
        &self,
        blueprint: &Blueprint,
        transform: Transform,
        attach_to: Option<ActorId>,
    ) -> Result<ActorId, StreamError>;

    fn listen(&self, sensor: ActorId, callback: FrameCallback) -> Result<(), StreamError>;

    fn apply_control(&self, actor: ActorId, control: &VehicleControl) -> Result<(), StreamError>;

    fn set_autopilot(&self, actor: ActorId, enabled: bool) -> Result<(), StreamError>;

    /// Round-trip probe with no payload semantics
    fn ping(&self) -> Result<(), StreamError>;

    fn destroy_actor(&self, actor: ActorId) -> Result<(), StreamError>;
}

/// Opens a fresh data-source session
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Arc<dyn DataSource>, StreamError>;
}

/// Destroys spawned actors, most recent first, when dropped
pub struct ActorGuard {
    source: Arc<dyn DataSource>,
    actors: Vec<ActorId>,
}

impl ActorGuard {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            actors: Vec::new(),
        }
    }

    pub fn track(&mut self, actor: ActorId) -> ActorId {
        self.actors.push(actor);
        actor
    }
}

impl Drop for ActorGuard {
    fn drop(&mut self) {
        while let Some(actor) = self.actors.pop() {
            match self.source.destroy_actor(actor) {
                Ok(()) => debug!(?actor, "actor destroyed"),
                Err(e) => warn!(?actor, "failed to destroy actor: {}", e),
            }
        }
    }
}
