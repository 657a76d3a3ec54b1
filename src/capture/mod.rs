pub mod frame;
pub mod source;
pub mod synthetic;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use frame::RawImage;
pub use source::{ActorId, Blueprint, Connector, DataSource, Transform, VehicleControl};
pub use synthetic::{SyntheticConnector, SyntheticOptions, SyntheticSource};
