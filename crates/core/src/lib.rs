//! Foundation value types shared across the PushPulse SDK: dotted field
//! paths, geographic primitives, and ISO 8601 durations.

pub mod duration;
pub mod error;
pub mod field_path;
pub mod geo;

pub use duration::Iso8601Duration;
pub use error::{PulseError, PulseResult};
pub use field_path::FieldPath;
pub use geo::{GeoBox, GeoCircle, GeoLocation, GeoPolygon};
