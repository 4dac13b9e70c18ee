pub mod direction;
pub mod registry;

pub use direction::{aggregate_direction, lerp_angle, resultant, Direction, DirectionTracker};
pub use registry::{Track, TrackId, TrackRegistry, TrackUpdate};
