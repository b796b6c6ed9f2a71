pub mod aggregation;
pub mod collision;
pub mod resolver;
pub mod service_area;
pub mod session;
pub mod viewport;

pub use crate::domain::ports::{ConfigProvider, Geocoder, MapSurface, MementoStore};
pub use crate::utils::error::Result;
pub use aggregation::AggregationEngine;
pub use collision::{CollisionResolver, PlacedMarker};
pub use resolver::CoordinateResolver;
pub use service_area::ServiceAreaIndex;
pub use session::{Frame, LevelSummary, MapSession, ResolutionJob, ResolutionOutcome, SessionOptions};
pub use viewport::{Command, ViewportController, ViewportSettings};
