pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{FileMementoStore, HeadlessSurface, NominatimGeocoder};
pub use config::TomlConfig;
pub use core::{
    AggregationEngine, CollisionResolver, CoordinateResolver, MapSession, ServiceAreaIndex,
    ViewportController,
};
pub use utils::error::{MapError, Result};
