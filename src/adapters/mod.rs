// Adapters layer: concrete implementations of the domain ports (geocoding, files, map surface)

pub mod directory;
pub mod memento;
pub mod nominatim;
pub mod surface;

pub use directory::{load_directory, load_service_areas};
pub use memento::FileMementoStore;
pub use nominatim::{NominatimGeocoder, NominatimSettings};
pub use surface::{CameraMove, HeadlessSurface};
