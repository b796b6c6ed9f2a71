pub mod error;
pub mod geo;
pub mod logger;
pub mod slug;
pub mod validation;
