use crate::domain::model::Level;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("Geocoding request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown {level} slug: {slug}")]
    NotFound { level: Level, slug: String },

    #[error("Geocoding error: {message}")]
    Geocode { message: String },

    #[error("Geocoding timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Data integrity error: {message}")]
    DataIntegrity { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl MapError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MapError::NotFound { .. } => ErrorSeverity::Low,
            MapError::ApiError(_) | MapError::Geocode { .. } | MapError::Timeout { .. } => {
                ErrorSeverity::Medium
            }
            MapError::CsvError(_)
            | MapError::SerializationError(_)
            | MapError::DataIntegrity { .. } => ErrorSeverity::High,
            MapError::IoError(_)
            | MapError::ConfigError { .. }
            | MapError::ConfigValidationError { .. }
            | MapError::InvalidConfigValueError { .. }
            | MapError::MissingConfigError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            MapError::NotFound { level, slug } => {
                format!("No {} named '{}' exists in the service-area table", level, slug)
            }
            MapError::ApiError(_) | MapError::Geocode { .. } | MapError::Timeout { .. } => {
                "The geocoding service could not be reached; some markers may be missing"
                    .to_string()
            }
            MapError::CsvError(_) | MapError::SerializationError(_) => {
                "A data file could not be parsed".to_string()
            }
            MapError::DataIntegrity { message } => format!("Inconsistent data: {}", message),
            MapError::IoError(e) => format!("File access failed: {}", e),
            MapError::ConfigError { .. }
            | MapError::ConfigValidationError { .. }
            | MapError::InvalidConfigValueError { .. }
            | MapError::MissingConfigError { .. } => format!("Invalid configuration: {}", self),
        }
    }
}

impl MapError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MapError::NotFound { .. } => "Check the slug against the service-area table",
            MapError::ApiError(_) | MapError::Timeout { .. } => {
                "Retry later or point geocoder.endpoint at a reachable service"
            }
            MapError::Geocode { .. } => "Check the entry's address fields",
            MapError::CsvError(_) => "Expected columns: level,slug,display_name,parent_slug,lat,lng",
            MapError::SerializationError(_) => "The directory must be a JSON array of entries",
            MapError::DataIntegrity { .. } => "Fix the referenced rows and reload",
            MapError::IoError(_) => "Check that the file exists and is readable",
            MapError::ConfigError { .. }
            | MapError::ConfigValidationError { .. }
            | MapError::InvalidConfigValueError { .. }
            | MapError::MissingConfigError { .. } => "Review the config file and command-line flags",
        }
    }
}

pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        let not_found = MapError::NotFound {
            level: Level::County,
            slug: "atlantis".to_string(),
        };
        assert_eq!(not_found.severity(), ErrorSeverity::Low);
        assert_eq!(not_found.to_string(), "Unknown county slug: atlantis");

        let timeout = MapError::Timeout { seconds: 10 };
        assert_eq!(timeout.severity(), ErrorSeverity::Medium);

        let missing = MapError::MissingConfigError {
            field: "data.directory".to_string(),
        };
        assert_eq!(missing.severity(), ErrorSeverity::Critical);
        assert!(missing.user_friendly_message().contains("data.directory"));
    }
}
