use crate::adapters::nominatim::{NominatimSettings, DEFAULT_ENDPOINT, DEFAULT_USER_AGENT};
use crate::core::collision::{CollisionResolver, MIN_SEPARATION_M, OFFSET_DISTANCE_M};
use crate::core::resolver::DEFAULT_CONCURRENCY;
use crate::core::session::SessionOptions;
use crate::core::viewport::ViewportSettings;
use crate::domain::model::LatLng;
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{MapError, Result};
use crate::utils::validation::{
    validate_coordinate, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// 一週
const MAX_MEMENTO_TTL_MINUTES: i64 = 7 * 24 * 60;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

/// Every section is optional; missing keys take the documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub data: DataConfig,
    pub geocoder: GeocoderConfig,
    pub resolver: ResolverConfig,
    pub collision: CollisionConfig,
    pub viewport: ViewportConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// CSV: level,slug,display_name,parent_slug,lat,lng
    pub service_areas: Option<String>,
    /// JSON array of directory entries
    pub directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub rate_limit_ms: u64,
    pub default_state: String,
    pub country: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: 10,
            rate_limit_ms: 1100,
            default_state: "FL".to_string(),
            country: "USA".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub min_separation_m: f64,
    pub offset_distance_m: f64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            min_separation_m: MIN_SEPARATION_M,
            offset_distance_m: OFFSET_DISTANCE_M,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// [lat, lng]
    pub default_center: [f64; 2],
    pub default_zoom: u8,
    pub entry_padding: u32,
    pub cluster_padding: u32,
    pub entry_max_zoom: u8,
    pub entry_min_zoom: u8,
    pub memento_ttl_minutes: i64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        let d = ViewportSettings::default();
        Self {
            default_center: [d.default_center.lat, d.default_center.lng],
            default_zoom: d.default_zoom,
            entry_padding: d.entry_padding,
            cluster_padding: d.cluster_padding,
            entry_max_zoom: d.entry_max_zoom,
            entry_min_zoom: d.entry_min_zoom,
            memento_ttl_minutes: d.memento_ttl_minutes,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        toml::from_str(&processed).map_err(|e| MapError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${GEOCODER_URL})；未設定的變數保留原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let name = &caps[1];
                std::env::var(name).unwrap_or_else(|_| format!("${{{}}}", name))
            })
            .into_owned()
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_url("geocoder.endpoint", &self.geocoder.endpoint)?;
        validate_non_empty_string("geocoder.user_agent", &self.geocoder.user_agent)?;
        validate_positive_number("geocoder.timeout_seconds", self.geocoder.timeout_seconds as usize, 1)?;

        if let Some(path) = &self.data.service_areas {
            validate_path("data.service_areas", path)?;
        }
        if let Some(path) = &self.data.directory {
            validate_path("data.directory", path)?;
        }

        validate_range("resolver.concurrency", self.resolver.concurrency, 1, 16)?;

        let c = &self.collision;
        validate_range("collision.min_separation_m", c.min_separation_m, f64::MIN_POSITIVE, 1_000.0)?;
        validate_range("collision.offset_distance_m", c.offset_distance_m, f64::MIN_POSITIVE, 1_000.0)?;
        if c.offset_distance_m <= c.min_separation_m {
            return Err(MapError::ConfigValidationError {
                field: "collision.offset_distance_m".to_string(),
                message: format!(
                    "must be larger than min_separation_m ({} <= {})",
                    c.offset_distance_m, c.min_separation_m
                ),
            });
        }

        let v = &self.viewport;
        validate_coordinate("viewport.default_center", v.default_center[0], v.default_center[1])?;
        validate_range("viewport.default_zoom", v.default_zoom, 1, 20)?;
        validate_range("viewport.entry_max_zoom", v.entry_max_zoom, 1, 20)?;
        validate_range("viewport.entry_min_zoom", v.entry_min_zoom, 1, v.entry_max_zoom)?;
        validate_range("viewport.memento_ttl_minutes", v.memento_ttl_minutes, 1, MAX_MEMENTO_TTL_MINUTES)?;

        Ok(())
    }

    pub fn nominatim_settings(&self) -> NominatimSettings {
        let g = &self.geocoder;
        NominatimSettings {
            endpoint: g.endpoint.clone(),
            user_agent: g.user_agent.clone(),
            timeout: Duration::from_secs(g.timeout_seconds),
            rate_limit: Duration::from_millis(g.rate_limit_ms),
            default_state: g.default_state.clone(),
            country: g.country.clone(),
        }
    }

    pub fn viewport_settings(&self) -> ViewportSettings {
        let v = &self.viewport;
        ViewportSettings {
            default_center: LatLng::new(v.default_center[0], v.default_center[1]),
            default_zoom: v.default_zoom,
            entry_padding: v.entry_padding,
            cluster_padding: v.cluster_padding,
            entry_max_zoom: v.entry_max_zoom,
            entry_min_zoom: v.entry_min_zoom,
            memento_ttl_minutes: v.memento_ttl_minutes,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            viewport: self.viewport_settings(),
            collision: CollisionResolver::new(self.collision.min_separation_m, self.collision.offset_distance_m),
            concurrency: self.resolver.concurrency,
            geocode_timeout: Duration::from_secs(self.geocoder.timeout_seconds),
        }
    }
}

impl ConfigProvider for TomlConfig {
    fn geocoder_endpoint(&self) -> &str {
        &self.geocoder.endpoint
    }

    fn concurrency(&self) -> usize {
        self.resolver.concurrency
    }

    fn service_areas_path(&self) -> Option<&str> {
        self.data.service_areas.as_deref()
    }

    fn directory_path(&self) -> Option<&str> {
        self.data.directory.as_deref()
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency(), 2);
        assert_eq!(config.viewport_settings(), ViewportSettings::default());

        let geocoder = config.nominatim_settings();
        assert_eq!(geocoder.rate_limit, Duration::from_millis(1100));
        assert_eq!(geocoder.default_state, "FL");
    }

    #[test]
    fn test_parse_sections() {
        let toml_content = r#"
[data]
service_areas = "data/service_areas.csv"
directory = "data/roofers.json"

[geocoder]
endpoint = "http://localhost:8080/search"
rate_limit_ms = 0

[resolver]
concurrency = 3

[viewport]
default_center = [26.5, -81.9]
entry_min_zoom = 12
"#;
        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.service_areas_path(), Some("data/service_areas.csv"));
        assert_eq!(config.geocoder_endpoint(), "http://localhost:8080/search");
        assert_eq!(config.geocoder.timeout_seconds, 10);
        assert_eq!(config.concurrency(), 3);
        assert_eq!(config.viewport.entry_padding, 100);

        let options = config.session_options();
        assert_eq!(options.viewport.default_center, LatLng::new(26.5, -81.9));
        assert_eq!(options.viewport.entry_min_zoom, 12);
        assert_eq!(options.concurrency, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SAM_TEST_GEOCODER_URL", "https://geo.example.com/search");

        let config = TomlConfig::from_toml_str(
            r#"
[geocoder]
endpoint = "${SAM_TEST_GEOCODER_URL}"
user_agent = "${SAM_TEST_UNSET_VARIABLE}"
"#,
        )
        .unwrap();
        assert_eq!(config.geocoder.endpoint, "https://geo.example.com/search");
        assert_eq!(config.geocoder.user_agent, "${SAM_TEST_UNSET_VARIABLE}");

        std::env::remove_var("SAM_TEST_GEOCODER_URL");
    }

    #[test]
    fn test_config_validation() {
        let bad_url = TomlConfig::from_toml_str("[geocoder]\nendpoint = \"invalid-url\"\n").unwrap();
        assert!(bad_url.validate().is_err());

        let zero_workers = TomlConfig::from_toml_str("[resolver]\nconcurrency = 0\n").unwrap();
        assert!(zero_workers.validate().is_err());

        let inverted = TomlConfig::from_toml_str(
            "[collision]\nmin_separation_m = 20.0\noffset_distance_m = 15.0\n",
        )
        .unwrap();
        assert!(matches!(
            inverted.validate(),
            Err(MapError::ConfigValidationError { .. })
        ));

        let zoom = TomlConfig::from_toml_str("[viewport]\ndefault_zoom = 25\n").unwrap();
        assert!(zoom.validate().is_err());

        assert!(TomlConfig::from_toml_str("[resolver]\nconcurrency = \"two\"\n").is_err());
    }

    #[test]
    fn test_memento_ttl_bounds() {
        let week = TomlConfig::from_toml_str("[viewport]\nmemento_ttl_minutes = 10080\n").unwrap();
        assert!(week.validate().is_ok());

        for ttl in ["0", "10081", "1000000000000000"] {
            let config =
                TomlConfig::from_toml_str(&format!("[viewport]\nmemento_ttl_minutes = {}\n", ttl)).unwrap();
            assert!(
                matches!(config.validate(), Err(MapError::InvalidConfigValueError { .. })),
                "ttl {} should be rejected",
                ttl
            );
        }
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[data]\ndirectory = \"roofers.json\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.directory_path(), Some("roofers.json"));
        assert_eq!(config.service_areas_path(), None);
    }
}
