use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// 服務區域層級：region → county → city
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Region,
    County,
    City,
}

impl Level {
    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Region => None,
            Level::County => Some(Level::Region),
            Level::City => Some(Level::County),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Region => "region",
            Level::County => "county",
            Level::City => "city",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAreaUnit {
    pub level: Level,
    pub slug: String,
    pub display_name: String,
    pub centroid: Option<LatLng>,
    pub parent_slug: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAreas {
    pub regions: Vec<String>,
    pub counties: Vec<String>,
    pub cities: Vec<String>,
}

impl ServiceAreas {
    pub fn slugs(&self, level: Level) -> &[String] {
        match level {
            Level::Region => &self.regions,
            Level::County => &self.counties,
            Level::City => &self.cities,
        }
    }

    pub fn declares(&self, level: Level, slug: &str) -> bool {
        self.slugs(level).iter().any(|s| s == slug)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostalAddress {
    pub address_line: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl PostalAddress {
    /// 串接非空欄位，例如 "123 Main St, Naples, FL, 34102"
    pub fn joined(&self, default_state: Option<&str>) -> String {
        let state = self
            .state
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(default_state);
        [
            self.address_line.as_deref(),
            self.city.as_deref(),
            state,
            self.zip_code.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: PostalAddress,
    #[serde(default)]
    pub coordinates: Option<LatLng>,
    #[serde(default)]
    pub service_areas: ServiceAreas,
    #[serde(default)]
    pub featured: bool,
}

impl DirectoryEntry {
    /// Google Maps / Apple Maps 導航連結
    pub fn directions_urls(&self) -> Option<(String, String)> {
        let full = self.address.joined(Some("FL"));
        if full.is_empty() {
            return None;
        }
        let mut google = url::Url::parse("https://www.google.com/maps/dir/").ok()?;
        google
            .query_pairs_mut()
            .append_pair("api", "1")
            .append_pair("destination", &full);
        let mut apple = url::Url::parse("https://maps.apple.com/").ok()?;
        apple.query_pairs_mut().append_pair("daddr", &full);
        Some((google.to_string(), apple.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Explicit,
    Centroid,
    Geocoded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPosition {
    pub entry_id: String,
    /// None only when `error` is set
    pub coords: Option<LatLng>,
    pub source_tier: SourceTier,
    pub error: bool,
}

impl ResolvedPosition {
    pub fn resolved(entry_id: impl Into<String>, coords: LatLng, source_tier: SourceTier) -> Self {
        Self {
            entry_id: entry_id.into(),
            coords: Some(coords),
            source_tier,
            error: false,
        }
    }

    pub fn failed(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            coords: None,
            source_tier: SourceTier::Geocoded,
            error: true,
        }
    }

    pub fn renderable(&self) -> Option<LatLng> {
        if self.error {
            None
        } else {
            self.coords
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub level: Level,
    pub slug: String,
    pub display_name: String,
    pub centroid: LatLng,
    pub entry_count: usize,
    pub featured_count: usize,
    pub member_entry_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryFilter {
    #[default]
    All,
    Featured,
}

impl EntryFilter {
    pub fn admits(self, entry: &DirectoryEntry) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::Featured => entry.featured,
        }
    }
}

/// 地圖目前顯示的層級與選取狀態
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "kebab-case")]
pub enum ViewLevel {
    #[default]
    Regions,
    Counties {
        region: String,
    },
    Cities {
        region: String,
        county: String,
    },
    CitiesWithFocus {
        region: String,
        county: String,
        city: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewportState {
    pub active_level: ViewLevel,
    pub filter: EntryFilter,
    pub show_entries: bool,
}

impl ViewportState {
    pub fn selected_region(&self) -> Option<&str> {
        match &self.active_level {
            ViewLevel::Regions => None,
            ViewLevel::Counties { region }
            | ViewLevel::Cities { region, .. }
            | ViewLevel::CitiesWithFocus { region, .. } => Some(region),
        }
    }

    pub fn selected_county(&self) -> Option<&str> {
        match &self.active_level {
            ViewLevel::Cities { county, .. } | ViewLevel::CitiesWithFocus { county, .. } => {
                Some(county)
            }
            _ => None,
        }
    }

    pub fn selected_city(&self) -> Option<&str> {
        match &self.active_level {
            ViewLevel::CitiesWithFocus { city, .. } => Some(city),
            _ => None,
        }
    }

    /// 個別條目標記：明確要求顯示，或套用精選篩選時
    pub fn entries_visible(&self) -> bool {
        self.show_entries || self.filter == EntryFilter::Featured
    }
}

/// 宿主應用保存的「上次瀏覽區域」，用於返回地圖時恢復 city 層級
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationMemento {
    pub region: String,
    pub county: String,
    pub saved_at: DateTime<Utc>,
}

impl NavigationMemento {
    pub fn new(region: impl Into<String>, county: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            county: county.into(),
            saved_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.saved_at) <= ttl
    }
}

/// 從網址或導航參數帶入的起始位置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLink {
    pub region: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
}

impl DeepLink {
    /// 解析 "region=...&county=...&city=..." 形式的查詢字串（可帶前置 '?'）
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let mut link = DeepLink::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "region" => link.region = Some(value),
                "county" => link.county = Some(value),
                "city" => link.city = Some(value),
                _ => {}
            }
        }
        link
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_none() && self.county.is_none() && self.city.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl Bounds {
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }

    pub fn lat_span(&self) -> f64 {
        self.north_east.lat - self.south_west.lat
    }

    pub fn lng_span(&self) -> f64 {
        self.north_east.lng - self.south_west.lng
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_link_from_query() {
        let link = DeepLink::from_query("?county=collier&city=naples&utm=x");
        assert_eq!(link.county.as_deref(), Some("collier"));
        assert_eq!(link.city.as_deref(), Some("naples"));
        assert!(link.region.is_none());

        assert!(DeepLink::from_query("county=").is_empty());
    }

    #[test]
    fn test_address_joined_uses_default_state() {
        let address = PostalAddress {
            address_line: Some(" 850 5th Ave S ".to_string()),
            city: Some("Naples".to_string()),
            state: None,
            zip_code: Some("34102".to_string()),
        };
        assert_eq!(address.joined(Some("FL")), "850 5th Ave S, Naples, FL, 34102");
        assert_eq!(address.joined(None), "850 5th Ave S, Naples, 34102");
    }

    #[test]
    fn test_directions_urls() {
        let entry = DirectoryEntry {
            id: "r1".to_string(),
            name: "Gulf Roofing".to_string(),
            address: PostalAddress {
                address_line: Some("1 Main St".to_string()),
                city: Some("Naples".to_string()),
                ..Default::default()
            },
            coordinates: None,
            service_areas: ServiceAreas::default(),
            featured: false,
        };
        let (google, apple) = entry.directions_urls().unwrap();
        assert!(google.starts_with("https://www.google.com/maps/dir/?api=1&destination="));
        assert!(google.contains("Naples"));
        assert!(apple.starts_with("https://maps.apple.com/?daddr="));
    }

    #[test]
    fn test_memento_freshness() {
        let memento = NavigationMemento::new("southwest-florida", "collier");
        let now = memento.saved_at + Duration::minutes(10);
        assert!(memento.is_fresh(now, Duration::minutes(30)));
        assert!(!memento.is_fresh(now, Duration::minutes(5)));
    }

    #[test]
    fn test_entries_visible_with_featured_filter() {
        let mut state = ViewportState::default();
        assert!(!state.entries_visible());
        state.filter = EntryFilter::Featured;
        assert!(state.entries_visible());
    }
}
