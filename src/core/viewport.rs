use crate::core::service_area::ServiceAreaIndex;
use crate::domain::model::{
    Bounds, DeepLink, EntryFilter, LatLng, Level, NavigationMemento, ServiceAreaUnit, ViewLevel,
    ViewportState,
};
use crate::domain::ports::FitOptions;
use crate::utils::geo::enclosing_bounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportSettings {
    pub default_center: LatLng,
    pub default_zoom: u8,
    pub entry_padding: u32,
    pub cluster_padding: u32,
    pub entry_max_zoom: u8,
    pub entry_min_zoom: u8,
    pub memento_ttl_minutes: i64,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            default_center: LatLng::new(27.7663, -81.6868),
            default_zoom: 7,
            entry_padding: 100,
            cluster_padding: 50,
            entry_max_zoom: 16,
            entry_min_zoom: 13,
            memento_ttl_minutes: 30,
        }
    }
}

/// Which cluster set the current level displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterScope {
    Regions,
    Counties { region: String },
    Cities { county: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLoad {
    pub scope: ClusterScope,
    pub epoch: u64,
}

/// What a bounds-fit frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitScope {
    Entries,
    Cities,
    Counties,
}

impl FitScope {
    /// Smallest span in degrees a fit may cover; a lone point gets twice that.
    pub fn min_extent(self, point_count: usize) -> f64 {
        let base = match self {
            FitScope::Entries => 0.001,
            FitScope::Cities => 0.02,
            FitScope::Counties => 0.1,
        };
        if point_count <= 1 {
            base * 2.0
        } else {
            base
        }
    }
}

/// Work the controller hands to its driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    LoadClusters(ClusterLoad),
    ResolveEntries { epoch: u64 },
    FitBounds { bounds: Bounds, options: FitOptions },
    SetView { center: LatLng, zoom: u8 },
    Navigate { city: String, memento: NavigationMemento },
}

/// Positions currently on screen for the settled state.
#[derive(Debug, Clone, Default)]
pub struct VisibleSet {
    pub clusters: Vec<LatLng>,
    pub points: Vec<LatLng>,
}

/// Bounds for a point set, padded out to the scope's floor extent.
pub fn fit_bounds_for(points: &[LatLng], scope: FitScope) -> Option<Bounds> {
    let mut bounds = enclosing_bounds(points)?;
    let floor = scope.min_extent(points.len());
    let center = bounds.center();
    if bounds.lat_span() < floor {
        bounds.south_west.lat = center.lat - floor / 2.0;
        bounds.north_east.lat = center.lat + floor / 2.0;
    }
    if bounds.lng_span() < floor {
        bounds.south_west.lng = center.lng - floor / 2.0;
        bounds.north_east.lng = center.lng + floor / 2.0;
    }
    Some(bounds)
}

/// Drill-down state machine: regions → counties → cities (→ city focus).
///
/// Every transition bumps an epoch. Async work is issued with the epoch it
/// belongs to and its result is ignored once the epoch has moved on, which
/// is also what keeps a fit from landing on an intermediate state.
pub struct ViewportController {
    index: Arc<ServiceAreaIndex>,
    settings: ViewportSettings,
    state: ViewportState,
    epoch: u64,
    last_frame: Option<Command>,
    min_zoom_pending: bool,
}

impl ViewportController {
    pub fn new(index: Arc<ServiceAreaIndex>, settings: ViewportSettings) -> Self {
        Self {
            index,
            settings,
            state: ViewportState::default(),
            epoch: 0,
            last_frame: None,
            min_zoom_pending: false,
        }
    }

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn settings(&self) -> &ViewportSettings {
        &self.settings
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch
    }

    pub fn cluster_scope(&self) -> ClusterScope {
        match &self.state.active_level {
            ViewLevel::Regions => ClusterScope::Regions,
            ViewLevel::Counties { region } => ClusterScope::Counties {
                region: region.clone(),
            },
            ViewLevel::Cities { county, .. } | ViewLevel::CitiesWithFocus { county, .. } => {
                ClusterScope::Cities {
                    county: county.clone(),
                }
            }
        }
    }

    /// Initial state from a deep link, else a fresh memento, else regions.
    pub fn open(
        &mut self,
        link: &DeepLink,
        memento: Option<&NavigationMemento>,
        now: DateTime<Utc>,
    ) -> Vec<Command> {
        if !link.is_empty() {
            tracing::info!("Opening map from deep link {:?}", link);
            return self.open_link(link);
        }

        if let Some(m) = memento {
            let ttl = chrono::TimeDelta::try_minutes(self.settings.memento_ttl_minutes);
            if !ttl.is_some_and(|ttl| m.is_fresh(now, ttl)) {
                tracing::debug!("Ignoring expired navigation memento for {}", m.county);
            } else if self.county_region(&m.county).as_deref() == Some(m.region.as_str()) {
                tracing::info!("Restoring city view for {}/{}", m.region, m.county);
                return self.enter(ViewLevel::Cities {
                    region: m.region.clone(),
                    county: m.county.clone(),
                });
            } else {
                tracing::warn!("Navigation memento {}/{} does not match the service-area table", m.region, m.county);
            }
        }

        self.enter(ViewLevel::Regions)
    }

    fn open_link(&mut self, link: &DeepLink) -> Vec<Command> {
        if let Some(county) = link.county.as_deref() {
            if self.county_region(county).is_some() {
                return match link.city.as_deref() {
                    Some(city) if self.city_parents(city).map(|(_, c)| c).as_deref() == Some(county) => {
                        self.focus_city(city)
                    }
                    Some(city) => {
                        tracing::warn!("Deep-link city '{}' is not in county '{}'", city, county);
                        self.select_county(county)
                    }
                    None => self.select_county(county),
                };
            }
            tracing::warn!("Deep-link county '{}' not found, falling back", county);
        } else if let Some(city) = link.city.as_deref() {
            if self.city_parents(city).is_some() {
                return self.focus_city(city);
            }
            tracing::warn!("Deep-link city '{}' not found, falling back", city);
        }

        match link.region.as_deref() {
            Some(region) => self.select_region(region),
            None => self.enter(ViewLevel::Regions),
        }
    }

    pub fn select_region(&mut self, slug: &str) -> Vec<Command> {
        if self.index.unit_by_slug(Level::Region, slug).is_err() {
            tracing::warn!("Unknown region '{}', showing all regions", slug);
            return self.enter(ViewLevel::Regions);
        }
        self.enter(ViewLevel::Counties {
            region: slug.to_string(),
        })
    }

    pub fn select_county(&mut self, slug: &str) -> Vec<Command> {
        match self.county_region(slug) {
            Some(region) => self.enter(ViewLevel::Cities {
                region,
                county: slug.to_string(),
            }),
            None => {
                tracing::warn!("Unknown county '{}', falling back to region view", slug);
                match self.state.selected_region().map(str::to_string) {
                    Some(region) => self.enter(ViewLevel::Counties { region }),
                    None => self.enter(ViewLevel::Regions),
                }
            }
        }
    }

    /// Highlight a city while still rendering city-level clusters.
    pub fn focus_city(&mut self, slug: &str) -> Vec<Command> {
        match self.city_parents(slug) {
            Some((region, county)) => self.enter(ViewLevel::CitiesWithFocus {
                region,
                county,
                city: slug.to_string(),
            }),
            None => {
                tracing::warn!("Unknown city '{}', keeping the current view", slug);
                Vec::new()
            }
        }
    }

    /// Leave the map for the city's page. The returned memento lets the host
    /// bring the user back to this county's city view.
    pub fn select_city(&mut self, slug: &str) -> Vec<Command> {
        match self.city_parents(slug) {
            Some((region, county)) => {
                tracing::info!("Leaving map for city '{}'", slug);
                self.epoch += 1;
                vec![Command::Navigate {
                    city: slug.to_string(),
                    memento: NavigationMemento::new(region, county),
                }]
            }
            None => {
                tracing::warn!("Unknown city '{}', staying on the map", slug);
                Vec::new()
            }
        }
    }

    /// Move to a search hit in one transition. Counties and cities open with
    /// entries shown; a city is also focused.
    pub fn jump_to(&mut self, unit: &ServiceAreaUnit) -> Vec<Command> {
        match unit.level {
            Level::Region => self.select_region(&unit.slug),
            Level::County if self.county_region(&unit.slug).is_some() => {
                self.state.show_entries = true;
                self.select_county(&unit.slug)
            }
            Level::City if self.city_parents(&unit.slug).is_some() => {
                self.state.show_entries = true;
                self.focus_city(&unit.slug)
            }
            level => {
                tracing::warn!("Search hit {} '{}' not in the service-area table", level, unit.slug);
                Vec::new()
            }
        }
    }

    pub fn back(&mut self) -> Vec<Command> {
        let previous = match &self.state.active_level {
            ViewLevel::Regions => return Vec::new(),
            ViewLevel::Counties { .. } => ViewLevel::Regions,
            ViewLevel::Cities { region, .. } => ViewLevel::Counties {
                region: region.clone(),
            },
            ViewLevel::CitiesWithFocus { region, county, .. } => ViewLevel::Cities {
                region: region.clone(),
                county: county.clone(),
            },
        };
        // 每退一層都關閉個別標記
        self.state.show_entries = false;
        self.enter(previous)
    }

    pub fn set_filter(&mut self, filter: EntryFilter) -> Vec<Command> {
        if self.state.filter == filter {
            return Vec::new();
        }
        self.state.filter = filter;
        let level = self.state.active_level.clone();
        self.enter(level)
    }

    pub fn show_entries(&mut self, show: bool) -> Vec<Command> {
        if self.state.show_entries == show {
            return Vec::new();
        }
        self.state.show_entries = show;
        let level = self.state.active_level.clone();
        self.enter(level)
    }

    fn enter(&mut self, level: ViewLevel) -> Vec<Command> {
        self.epoch += 1;
        self.min_zoom_pending = false;
        tracing::debug!("Viewport -> {:?} (epoch {})", level, self.epoch);
        self.state.active_level = level;

        let mut commands = vec![Command::LoadClusters(ClusterLoad {
            scope: self.cluster_scope(),
            epoch: self.epoch,
        })];
        if self.state.entries_visible() {
            commands.push(Command::ResolveEntries { epoch: self.epoch });
        }
        commands
    }

    /// Camera command for a settled visible set, or None when the result is
    /// stale or the camera already frames it.
    pub fn settle(&mut self, epoch: u64, visible: &VisibleSet) -> Option<Command> {
        if !self.is_current(epoch) {
            tracing::debug!("Discarding stale frame for epoch {} (now {})", epoch, self.epoch);
            return None;
        }
        let frame = self.frame_for(visible)?;
        if self.last_frame.as_ref() == Some(&frame) {
            return None;
        }
        self.min_zoom_pending = matches!(
            frame,
            Command::FitBounds { options: FitOptions { max_zoom: Some(_), .. }, .. }
        );
        self.last_frame = Some(frame.clone());
        Some(frame)
    }

    fn frame_for(&self, visible: &VisibleSet) -> Option<Command> {
        // 最上層一律回到預設視角，不受篩選影響
        if self.cluster_scope() == ClusterScope::Regions {
            return Some(Command::SetView {
                center: self.settings.default_center,
                zoom: self.settings.default_zoom,
            });
        }

        if self.state.entries_visible() && !visible.points.is_empty() {
            let bounds = fit_bounds_for(&visible.points, FitScope::Entries)?;
            return Some(Command::FitBounds {
                bounds,
                options: FitOptions {
                    padding: self.settings.entry_padding,
                    max_zoom: Some(self.settings.entry_max_zoom),
                },
            });
        }

        let scope = match self.cluster_scope() {
            ClusterScope::Counties { .. } => FitScope::Counties,
            _ => FitScope::Cities,
        };
        let bounds = fit_bounds_for(&visible.clusters, scope)?;
        Some(Command::FitBounds {
            bounds,
            options: FitOptions {
                padding: self.settings.cluster_padding,
                max_zoom: None,
            },
        })
    }

    /// After an entry-level fit, pull the camera in if it stopped too far out.
    pub fn on_zoom_change(&mut self, zoom: u8) -> Option<Command> {
        if !self.min_zoom_pending {
            return None;
        }
        self.min_zoom_pending = false;
        if zoom >= self.settings.entry_min_zoom {
            return None;
        }
        match &self.last_frame {
            Some(Command::FitBounds { bounds, .. }) => Some(Command::SetView {
                center: bounds.center(),
                zoom: self.settings.entry_min_zoom,
            }),
            _ => None,
        }
    }

    fn county_region(&self, county: &str) -> Option<String> {
        let unit = self.index.unit_by_slug(Level::County, county).ok()?;
        self.index.parent_of(unit).map(|region| region.slug.clone())
    }

    fn city_parents(&self, city: &str) -> Option<(String, String)> {
        let unit = self.index.unit_by_slug(Level::City, city).ok()?;
        let county = self.index.parent_of(unit)?;
        let region = self.index.parent_of(county)?;
        Some((region.slug.clone(), county.slug.clone()))
    }
}
