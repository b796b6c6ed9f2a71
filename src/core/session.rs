use crate::core::aggregation::AggregationEngine;
use crate::core::collision::{CollisionResolver, PlacedMarker};
use crate::core::resolver::{CoordinateResolver, DEFAULT_CONCURRENCY, DEFAULT_GEOCODE_TIMEOUT};
use crate::core::service_area::ServiceAreaIndex;
use crate::core::viewport::{ClusterScope, Command, ViewportController, ViewportSettings, VisibleSet};
use crate::domain::model::{
    ClusterGroup, DeepLink, DirectoryEntry, EntryFilter, Level, NavigationMemento, ResolvedPosition,
    ServiceAreaUnit, ViewportState,
};
use crate::domain::ports::{Geocoder, MapSurface, MementoStore};
use crate::utils::error::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub viewport: ViewportSettings,
    pub collision: CollisionResolver,
    pub concurrency: usize,
    pub geocode_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            viewport: ViewportSettings::default(),
            collision: CollisionResolver::default(),
            concurrency: DEFAULT_CONCURRENCY,
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
        }
    }
}

/// What is on screen for the latest settled state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Frame {
    pub epoch: u64,
    pub clusters: Vec<ClusterGroup>,
    pub markers: Vec<PlacedMarker>,
    /// Entries in scope still waiting on the geocoding tier.
    pub pending_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub clusters: usize,
    pub entries: usize,
    pub featured: usize,
}

/// Geocoding work for the entries of one settled state.
#[derive(Debug, Clone)]
pub struct ResolutionJob {
    epoch: u64,
    entries: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub epoch: u64,
    pub positions: Vec<ResolvedPosition>,
}

impl ResolutionJob {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn run<G, F>(self, resolver: &CoordinateResolver<G>, concurrency: usize, on_progress: F) -> ResolutionOutcome
    where
        G: Geocoder,
        F: FnMut(usize, usize),
    {
        let positions = resolver.resolve_batch(&self.entries, on_progress, concurrency).await;
        ResolutionOutcome {
            epoch: self.epoch,
            positions,
        }
    }
}

/// Wires the core components to a rendering surface.
///
/// Every user action goes through the [`ViewportController`]; the commands it
/// returns are executed here, clusters first, then the fast resolution tier,
/// then one camera move for the settled state. Geocoding is left as a
/// [`ResolutionJob`] the host runs when it likes (see [`MapSession::refine`]).
pub struct MapSession<G: Geocoder, S: MapSurface> {
    index: Arc<ServiceAreaIndex>,
    entries: Vec<DirectoryEntry>,
    aggregation: AggregationEngine,
    resolver: Arc<CoordinateResolver<G>>,
    collision: CollisionResolver,
    viewport: ViewportController,
    surface: S,
    concurrency: usize,
    frame: Frame,
    pending: Option<ResolutionJob>,
}

impl<G: Geocoder, S: MapSurface> MapSession<G, S> {
    pub fn new(
        index: Arc<ServiceAreaIndex>,
        entries: Vec<DirectoryEntry>,
        geocoder: G,
        surface: S,
        options: SessionOptions,
    ) -> Self {
        let resolver = CoordinateResolver::new(index.clone(), geocoder).with_timeout(options.geocode_timeout);
        Self {
            aggregation: AggregationEngine::new(index.clone()),
            viewport: ViewportController::new(index.clone(), options.viewport),
            resolver: Arc::new(resolver),
            collision: options.collision,
            concurrency: options.concurrency.max(1),
            index,
            entries,
            surface,
            frame: Frame::default(),
            pending: None,
        }
    }

    pub fn state(&self) -> &ViewportState {
        self.viewport.state()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn index(&self) -> &ServiceAreaIndex {
        &self.index
    }

    pub fn resolver(&self) -> Arc<CoordinateResolver<G>> {
        self.resolver.clone()
    }

    pub fn start(&mut self, link: &DeepLink, memento: Option<&NavigationMemento>) -> Result<()> {
        let commands = self.viewport.open(link, memento, Utc::now());
        self.dispatch(commands).map(|_| ())
    }

    /// 從宿主儲存讀取 memento 後開啟地圖
    pub async fn resume<M: MementoStore>(&mut self, link: &DeepLink, store: &M) -> Result<()> {
        let memento = match store.load().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Could not read navigation memento: {}", e);
                None
            }
        };
        self.start(link, memento.as_ref())
    }

    pub fn select_region(&mut self, slug: &str) -> Result<()> {
        let commands = self.viewport.select_region(slug);
        self.dispatch(commands).map(|_| ())
    }

    pub fn select_county(&mut self, slug: &str) -> Result<()> {
        let commands = self.viewport.select_county(slug);
        self.dispatch(commands).map(|_| ())
    }

    pub fn focus_city(&mut self, slug: &str) -> Result<()> {
        let commands = self.viewport.focus_city(slug);
        self.dispatch(commands).map(|_| ())
    }

    /// Persist where the user was, then hand back the city to navigate to.
    /// `None` means the slug was unknown and the map stays put.
    pub async fn select_city<M: MementoStore>(&mut self, slug: &str, store: &M) -> Result<Option<String>> {
        let commands = self.viewport.select_city(slug);
        let Some((city, memento)) = self.dispatch(commands)? else {
            return Ok(None);
        };
        store.save(&memento).await?;
        tracing::info!("Saved navigation memento {}/{}", memento.region, memento.county);
        Ok(Some(city))
    }

    pub fn back(&mut self) -> Result<()> {
        let commands = self.viewport.back();
        self.dispatch(commands).map(|_| ())
    }

    pub fn set_filter(&mut self, filter: EntryFilter) -> Result<()> {
        let commands = self.viewport.set_filter(filter);
        self.dispatch(commands).map(|_| ())
    }

    pub fn show_all_entries(&mut self, show: bool) -> Result<()> {
        let commands = self.viewport.show_entries(show);
        self.dispatch(commands).map(|_| ())
    }

    /// Drive the viewport to a search hit.
    pub fn jump_to(&mut self, unit: &ServiceAreaUnit) -> Result<()> {
        let commands = self.viewport.jump_to(unit);
        self.dispatch(commands).map(|_| ())
    }

    /// Forwarded by the host whenever the surface reports a new zoom level.
    pub fn on_zoom_change(&mut self, zoom: u8) {
        if let Some(command) = self.viewport.on_zoom_change(zoom) {
            self.move_camera(command);
        }
    }

    pub fn summary(&self) -> LevelSummary {
        let featured_ids: HashSet<&str> = self
            .entries
            .iter()
            .filter(|e| e.featured)
            .map(|e| e.id.as_str())
            .collect();

        let ids: HashSet<&str> = if self.frame.markers.is_empty() {
            self.frame
                .clusters
                .iter()
                .flat_map(|c| c.member_entry_ids.iter().map(String::as_str))
                .collect()
        } else {
            self.frame.markers.iter().map(|m| m.entry_id.as_str()).collect()
        };

        LevelSummary {
            clusters: self.frame.clusters.len(),
            entries: ids.len(),
            featured: ids.iter().filter(|id| featured_ids.contains(*id)).count(),
        }
    }

    /// Take the outstanding geocoding job, if any.
    pub fn pending_resolution(&mut self) -> Option<ResolutionJob> {
        self.pending.take()
    }

    /// Apply a finished job. Returns false when the view moved on in the
    /// meantime; the positions stay cached either way.
    pub fn apply_resolution(&mut self, outcome: ResolutionOutcome) -> bool {
        if !self.viewport.is_current(outcome.epoch) {
            tracing::debug!(
                "Discarding {} resolved positions from epoch {}",
                outcome.positions.len(),
                outcome.epoch
            );
            return false;
        }
        let failed = outcome.positions.iter().filter(|p| p.error).count();
        if failed > 0 {
            tracing::warn!("{} entries could not be placed on the map", failed);
        }
        self.rebuild_markers();
        self.settle(outcome.epoch);
        true
    }

    /// Run the pending job to completion and apply it.
    pub async fn refine<F>(&mut self, on_progress: F) -> bool
    where
        F: FnMut(usize, usize),
    {
        let Some(job) = self.pending.take() else {
            return false;
        };
        let resolver = self.resolver.clone();
        let outcome = job.run(&*resolver, self.concurrency, on_progress).await;
        self.apply_resolution(outcome)
    }

    fn dispatch(&mut self, commands: Vec<Command>) -> Result<Option<(String, NavigationMemento)>> {
        let mut settled = None;
        let mut departure = None;

        for command in commands {
            match command {
                Command::LoadClusters(load) => {
                    if !self.viewport.is_current(load.epoch) {
                        continue;
                    }
                    self.frame.clusters = self.load_clusters(&load.scope)?;
                    self.frame.epoch = load.epoch;
                    if !self.viewport.state().entries_visible() {
                        self.frame.markers.clear();
                        self.frame.pending_entries = 0;
                        self.pending = None;
                    }
                    settled = Some(load.epoch);
                }
                Command::ResolveEntries { epoch } => {
                    if !self.viewport.is_current(epoch) {
                        continue;
                    }
                    let unresolved = self.rebuild_markers();
                    self.pending = (!unresolved.is_empty()).then(|| ResolutionJob {
                        epoch,
                        entries: unresolved,
                    });
                    settled = Some(epoch);
                }
                Command::Navigate { city, memento } => departure = Some((city, memento)),
                camera => self.move_camera(camera),
            }
        }

        if let Some(epoch) = settled {
            self.settle(epoch);
        }
        Ok(departure)
    }

    fn load_clusters(&self, scope: &ClusterScope) -> Result<Vec<ClusterGroup>> {
        let filter = self.viewport.state().filter;
        match scope {
            ClusterScope::Regions => Ok(self.aggregation.group_by_region(&self.entries, filter)),
            ClusterScope::Counties { region } => {
                self.aggregation
                    .group_by_county(&self.entries, Some(region.as_str()), filter)
            }
            ClusterScope::Cities { county } => self.aggregation.group_by_city(&self.entries, county, filter),
        }
    }

    /// Entries whose individual markers belong to the current selection.
    fn entries_in_scope(&self) -> Vec<&DirectoryEntry> {
        let state = self.viewport.state();
        let (level, slug) = match (state.selected_county(), state.selected_region()) {
            (Some(county), _) => (Some(Level::County), county),
            (None, Some(region)) => (Some(Level::Region), region),
            (None, None) => (None, ""),
        };
        self.entries
            .iter()
            .filter(|e| state.filter.admits(e))
            .filter(|e| level.map_or(true, |l| e.service_areas.declares(l, slug)))
            .collect()
    }

    /// 以快取與快速層重建標記，回傳仍需地理編碼的條目
    fn rebuild_markers(&mut self) -> Vec<DirectoryEntry> {
        let mut positions = Vec::new();
        let mut unresolved = Vec::new();

        for entry in self.entries_in_scope() {
            match self.resolver.resolve_fast(entry) {
                Some(position) => positions.push(position),
                None if self.resolver.cached(&entry.id).is_some() => {}
                None => unresolved.push(entry.clone()),
            }
        }

        self.frame.markers = self.collision.resolve(&positions);
        self.frame.pending_entries = unresolved.len();
        tracing::debug!(
            "{} markers placed, {} awaiting geocoding",
            self.frame.markers.len(),
            unresolved.len()
        );
        unresolved
    }

    fn settle(&mut self, epoch: u64) {
        let visible = VisibleSet {
            clusters: self.frame.clusters.iter().map(|c| c.centroid).collect(),
            points: self.frame.markers.iter().map(|m| m.position).collect(),
        };
        if let Some(command) = self.viewport.settle(epoch, &visible) {
            self.move_camera(command);
        }
    }

    fn move_camera(&mut self, command: Command) {
        match command {
            Command::FitBounds { bounds, options } => self.surface.fit_bounds(bounds, options),
            Command::SetView { center, zoom } => self.surface.set_view(center, zoom),
            other => tracing::debug!("Not a camera command: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memento::FileMementoStore;
    use crate::adapters::surface::{CameraMove, HeadlessSurface};
    use crate::core::aggregation::tests::member;
    use crate::core::service_area::tests::florida;
    use crate::domain::model::LatLng;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every address resolves to the same spot downtown unless it says "Nowhere".
    struct FixedGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, address: &crate::domain::model::PostalAddress) -> Result<Option<LatLng>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if address.address_line.as_deref() == Some("Nowhere") {
                return Err(crate::utils::error::MapError::Geocode {
                    message: "service unavailable".to_string(),
                });
            }
            Ok(Some(LatLng::new(26.1500, -81.8000)))
        }
    }

    fn entries() -> Vec<DirectoryEntry> {
        let mut explicit = member("explicit", &["southwest-florida"], &["collier"], &["naples"], true);
        explicit.coordinates = Some(LatLng::new(26.1420, -81.7948));

        let mut centroid = member("centroid", &["southwest-florida"], &["collier"], &["marco-island"], false);
        centroid.address.city = Some("Marco Island".to_string());

        // nassau has no centroid, so these two need the geocoder
        let mut remote = member("remote", &["first-coast"], &["nassau"], &[], true);
        remote.address.address_line = Some("1 Main St".to_string());
        remote.address.city = Some("Fernandina Beach".to_string());

        let mut broken = member("broken", &["first-coast"], &["nassau"], &[], false);
        broken.address.address_line = Some("Nowhere".to_string());
        broken.address.city = Some("Callahan".to_string());

        vec![explicit, centroid, remote, broken]
    }

    fn session() -> MapSession<FixedGeocoder, HeadlessSurface> {
        MapSession::new(
            Arc::new(florida()),
            entries(),
            FixedGeocoder {
                calls: AtomicUsize::new(0),
            },
            HeadlessSurface::default(),
            SessionOptions::default(),
        )
    }

    #[test]
    fn test_start_shows_regions_at_default_view() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();

        assert_eq!(s.frame().clusters.len(), 1);
        assert_eq!(s.frame().clusters[0].slug, "southwest-florida");
        assert_eq!(
            s.surface().last_move(),
            Some(&CameraMove::View {
                center: LatLng::new(27.7663, -81.6868),
                zoom: 7
            })
        );
    }

    #[test]
    fn test_county_drill_down_fits_city_clusters() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        s.select_county("collier").unwrap();

        let slugs: Vec<&str> = s.frame().clusters.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["naples", "marco-island"]);
        assert!(matches!(
            s.surface().last_move(),
            Some(CameraMove::Fit { options, .. }) if options.padding == 50
        ));
    }

    #[tokio::test]
    async fn test_fast_tier_renders_before_refinement() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        s.select_county("nassau").unwrap();
        s.show_all_entries(true).unwrap();

        assert!(s.frame().markers.is_empty());
        assert_eq!(s.frame().pending_entries, 2);

        let mut progress = Vec::new();
        assert!(s.refine(|done, total| progress.push((done, total))).await);
        assert_eq!(progress, vec![(1, 2), (2, 2)]);

        let ids: Vec<&str> = s.frame().markers.iter().map(|m| m.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["remote"]);
        assert_eq!(s.resolver().failed_entries(), vec!["broken"]);
        assert!(matches!(
            s.surface().last_move(),
            Some(CameraMove::Fit { options, .. }) if options.max_zoom == Some(16)
        ));
        assert!(!s.refine(|_, _| {}).await);
    }

    #[tokio::test]
    async fn test_stale_resolution_is_discarded() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        s.select_county("nassau").unwrap();
        s.show_all_entries(true).unwrap();

        let job = s.pending_resolution().unwrap();
        s.back().unwrap();
        let before = s.frame().clone();

        let resolver = s.resolver();
        let outcome = job.run(&*resolver, 2, |_, _| {}).await;
        assert!(!s.apply_resolution(outcome));
        assert_eq!(s.frame().markers, before.markers);
        // 結果仍寫入快取
        assert!(resolver.cached("remote").is_some());
    }

    #[test]
    fn test_summary_counts_members_once() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        s.select_county("collier").unwrap();
        let summary = s.summary();
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.featured, 1);
    }

    #[test]
    fn test_jump_to_city_shows_entries() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        let epoch = s.frame().epoch;
        let hit = s.index().search("marco", 10)[0].clone();
        s.jump_to(&hit).unwrap();

        assert_eq!(s.frame().epoch, epoch + 1);
        assert_eq!(s.state().selected_county(), Some("collier"));
        assert_eq!(s.state().selected_city(), Some("marco-island"));
        assert!(s.state().show_entries);
        assert_eq!(s.frame().markers.len(), 2);
    }

    #[tokio::test]
    async fn test_select_city_saves_memento_for_return() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMementoStore::new(dir.path().join("memento.json"));

        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        s.select_county("collier").unwrap();
        let city = s.select_city("naples", &store).await.unwrap();
        assert_eq!(city.as_deref(), Some("naples"));
        assert_eq!(s.select_city("atlantis", &store).await.unwrap(), None);

        let mut returning = session();
        returning.resume(&DeepLink::default(), &store).await.unwrap();
        assert_eq!(returning.state().selected_county(), Some("collier"));
    }

    #[test]
    fn test_min_zoom_enforced_after_entry_fit() {
        let mut s = session();
        s.start(&DeepLink::default(), None).unwrap();
        s.select_county("collier").unwrap();
        s.set_filter(EntryFilter::Featured).unwrap();

        s.on_zoom_change(11);
        assert!(matches!(
            s.surface().last_move(),
            Some(CameraMove::View { zoom: 13, .. })
        ));
    }
}
