use crate::core::service_area::ServiceAreaIndex;
use crate::domain::model::{DirectoryEntry, LatLng, Level, ResolvedPosition, SourceTier};
use crate::domain::ports::Geocoder;
use crate::utils::error::MapError;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tiered position lookup for directory entries.
///
/// Explicit coordinates and centroid lookups answer synchronously; entries
/// that need a remote geocode are batched through [`resolve_batch`] with a
/// bounded number of in-flight calls. Every answer, including a failed
/// geocode, is written once into the session cache and never recomputed.
///
/// [`resolve_batch`]: CoordinateResolver::resolve_batch
pub struct CoordinateResolver<G: Geocoder> {
    index: Arc<ServiceAreaIndex>,
    geocoder: G,
    timeout: Duration,
    cache: RwLock<HashMap<String, ResolvedPosition>>,
    geocode_calls: AtomicUsize,
}

impl<G: Geocoder> CoordinateResolver<G> {
    pub fn new(index: Arc<ServiceAreaIndex>, geocoder: G) -> Self {
        Self {
            index,
            geocoder,
            timeout: DEFAULT_GEOCODE_TIMEOUT,
            cache: RwLock::new(HashMap::new()),
            geocode_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Best instant answer: cache, explicit coordinates, city centroid,
    /// county centroid. Never touches the network.
    pub fn resolve_fast(&self, entry: &DirectoryEntry) -> Option<ResolvedPosition> {
        if let Some(cached) = self.cached(&entry.id) {
            return (!cached.error).then_some(cached);
        }

        let (coords, tier) = self.fast_lookup(entry)?;
        Some(self.remember(ResolvedPosition::resolved(&entry.id, coords, tier)))
    }

    fn fast_lookup(&self, entry: &DirectoryEntry) -> Option<(LatLng, SourceTier)> {
        if let Some(c) = entry.coordinates {
            if c.lat.is_finite() && c.lng.is_finite() && c.lat.abs() <= 90.0 && c.lng.abs() <= 180.0 {
                return Some((c, SourceTier::Explicit));
            }
            tracing::warn!("Entry {} has out-of-range stored coordinates, ignoring", entry.id);
        }

        let city = entry
            .address
            .city
            .as_deref()
            .and_then(|name| self.index.city_by_name(name));

        if let Some(centroid) = city.and_then(|c| c.centroid) {
            return Some((centroid, SourceTier::Centroid));
        }

        // 沒有城市座標時退回 county：優先使用條目宣告的第一個 county，否則用城市所屬 county
        let county_slug = entry
            .service_areas
            .counties
            .first()
            .map(String::as_str)
            .or_else(|| city.and_then(|c| c.parent_slug.as_deref()))?;

        match self.index.unit_by_slug(Level::County, county_slug) {
            Ok(county) => county.centroid.map(|c| (c, SourceTier::Centroid)),
            Err(e) => {
                tracing::warn!("Entry {}: {}", entry.id, e);
                None
            }
        }
    }

    /// Resolve every entry, geocoding the ones without a fast answer.
    ///
    /// `on_progress(completed, total)` fires after each geocode completes;
    /// `total` counts only the entries that needed the remote tier. The
    /// returned positions follow the input order, one per distinct entry id.
    pub async fn resolve_batch<F>(
        &self,
        entries: &[DirectoryEntry],
        mut on_progress: F,
        concurrency: usize,
    ) -> Vec<ResolvedPosition>
    where
        F: FnMut(usize, usize),
    {
        let mut seen = HashSet::new();
        let distinct: Vec<&DirectoryEntry> = entries.iter().filter(|e| seen.insert(e.id.as_str())).collect();

        let pending: Vec<&DirectoryEntry> = distinct
            .iter()
            .copied()
            .filter(|e| self.cached(&e.id).is_none() && self.resolve_fast(e).is_none())
            .collect();

        let total = pending.len();
        if total > 0 {
            tracing::info!(
                "Geocoding {} of {} entries ({} in flight max)",
                total,
                distinct.len(),
                concurrency.max(1)
            );

            let mut completions = stream::iter(pending)
                .map(|entry| async move { self.geocode_entry(entry).await })
                .buffer_unordered(concurrency.max(1));

            let mut completed = 0;
            while let Some(position) = completions.next().await {
                self.remember(position);
                completed += 1;
                on_progress(completed, total);
            }
        }

        distinct
            .iter()
            .filter_map(|e| self.cached(&e.id))
            .collect()
    }

    async fn geocode_entry(&self, entry: &DirectoryEntry) -> ResolvedPosition {
        let has_locator = [entry.address.address_line.as_deref(), entry.address.city.as_deref()]
            .into_iter()
            .flatten()
            .any(|s| !s.trim().is_empty());
        if !has_locator {
            tracing::warn!("Entry {} has no address or city to geocode", entry.id);
            return ResolvedPosition::failed(&entry.id);
        }

        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Geocoding entry {}", entry.id);

        match tokio::time::timeout(self.timeout, self.geocoder.geocode(&entry.address)).await {
            Ok(Ok(Some(coords))) => ResolvedPosition::resolved(&entry.id, coords, SourceTier::Geocoded),
            Ok(Ok(None)) => {
                tracing::warn!("No geocoding match for entry {}", entry.id);
                ResolvedPosition::failed(&entry.id)
            }
            Ok(Err(e)) => {
                tracing::warn!("Geocoding failed for entry {}: {}", entry.id, e);
                ResolvedPosition::failed(&entry.id)
            }
            Err(_) => {
                let e = MapError::Timeout {
                    seconds: self.timeout.as_secs(),
                };
                tracing::warn!("Geocoding failed for entry {}: {}", entry.id, e);
                ResolvedPosition::failed(&entry.id)
            }
        }
    }

    /// 寫入快取；同一條目只接受第一次寫入
    fn remember(&self, position: ResolvedPosition) -> ResolvedPosition {
        self.write_cache()
            .entry(position.entry_id.clone())
            .or_insert(position)
            .clone()
    }

    pub fn cached(&self, entry_id: &str) -> Option<ResolvedPosition> {
        self.read_cache().get(entry_id).cloned()
    }

    pub fn geocode_calls(&self) -> usize {
        self.geocode_calls.load(Ordering::SeqCst)
    }

    pub fn failed_entries(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .read_cache()
            .values()
            .filter(|p| p.error)
            .map(|p| p.entry_id.clone())
            .collect();
        failed.sort();
        failed
    }

    /// 移除失敗紀錄，讓宿主的重試策略可以只針對失敗條目重新查詢
    pub fn clear_failures(&self) -> usize {
        let mut cache = self.write_cache();
        let before = cache.len();
        cache.retain(|_, p| !p.error);
        before - cache.len()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<String, ResolvedPosition>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<String, ResolvedPosition>> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
