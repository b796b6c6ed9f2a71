use crate::core::service_area::ServiceAreaIndex;
use crate::domain::model::{ClusterGroup, DirectoryEntry, EntryFilter, Level, ServiceAreaUnit};
use crate::utils::error::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Projects directory entries onto per-level cluster groups.
///
/// Membership is read only from each entry's declared `service_areas`; an
/// entry that lists a county but no region does not count toward any region.
/// Output order follows the service-area table, so identical inputs always
/// produce identical output.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    index: Arc<ServiceAreaIndex>,
}

impl AggregationEngine {
    pub fn new(index: Arc<ServiceAreaIndex>) -> Self {
        Self { index }
    }

    pub fn group_by_region(&self, entries: &[DirectoryEntry], filter: EntryFilter) -> Vec<ClusterGroup> {
        let regions = self.index.units_for_level(Level::Region);
        self.group(entries, Level::Region, &regions, filter)
    }

    /// 依 county 分組；指定 region 時只保留該 region 底下的 county
    pub fn group_by_county(
        &self,
        entries: &[DirectoryEntry],
        region: Option<&str>,
        filter: EntryFilter,
    ) -> Result<Vec<ClusterGroup>> {
        let counties = match region {
            Some(slug) => {
                let region = self.index.unit_by_slug(Level::Region, slug)?;
                self.index.children_of(region)
            }
            None => self.index.units_for_level(Level::County),
        };
        Ok(self.group(entries, Level::County, &counties, filter))
    }

    pub fn group_by_city(
        &self,
        entries: &[DirectoryEntry],
        county: &str,
        filter: EntryFilter,
    ) -> Result<Vec<ClusterGroup>> {
        let county = self.index.unit_by_slug(Level::County, county)?;
        let cities = self.index.children_of(county);
        Ok(self.group(entries, Level::City, &cities, filter))
    }

    fn group(
        &self,
        entries: &[DirectoryEntry],
        level: Level,
        units: &[&ServiceAreaUnit],
        filter: EntryFilter,
    ) -> Vec<ClusterGroup> {
        let mut members: HashMap<&str, Vec<&DirectoryEntry>> = HashMap::new();
        let mut unknown: BTreeSet<&str> = BTreeSet::new();

        for entry in entries.iter().filter(|e| filter.admits(e)) {
            // 同一條目重複宣告同一個 slug 只算一次
            let mut declared = HashSet::new();
            for slug in entry.service_areas.slugs(level) {
                if !declared.insert(slug.as_str()) {
                    continue;
                }
                if self.index.unit_by_slug(level, slug).is_err() {
                    unknown.insert(slug.as_str());
                    continue;
                }
                members.entry(slug.as_str()).or_default().push(entry);
            }
        }

        if !unknown.is_empty() {
            tracing::warn!(
                "Entries declare {} slugs missing from the service-area table: {:?}",
                level,
                unknown
            );
        }

        units
            .iter()
            .filter_map(|unit| {
                let group = members.get(unit.slug.as_str())?;
                let Some(centroid) = unit.centroid else {
                    tracing::warn!(
                        "{} '{}' has {} entries but no centroid; cluster not rendered",
                        level,
                        unit.slug,
                        group.len()
                    );
                    return None;
                };
                Some(ClusterGroup {
                    level,
                    slug: unit.slug.clone(),
                    display_name: unit.display_name.clone(),
                    centroid,
                    entry_count: group.len(),
                    featured_count: group.iter().filter(|e| e.featured).count(),
                    member_entry_ids: group.iter().map(|e| e.id.clone()).collect(),
                })
            })
            .collect()
    }
}
