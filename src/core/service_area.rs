use crate::domain::model::{Level, ServiceAreaUnit};
use crate::utils::error::{MapError, Result};
use crate::utils::slug::slugify;
use std::collections::HashMap;

/// Read-only lookup over the region → county → city table.
///
/// Units keep the order of the source table; every listing below returns
/// them in that order so downstream grouping stays deterministic.
#[derive(Debug, Clone, Default)]
pub struct ServiceAreaIndex {
    units: Vec<ServiceAreaUnit>,
    by_slug: HashMap<(Level, String), usize>,
    children: HashMap<(Level, String), Vec<usize>>,
}

impl ServiceAreaIndex {
    /// 建立索引並檢查 parent 參照是否有效
    pub fn new(units: Vec<ServiceAreaUnit>) -> Result<Self> {
        let mut by_slug = HashMap::new();
        for (idx, unit) in units.iter().enumerate() {
            if by_slug.insert((unit.level, unit.slug.clone()), idx).is_some() {
                return Err(MapError::DataIntegrity {
                    message: format!("duplicate {} slug '{}'", unit.level, unit.slug),
                });
            }
        }

        let mut children: HashMap<(Level, String), Vec<usize>> = HashMap::new();
        for (idx, unit) in units.iter().enumerate() {
            match (unit.level.parent(), unit.parent_slug.as_deref()) {
                (None, None) => {}
                (None, Some(parent)) => {
                    return Err(MapError::DataIntegrity {
                        message: format!("region '{}' must not have a parent ('{}')", unit.slug, parent),
                    });
                }
                (Some(parent_level), None) => {
                    return Err(MapError::DataIntegrity {
                        message: format!("{} '{}' has no parent {}", unit.level, unit.slug, parent_level),
                    });
                }
                (Some(parent_level), Some(parent)) => {
                    if !by_slug.contains_key(&(parent_level, parent.to_string())) {
                        return Err(MapError::DataIntegrity {
                            message: format!(
                                "{} '{}' references unknown {} '{}'",
                                unit.level, unit.slug, parent_level, parent
                            ),
                        });
                    }
                    children
                        .entry((parent_level, parent.to_string()))
                        .or_default()
                        .push(idx);
                }
            }
        }

        tracing::debug!("Indexed {} service-area units", units.len());
        Ok(Self {
            units,
            by_slug,
            children,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units_for_level(&self, level: Level) -> Vec<&ServiceAreaUnit> {
        self.units.iter().filter(|u| u.level == level).collect()
    }

    pub fn children_of(&self, unit: &ServiceAreaUnit) -> Vec<&ServiceAreaUnit> {
        self.children
            .get(&(unit.level, unit.slug.clone()))
            .map(|idxs| idxs.iter().map(|&i| &self.units[i]).collect())
            .unwrap_or_default()
    }

    pub fn unit_by_slug(&self, level: Level, slug: &str) -> Result<&ServiceAreaUnit> {
        self.by_slug
            .get(&(level, slug.to_string()))
            .map(|&i| &self.units[i])
            .ok_or_else(|| MapError::NotFound {
                level,
                slug: slug.to_string(),
            })
    }

    pub fn parent_of(&self, unit: &ServiceAreaUnit) -> Option<&ServiceAreaUnit> {
        let level = unit.level.parent()?;
        let slug = unit.parent_slug.as_deref()?;
        self.unit_by_slug(level, slug).ok()
    }

    /// 以城市名稱（非 slug）查找，例如條目地址上的 "St. Petersburg"
    pub fn city_by_name(&self, name: &str) -> Option<&ServiceAreaUnit> {
        let slug = slugify(name);
        if slug.is_empty() {
            return None;
        }
        self.unit_by_slug(Level::City, &slug).ok()
    }

    /// 名稱搜尋：不分大小寫的子字串比對，region 優先，其次 county、city
    pub fn search(&self, query: &str, limit: usize) -> Vec<&ServiceAreaUnit> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        [Level::Region, Level::County, Level::City]
            .into_iter()
            .flat_map(|level| self.units_for_level(level))
            .filter(|u| u.display_name.to_lowercase().contains(&needle))
            .take(limit)
            .collect()
    }
}
