use crate::core::service_area::ServiceAreaIndex;
use crate::domain::model::{DirectoryEntry, LatLng, Level, ServiceAreaUnit};
use crate::utils::error::{MapError, Result};
use crate::utils::validation::validate_coordinate;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct UnitRow {
    level: Level,
    slug: String,
    display_name: String,
    parent_slug: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
}

impl UnitRow {
    fn into_unit(self, line: usize) -> Result<ServiceAreaUnit> {
        let centroid = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                validate_coordinate(&format!("line {} centroid", line), lat, lng).map_err(|e| {
                    MapError::DataIntegrity {
                        message: e.to_string(),
                    }
                })?;
                Some(LatLng::new(lat, lng))
            }
            (None, None) => None,
            _ => {
                return Err(MapError::DataIntegrity {
                    message: format!("line {}: '{}' has only one of lat/lng", line, self.slug),
                })
            }
        };

        Ok(ServiceAreaUnit {
            level: self.level,
            slug: self.slug.trim().to_string(),
            display_name: self.display_name.trim().to_string(),
            centroid,
            parent_slug: self
                .parent_slug
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

/// Parse the `level,slug,display_name,parent_slug,lat,lng` table.
pub fn parse_service_areas<R: Read>(reader: R) -> Result<ServiceAreaIndex> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut units = Vec::new();
    for (i, row) in csv.deserialize::<UnitRow>().enumerate() {
        // 標題列是第 1 行
        units.push(row?.into_unit(i + 2)?);
    }
    let missing = units.iter().filter(|u| u.centroid.is_none()).count();
    if missing > 0 {
        tracing::warn!("{} service-area units have no centroid", missing);
    }
    ServiceAreaIndex::new(units)
}

pub fn load_service_areas<P: AsRef<Path>>(path: P) -> Result<ServiceAreaIndex> {
    let file = std::fs::File::open(&path)?;
    let index = parse_service_areas(file)?;
    tracing::info!(
        "✅ Loaded {} service-area units from {}",
        index.len(),
        path.as_ref().display()
    );
    Ok(index)
}

/// Parse a JSON array of directory entries.
pub fn parse_directory(json: &str) -> Result<Vec<DirectoryEntry>> {
    let parsed: Vec<DirectoryEntry> = serde_json::from_str(json)?;
    let mut ids = HashSet::new();
    let mut entries = Vec::with_capacity(parsed.len());
    for entry in parsed {
        if entry.id.trim().is_empty() {
            return Err(MapError::DataIntegrity {
                message: format!("directory entry '{}' has an empty id", entry.name),
            });
        }
        if !ids.insert(entry.id.clone()) {
            tracing::warn!("Duplicate directory entry id '{}'; later copies are ignored", entry.id);
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

pub fn load_directory<P: AsRef<Path>>(path: P) -> Result<Vec<DirectoryEntry>> {
    let content = std::fs::read_to_string(&path)?;
    let entries = parse_directory(&content)?;
    tracing::info!(
        "✅ Loaded {} directory entries from {}",
        entries.len(),
        path.as_ref().display()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TABLE: &str = "\
level,slug,display_name,parent_slug,lat,lng
region,southwest-florida,Southwest Florida,,26.7679,-82.0173
county,collier,Collier,southwest-florida,26.1420,-81.7948
city,naples,Naples,collier,26.1420,-81.7948
city,immokalee,Immokalee,collier,,
";

    #[test]
    fn test_parse_service_areas() {
        let index = parse_service_areas(TABLE.as_bytes()).unwrap();
        assert_eq!(index.len(), 4);

        let naples = index.unit_by_slug(Level::City, "naples").unwrap();
        assert_eq!(naples.parent_slug.as_deref(), Some("collier"));
        assert_eq!(naples.centroid, Some(LatLng::new(26.1420, -81.7948)));

        let immokalee = index.unit_by_slug(Level::City, "immokalee").unwrap();
        assert_eq!(immokalee.centroid, None);

        let region = index.unit_by_slug(Level::Region, "southwest-florida").unwrap();
        assert_eq!(region.parent_slug, None);
    }

    #[test]
    fn test_rejects_half_a_centroid_and_bad_parent() {
        let half = "level,slug,display_name,parent_slug,lat,lng\nregion,r,R,,26.0,\n";
        assert!(matches!(
            parse_service_areas(half.as_bytes()),
            Err(MapError::DataIntegrity { .. })
        ));

        let orphan = "level,slug,display_name,parent_slug,lat,lng\ncity,x,X,nowhere,26.0,-81.0\n";
        assert!(parse_service_areas(orphan.as_bytes()).is_err());

        let out_of_range = "level,slug,display_name,parent_slug,lat,lng\nregion,r,R,,126.0,-81.0\n";
        assert!(parse_service_areas(out_of_range.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_level_is_csv_error() {
        let bad = "level,slug,display_name,parent_slug,lat,lng\nstate,fl,Florida,,27.0,-81.0\n";
        assert!(matches!(parse_service_areas(bad.as_bytes()), Err(MapError::CsvError(_))));
    }

    #[test]
    fn test_parse_directory_camel_case() {
        let json = r#"[
            {
                "id": "r1",
                "name": "Gulf Coast Roofing",
                "address": {"addressLine": "850 5th Ave S", "city": "Naples", "zipCode": "34102"},
                "coordinates": {"lat": 26.1334, "lng": -81.7957},
                "serviceAreas": {"regions": ["southwest-florida"], "counties": ["collier"], "cities": ["naples"]},
                "featured": true
            },
            {"id": "r2", "name": "Minimal"}
        ]"#;
        let entries = parse_directory(json).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address.zip_code.as_deref(), Some("34102"));
        assert_eq!(entries[0].service_areas.cities, vec!["naples"]);
        assert!(entries[0].featured);
        assert!(!entries[1].featured);
        assert!(entries[1].coordinates.is_none());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let json = r#"[{"id": "r1", "name": "First"}, {"id": "r1", "name": "Second"}]"#;
        let entries = parse_directory(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "First");
    }

    #[test]
    fn test_empty_id_rejected() {
        let json = r#"[{"id": " ", "name": "Nameless"}]"#;
        assert!(matches!(parse_directory(json), Err(MapError::DataIntegrity { .. })));
    }

    #[test]
    fn test_load_from_files() {
        let mut table = NamedTempFile::new().unwrap();
        table.write_all(TABLE.as_bytes()).unwrap();
        let mut directory = NamedTempFile::new().unwrap();
        directory.write_all(br#"[{"id": "r1", "name": "One"}]"#).unwrap();

        assert_eq!(load_service_areas(table.path()).unwrap().len(), 4);
        assert_eq!(load_directory(directory.path()).unwrap().len(), 1);
        assert!(load_directory("/definitely/not/here.json").is_err());
    }
}
