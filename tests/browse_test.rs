use anyhow::Result;
use chrono::{Duration, Utc};
use service_area_map::adapters::{load_directory, load_service_areas};
use service_area_map::core::{ConfigProvider, MapSession, MementoStore};
use service_area_map::domain::model::{DeepLink, NavigationMemento, ViewLevel};
use service_area_map::{FileMementoStore, HeadlessSurface, NominatimGeocoder, TomlConfig};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SERVICE_AREAS: &str = "\
level,slug,display_name,parent_slug,lat,lng
region,sun-coast,Sun Coast,,27.9506,-82.4572
county,pinellas,Pinellas,sun-coast,27.8764,-82.7779
county,hillsborough,Hillsborough,sun-coast,27.9904,-82.3018
city,clearwater,Clearwater,pinellas,27.9659,-82.8001
city,st-petersburg,St. Petersburg,pinellas,27.7676,-82.6403
city,tampa,Tampa,hillsborough,27.9506,-82.4572
";

const DIRECTORY: &str = r#"[
    {"id": "c1", "name": "Clearwater Roofing", "featured": true,
     "coordinates": {"lat": 27.9659, "lng": -82.8001},
     "serviceAreas": {"regions": ["sun-coast"], "counties": ["pinellas"], "cities": ["clearwater", "st-petersburg"]}},
    {"id": "t1", "name": "Tampa Bay Roofs",
     "coordinates": {"lat": 27.9506, "lng": -82.4572},
     "serviceAreas": {"regions": ["sun-coast"], "counties": ["hillsborough"], "cities": ["tampa"]}}
]"#;

fn write_fixtures(dir: &Path) -> Result<TomlConfig> {
    let areas = dir.join("service_areas.csv");
    let directory = dir.join("roofers.json");
    std::fs::write(&areas, SERVICE_AREAS)?;
    std::fs::write(&directory, DIRECTORY)?;

    let config_path = dir.join("map.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[data]
service_areas = "{}"
directory = "{}"

[viewport]
memento_ttl_minutes = 30
"#,
            areas.display(),
            directory.display()
        ),
    )?;
    Ok(TomlConfig::from_file(&config_path)?)
}

fn open_session(config: &TomlConfig) -> Result<MapSession<NominatimGeocoder, HeadlessSurface>> {
    let index = load_service_areas(config.service_areas_path().expect("service areas path"))?;
    let entries = load_directory(config.directory_path().expect("directory path"))?;
    Ok(MapSession::new(
        Arc::new(index),
        entries,
        NominatimGeocoder::new(config.nominatim_settings())?,
        HeadlessSurface::default(),
        config.session_options(),
    ))
}

#[tokio::test]
async fn test_select_city_then_resume_restores_city_view() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_fixtures(dir.path())?;
    let store = FileMementoStore::new(dir.path().join("state").join("memento.json"));

    let mut session = open_session(&config)?;
    session.start(&DeepLink::default(), None)?;
    session.select_region("sun-coast")?;
    session.select_county("pinellas")?;
    let city = session.select_city("clearwater", &store).await?;
    assert_eq!(city.as_deref(), Some("clearwater"));
    assert!(store.path().exists());

    let mut returning = open_session(&config)?;
    returning.resume(&DeepLink::default(), &store).await?;
    assert_eq!(
        returning.state().active_level,
        ViewLevel::Cities {
            region: "sun-coast".to_string(),
            county: "pinellas".to_string(),
        }
    );
    let clusters: Vec<&str> = returning.frame().clusters.iter().map(|c| c.slug.as_str()).collect();
    assert_eq!(clusters, vec!["clearwater", "st-petersburg"]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_city_leaves_no_memento() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_fixtures(dir.path())?;
    let store = FileMementoStore::new(dir.path().join("memento.json"));

    let mut session = open_session(&config)?;
    session.start(&DeepLink::from_query("county=pinellas"), None)?;
    assert_eq!(session.select_city("atlantis", &store).await?, None);
    assert!(store.load().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_expired_memento_opens_regions() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_fixtures(dir.path())?;
    let store = FileMementoStore::new(dir.path().join("memento.json"));

    let mut stale = NavigationMemento::new("sun-coast", "pinellas");
    stale.saved_at = Utc::now() - Duration::minutes(45);
    store.save(&stale).await?;

    let mut session = open_session(&config)?;
    session.resume(&DeepLink::default(), &store).await?;
    assert_eq!(session.state().active_level, ViewLevel::Regions);
    assert_eq!(session.frame().clusters.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_deep_link_wins_over_memento() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_fixtures(dir.path())?;
    let store = FileMementoStore::new(dir.path().join("memento.json"));
    store.save(&NavigationMemento::new("sun-coast", "pinellas")).await?;

    let mut session = open_session(&config)?;
    session.resume(&DeepLink::from_query("county=hillsborough"), &store).await?;
    assert_eq!(session.state().selected_county(), Some("hillsborough"));

    session.show_all_entries(true)?;
    let drawn: Vec<&str> = session.frame().markers.iter().map(|m| m.entry_id.as_str()).collect();
    assert_eq!(drawn, vec!["t1"]);
    assert_eq!(session.resolver().geocode_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_memento_is_ignored() -> Result<()> {
    let dir = TempDir::new()?;
    let config = write_fixtures(dir.path())?;
    let path = dir.path().join("memento.json");
    std::fs::write(&path, "{not json")?;

    let mut session = open_session(&config)?;
    session.resume(&DeepLink::default(), &FileMementoStore::new(&path)).await?;
    assert_eq!(session.state().active_level, ViewLevel::Regions);
    Ok(())
}
