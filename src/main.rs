use clap::Parser;
use service_area_map::adapters::{load_directory, load_service_areas};
use service_area_map::config::{CliConfig, Command, TomlConfig};
use service_area_map::core::{ConfigProvider, MapSession, MapSurface};
use service_area_map::domain::model::{DeepLink, DirectoryEntry, EntryFilter, Level};
use service_area_map::utils::error::{ErrorSeverity, MapError, Result};
use service_area_map::utils::logger;
use service_area_map::{
    AggregationEngine, CollisionResolver, CoordinateResolver, FileMementoStore, HeadlessSurface,
    NominatimGeocoder, ServiceAreaIndex,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting service-area-map CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = run(&cli).await {
        tracing::error!("❌ {} (Severity: {:?})", e, e.severity());
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,      // 警告，但成功
            ErrorSeverity::Medium => 2,   // 可重試
            ErrorSeverity::High => 1,     // 資料錯誤
            ErrorSeverity::Critical => 3, // 設定或系統錯誤
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(cli: &CliConfig) -> Result<()> {
    let config = cli.resolve()?;
    let index = Arc::new(load_service_areas(required(config.service_areas_path(), "data.service_areas")?)?);
    let entries = load_directory(required(config.directory_path(), "data.directory")?)?;

    match &cli.command {
        Command::Clusters { level, parent, featured } => {
            print_clusters(index, &entries, (*level).into(), parent.as_deref(), filter(*featured))
        }
        Command::Resolve { county, featured } => resolve_county(&config, index, &entries, county, filter(*featured)).await,
        Command::Browse {
            link,
            memento,
            search,
            show_entries,
            featured,
            select_city,
        } => {
            let geocoder = NominatimGeocoder::new(config.nominatim_settings())?;
            let mut session = MapSession::new(
                index,
                entries,
                geocoder,
                HeadlessSurface::default(),
                config.session_options(),
            );
            let link = link.as_deref().map(DeepLink::from_query).unwrap_or_default();
            let store = memento.as_ref().map(FileMementoStore::new);

            match &store {
                Some(store) => session.resume(&link, store).await?,
                None => session.start(&link, None)?,
            }
            if let Some(query) = search {
                let hit = session.index().search(query, 1).first().map(|u| (*u).clone());
                match hit {
                    Some(unit) => session.jump_to(&unit)?,
                    None => tracing::warn!("No service area matches '{}'", query),
                }
            }
            if *show_entries {
                session.show_all_entries(true)?;
            }
            if *featured {
                session.set_filter(EntryFilter::Featured)?;
            }

            session
                .refine(|done, total| tracing::info!("📍 Geocoded {}/{}", done, total))
                .await;
            let zoom = session.surface().zoom();
            session.on_zoom_change(zoom);

            println!("{}", serde_json::to_string_pretty(session.state())?);
            println!("{}", serde_json::to_string_pretty(session.frame())?);
            println!("{}", serde_json::to_string_pretty(&session.summary())?);
            println!("{}", serde_json::to_string_pretty(session.surface().history())?);

            if let Some(city) = select_city {
                let store = store.ok_or_else(|| MapError::MissingConfigError {
                    field: "--memento".to_string(),
                })?;
                match session.select_city(city, &store).await? {
                    Some(city) => println!("➡️  navigate to city '{}'", city),
                    None => println!("⚠️  unknown city '{}', staying on the map", city),
                }
            }
            Ok(())
        }
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value.ok_or_else(|| MapError::MissingConfigError {
        field: field.to_string(),
    })
}

fn filter(featured: bool) -> EntryFilter {
    if featured {
        EntryFilter::Featured
    } else {
        EntryFilter::All
    }
}

fn print_clusters(
    index: Arc<ServiceAreaIndex>,
    entries: &[DirectoryEntry],
    level: Level,
    parent: Option<&str>,
    filter: EntryFilter,
) -> Result<()> {
    let engine = AggregationEngine::new(index);
    let clusters = match level {
        Level::Region => engine.group_by_region(entries, filter),
        Level::County => engine.group_by_county(entries, parent, filter)?,
        Level::City => {
            let county = required(parent, "--parent")?;
            engine.group_by_city(entries, county, filter)?
        }
    };

    println!("{:<28} {:<28} {:>8} {:>9}", "slug", "name", "entries", "featured");
    for c in &clusters {
        println!(
            "{:<28} {:<28} {:>8} {:>9}",
            c.slug, c.display_name, c.entry_count, c.featured_count
        );
    }
    tracing::info!("✅ {} {} clusters", clusters.len(), level);
    Ok(())
}

async fn resolve_county(
    config: &TomlConfig,
    index: Arc<ServiceAreaIndex>,
    entries: &[DirectoryEntry],
    county: &str,
    filter: EntryFilter,
) -> Result<()> {
    index.unit_by_slug(Level::County, county)?;
    let scoped: Vec<DirectoryEntry> = entries
        .iter()
        .filter(|e| filter.admits(e) && e.service_areas.declares(Level::County, county))
        .cloned()
        .collect();

    let geocoder = NominatimGeocoder::new(config.nominatim_settings())?;
    let options = config.session_options();
    let resolver = CoordinateResolver::new(index, geocoder).with_timeout(options.geocode_timeout);

    let positions = resolver
        .resolve_batch(
            &scoped,
            |done, total| tracing::info!("📍 Geocoded {}/{}", done, total),
            config.concurrency(),
        )
        .await;
    let markers = CollisionResolver::new(config.collision.min_separation_m, config.collision.offset_distance_m)
        .resolve(&positions);

    println!("{:<24} {:>11} {:>12} {:<9} {}", "entry", "lat", "lng", "source", "moved");
    for (marker, position) in markers.iter().zip(positions.iter().filter(|p| p.renderable().is_some())) {
        println!(
            "{:<24} {:>11.6} {:>12.6} {:<9} {}",
            marker.entry_id,
            marker.position.lat,
            marker.position.lng,
            format!("{:?}", position.source_tier).to_lowercase(),
            if marker.displaced { "yes" } else { "" }
        );
    }

    let failed = resolver.failed_entries();
    if !failed.is_empty() {
        tracing::warn!("⚠️  {} entries could not be placed: {}", failed.len(), failed.join(", "));
    }
    tracing::info!("✅ {} of {} entries placed", markers.len(), scoped.len());
    Ok(())
}
