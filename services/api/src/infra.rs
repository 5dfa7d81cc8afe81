use flood_dispatch::config::{AppConfig, CatalogSource};
use flood_dispatch::dispatch::catalog::{load_resources_csv, load_zones_csv, CatalogLoadError};
use flood_dispatch::dispatch::{
    AllocationMode, CatalogSnapshot, CatalogStore, DispatchEngine, DispatchService,
    FeatureWeights, ResourceId, ResourceType, RiskFeatures, ZoneId, ZoneProfile,
};
use flood_dispatch::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Dispatch service wired from configuration, plus the catalog files it read.
pub(crate) struct Runtime {
    pub(crate) service: Arc<DispatchService>,
    pub(crate) dataset_paths: Vec<PathBuf>,
}

pub(crate) fn build_runtime(config: &AppConfig) -> Result<Runtime, AppError> {
    let (snapshot, dataset_paths) = load_catalog(&config.catalog)?;
    info!(
        version = snapshot.version(),
        zones = snapshot.zones().len(),
        resources = snapshot.resources().len(),
        source = if dataset_paths.is_empty() { "builtin" } else { "csv" },
        "catalog loaded"
    );

    let engine = DispatchEngine::new(config.dispatch.policy());
    let service = DispatchService::new(
        Arc::new(CatalogStore::new(snapshot)),
        engine,
        &config.dispatch,
    );
    Ok(Runtime {
        service: Arc::new(service),
        dataset_paths,
    })
}

/// Reads both CSV files when configured, otherwise falls back to the
/// built-in catalog. Configuring only one of the two is an error.
pub(crate) fn load_catalog(
    source: &CatalogSource,
) -> Result<(CatalogSnapshot, Vec<PathBuf>), AppError> {
    match (&source.zones_csv, &source.resources_csv) {
        (Some(zones_path), Some(resources_path)) => {
            let zones = load_zones_csv(zones_path)?;
            let resources = load_resources_csv(resources_path)?;
            let snapshot =
                CatalogSnapshot::new(1, zones, resources).map_err(CatalogLoadError::from)?;
            Ok((snapshot, vec![zones_path.clone(), resources_path.clone()]))
        }
        (None, None) => Ok((demo_catalog()?, Vec::new())),
        _ => Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "DISPATCH_ZONES_CSV and DISPATCH_RESOURCES_CSV must be set together",
        ))),
    }
}

fn demo_zone(
    id: &str,
    name: &str,
    features: [f64; 4],
    critical_infra: bool,
    hospitals: u32,
) -> ZoneProfile {
    let [river_proximity, elevation_risk, population_density, critical_infra_score] = features;
    ZoneProfile {
        id: ZoneId::from(id),
        name: name.to_string(),
        features: RiskFeatures {
            river_proximity,
            elevation_risk,
            population_density,
            critical_infra_score,
        },
        weights: FeatureWeights::uniform(),
        critical_infra,
        hospitals,
        demand: BTreeMap::new(),
    }
}

fn demo_resource(
    id: &str,
    name: &str,
    unit_label: &str,
    description: &str,
    capacity: u32,
) -> ResourceType {
    ResourceType {
        id: ResourceId::from(id),
        name: name.to_string(),
        unit_label: unit_label.to_string(),
        description: description.to_string(),
        capacity,
    }
}

/// River basin used when no catalog files are configured.
pub(crate) fn demo_catalog() -> Result<CatalogSnapshot, CatalogLoadError> {
    let zones = vec![
        demo_zone("Z1", "Lower Floodplain", [0.95, 0.9, 0.8, 0.85], true, 2),
        demo_zone("Z2", "Old Town", [0.8, 0.7, 0.9, 0.5], false, 1),
        demo_zone("Z3", "Industrial Wharf", [0.9, 0.6, 0.3, 0.7], true, 0),
        demo_zone("Z4", "Eastern Suburbs", [0.5, 0.4, 0.6, 0.2], false, 0),
        demo_zone("Z5", "Northern Ridge", [0.1, 0.1, 0.3, 0.1], false, 0),
    ];
    let resources = vec![
        demo_resource("pump", "Water pump", "pumps", "High-volume dewatering pump", 12),
        demo_resource(
            "sandbag",
            "Sandbag pallet",
            "pallets",
            "Pallet of 50 filled sandbags",
            40,
        ),
        demo_resource("crew", "Rescue crew", "crews", "Four-person swift water crew", 10),
        demo_resource(
            "vehicle",
            "High-clearance vehicle",
            "vehicles",
            "Evacuation and supply transport",
            8,
        ),
    ];
    Ok(CatalogSnapshot::new(1, zones, resources)?)
}

pub(crate) fn parse_mode(raw: &str) -> Result<AllocationMode, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "crisp" => Ok(AllocationMode::Crisp),
        "fuzzy" => Ok(AllocationMode::Fuzzy),
        "proportional" => Ok(AllocationMode::Proportional),
        "fairness" => Ok(AllocationMode::Fairness),
        other => Err(format!(
            "unknown mode '{other}' (expected crisp, fuzzy, proportional or fairness)"
        )),
    }
}

pub(crate) fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("failed to parse '{raw}' as a probability ({err})"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("probability {value} is outside [0, 1]"))
    }
}

/// Parses `ZONE=probability` overrides such as `Z1=0.9`.
pub(crate) fn parse_zone_probability(raw: &str) -> Result<(ZoneId, f64), String> {
    let (zone, probability) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ZONE=PROBABILITY, got '{raw}'"))?;
    let zone = zone.trim();
    if zone.is_empty() {
        return Err(format!("missing zone id in '{raw}'"));
    }
    Ok((ZoneId::from(zone), parse_probability(probability)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn demo_catalog_is_valid() {
        let snapshot = demo_catalog().expect("demo catalog validates");
        assert_eq!(snapshot.zones().len(), 5);
        assert_eq!(snapshot.resources().len(), 4);
        assert!(snapshot.zones().iter().any(|zone| zone.critical_infra));
    }

    #[test]
    fn parses_cli_values() {
        assert_eq!(parse_mode("Fairness"), Ok(AllocationMode::Fairness));
        assert!(parse_mode("greedy").is_err());
        assert_eq!(parse_probability("0.25"), Ok(0.25));
        assert!(parse_probability("1.5").is_err());
        assert_eq!(
            parse_zone_probability("Z3=0.7"),
            Ok((ZoneId::from("Z3"), 0.7))
        );
        assert!(parse_zone_probability("Z3").is_err());
        assert!(parse_zone_probability("=0.2").is_err());
    }

    #[test]
    fn loads_catalog_from_csv_pair() {
        let dir = tempfile::tempdir().expect("temp dir");
        let zones = dir.path().join("zones.csv");
        let resources = dir.path().join("resources.csv");
        fs::write(
            &zones,
            "id,name,river_proximity,elevation_risk,population_density,critical_infra_score\nZ1,Delta,0.9,0.8,0.7,0.6\n",
        )
        .expect("write zones");
        fs::write(&resources, "id,name,capacity\npump,Pump,3\n").expect("write resources");

        let source = CatalogSource {
            zones_csv: Some(zones.clone()),
            resources_csv: Some(resources.clone()),
        };
        let (snapshot, paths) = load_catalog(&source).expect("catalog loads");
        assert_eq!(snapshot.zones()[0].id, ZoneId::from("Z1"));
        assert_eq!(snapshot.resources()[0].capacity, 3);
        assert_eq!(paths, vec![zones, resources]);
    }

    #[test]
    fn half_configured_catalog_is_rejected() {
        let source = CatalogSource {
            zones_csv: Some(PathBuf::from("zones.csv")),
            resources_csv: None,
        };
        assert!(matches!(load_catalog(&source), Err(AppError::Io(_))));
    }

    #[test]
    fn no_configured_files_uses_demo_catalog() {
        let (snapshot, paths) = load_catalog(&CatalogSource::default()).expect("demo catalog");
        assert!(paths.is_empty());
        assert_eq!(snapshot.version(), 1);
    }
}
