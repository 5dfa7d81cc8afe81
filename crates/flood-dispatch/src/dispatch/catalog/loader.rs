use super::{
    CatalogValidationError, FeatureWeights, ResourceId, ResourceType, RiskFeatures, ZoneId,
    ZoneProfile,
};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Errors raised while reading catalog rows from CSV.
#[derive(Debug, thiserror::Error)]
pub enum CatalogLoadError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid catalog CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Invalid(#[from] CatalogValidationError),
    #[error("zone '{zone}' has a malformed demand entry '{entry}' (expected resource=units)")]
    Demand { zone: String, entry: String },
}

pub fn load_zones_csv<P: AsRef<Path>>(path: P) -> Result<Vec<ZoneProfile>, CatalogLoadError> {
    let file = std::fs::File::open(path)?;
    parse_zones(file)
}

pub fn load_resources_csv<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<ResourceType>, CatalogLoadError> {
    let file = std::fs::File::open(path)?;
    parse_resources(file)
}

pub(crate) fn parse_zones<R: Read>(reader: R) -> Result<Vec<ZoneProfile>, CatalogLoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut zones = Vec::new();

    for record in csv_reader.deserialize::<ZoneRow>() {
        let row = record?;
        let demand = parse_demand(&row.id, row.demand.as_deref())?;
        let weights = row.weights();

        zones.push(ZoneProfile {
            id: ZoneId(row.id),
            name: row.name,
            features: RiskFeatures {
                river_proximity: row.river_proximity,
                elevation_risk: row.elevation_risk,
                population_density: row.population_density,
                critical_infra_score: row.critical_infra_score,
            },
            weights,
            critical_infra: row.critical_infra.unwrap_or(false),
            hospitals: row.hospitals.unwrap_or(0),
            demand,
        });
    }

    Ok(zones)
}

pub(crate) fn parse_resources<R: Read>(
    reader: R,
) -> Result<Vec<ResourceType>, CatalogLoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut resources = Vec::new();

    for record in csv_reader.deserialize::<ResourceRow>() {
        let row = record?;
        if row.capacity < 0 {
            return Err(CatalogValidationError::NegativeCapacity {
                resource: ResourceId(row.id),
                capacity: row.capacity,
            }
            .into());
        }

        resources.push(ResourceType {
            id: ResourceId(row.id),
            name: row.name,
            unit_label: row.unit_label.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
            capacity: u32::try_from(row.capacity).unwrap_or(u32::MAX),
        });
    }

    Ok(resources)
}

#[derive(Debug, Deserialize)]
struct ZoneRow {
    id: String,
    name: String,
    river_proximity: f64,
    elevation_risk: f64,
    population_density: f64,
    critical_infra_score: f64,
    #[serde(default)]
    w_river_proximity: Option<f64>,
    #[serde(default)]
    w_elevation_risk: Option<f64>,
    #[serde(default)]
    w_population_density: Option<f64>,
    #[serde(default)]
    w_critical_infra_score: Option<f64>,
    #[serde(default, deserialize_with = "flexible_bool")]
    critical_infra: Option<bool>,
    #[serde(default)]
    hospitals: Option<u32>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    demand: Option<String>,
}

impl ZoneRow {
    fn weights(&self) -> FeatureWeights {
        let columns = [
            self.w_river_proximity,
            self.w_elevation_risk,
            self.w_population_density,
            self.w_critical_infra_score,
        ];
        if columns.iter().all(Option::is_none) {
            return FeatureWeights::uniform();
        }

        FeatureWeights {
            river_proximity: self.w_river_proximity.unwrap_or(0.0),
            elevation_risk: self.w_elevation_risk.unwrap_or(0.0),
            population_density: self.w_population_density.unwrap_or(0.0),
            critical_infra_score: self.w_critical_infra_score.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceRow {
    id: String,
    name: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    unit_label: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    description: Option<String>,
    capacity: i64,
}

/// Parses `pump=2|sandbag=40` into a demand map.
fn parse_demand(
    zone: &str,
    raw: Option<&str>,
) -> Result<BTreeMap<ResourceId, u32>, CatalogLoadError> {
    let mut demand = BTreeMap::new();
    let Some(raw) = raw else {
        return Ok(demand);
    };

    for entry in raw.split('|').map(str::trim).filter(|entry| !entry.is_empty()) {
        let parsed = entry
            .split_once('=')
            .and_then(|(resource, units)| {
                let resource = resource.trim();
                let units = units.trim().parse::<u32>().ok()?;
                (!resource.is_empty()).then(|| (ResourceId(resource.to_string()), units))
            })
            .ok_or_else(|| CatalogLoadError::Demand {
                zone: zone.to_string(),
                entry: entry.to_string(),
            })?;
        demand.insert(parsed.0, parsed.1);
    }

    Ok(demand)
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    match opt.as_deref().map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(value) => match value.as_str() {
            "" => Ok(None),
            "true" | "yes" | "y" | "1" => Ok(Some(true)),
            "false" | "no" | "n" | "0" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, found '{other}'"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zone_rows_with_optional_columns() {
        let csv = "id,name,river_proximity,elevation_risk,population_density,critical_infra_score,w_river_proximity,w_elevation_risk,w_population_density,w_critical_infra_score,critical_infra,hospitals,demand\n\
Z1,Riverside,0.9,0.7,0.5,0.8,0.4,0.3,0.2,0.1,yes,2,pump=3|sandbag=40\n\
Z2,Uplands,0.1,0.2,0.3,0.0,,,,,,,\n";

        let zones = parse_zones(csv.as_bytes()).expect("zones parse");
        assert_eq!(zones.len(), 2);
        assert!(zones[0].critical_infra);
        assert_eq!(zones[0].hospitals, 2);
        assert_eq!(zones[0].demand.get(&ResourceId::from("pump")), Some(&3));
        assert_eq!(zones[1].weights, FeatureWeights::uniform());
        assert!(!zones[1].critical_infra);
        assert!(zones[1].demand.is_empty());
    }

    #[test]
    fn rejects_malformed_demand() {
        let csv = "id,name,river_proximity,elevation_risk,population_density,critical_infra_score,demand\n\
Z1,Riverside,0.9,0.7,0.5,0.8,pump:3\n";
        match parse_zones(csv.as_bytes()) {
            Err(CatalogLoadError::Demand { zone, entry }) => {
                assert_eq!(zone, "Z1");
                assert_eq!(entry, "pump:3");
            }
            other => panic!("expected demand error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_negative_capacity() {
        let csv = "id,name,unit_label,description,capacity\npump,Pump,units,,-2\n";
        match parse_resources(csv.as_bytes()) {
            Err(CatalogLoadError::Invalid(CatalogValidationError::NegativeCapacity {
                capacity,
                ..
            })) => assert_eq!(capacity, -2),
            other => panic!("expected negative capacity error, got {other:?}"),
        }
    }
}
