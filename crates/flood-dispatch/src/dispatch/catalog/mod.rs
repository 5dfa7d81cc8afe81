//! Zone and resource catalog snapshots.
//!
//! A [`CatalogSnapshot`] is validated once when it is built and never mutated
//! afterwards. Administrative capacity updates go through [`CatalogStore`],
//! which publishes a new snapshot under the next version number while calls
//! already holding the previous `Arc` keep reading the old one.

mod loader;

pub use loader::{load_resources_csv, load_zones_csv, CatalogLoadError};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Identifier of a geographic response zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a resource type (e.g. `pump`, `sandbag`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Normalized risk features of a zone, each in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFeatures {
    pub river_proximity: f64,
    pub elevation_risk: f64,
    pub population_density: f64,
    pub critical_infra_score: f64,
}

impl RiskFeatures {
    fn as_array(&self) -> [(&'static str, f64); 4] {
        [
            ("river_proximity", self.river_proximity),
            ("elevation_risk", self.elevation_risk),
            ("population_density", self.population_density),
            ("critical_infra_score", self.critical_infra_score),
        ]
    }
}

/// Weights combining [`RiskFeatures`] into a vulnerability scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub river_proximity: f64,
    pub elevation_risk: f64,
    pub population_density: f64,
    pub critical_infra_score: f64,
}

impl FeatureWeights {
    pub fn uniform() -> Self {
        Self {
            river_proximity: 0.25,
            elevation_risk: 0.25,
            population_density: 0.25,
            critical_infra_score: 0.25,
        }
    }

    fn as_array(&self) -> [(&'static str, f64); 4] {
        [
            ("river_proximity", self.river_proximity),
            ("elevation_risk", self.elevation_risk),
            ("population_density", self.population_density),
            ("critical_infra_score", self.critical_infra_score),
        ]
    }

    fn sum(&self) -> f64 {
        self.as_array().iter().map(|(_, weight)| weight).sum()
    }
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Static per-zone attributes supplied by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneProfile {
    pub id: ZoneId,
    pub name: String,
    pub features: RiskFeatures,
    #[serde(default)]
    pub weights: FeatureWeights,
    #[serde(default)]
    pub critical_infra: bool,
    #[serde(default)]
    pub hospitals: u32,
    /// Fixed per-resource demand, consulted by the fixed-demand satisfaction basis.
    #[serde(default)]
    pub demand: BTreeMap<ResourceId, u32>,
}

impl ZoneProfile {
    /// Weighted combination of the risk features, recomputed on every call.
    pub fn vulnerability(&self) -> f64 {
        if self.weights.sum() <= 0.0 {
            return 0.0;
        }

        let features = self.features.as_array();
        let weights = self.weights.as_array();
        let combined: f64 = features
            .iter()
            .zip(weights.iter())
            .map(|((_, feature), (_, weight))| feature * weight)
            .sum();

        if combined.is_finite() {
            combined.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn validate(&self) -> Result<(), CatalogValidationError> {
        if self.id.0.trim().is_empty() {
            return Err(CatalogValidationError::EmptyZoneId);
        }

        for (feature, value) in self.features.as_array() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CatalogValidationError::FeatureOutOfRange {
                    zone: self.id.clone(),
                    feature,
                    value,
                });
            }
        }

        for (feature, weight) in self.weights.as_array() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(CatalogValidationError::NegativeWeight {
                    zone: self.id.clone(),
                    feature,
                    value: weight,
                });
            }
        }

        let sum = self.weights.sum();
        if sum > 0.0 && (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(CatalogValidationError::WeightSum {
                zone: self.id.clone(),
                sum,
            });
        }

        Ok(())
    }
}

/// A deployable resource type and its available units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub unit_label: String,
    #[serde(default)]
    pub description: String,
    pub capacity: u32,
}

/// Display metadata exposed alongside dispatch results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub id: ResourceId,
    pub name: String,
    pub unit_label: String,
    pub description: String,
}

impl From<&ResourceType> for ResourceMetadata {
    fn from(resource: &ResourceType) -> Self {
        Self {
            id: resource.id.clone(),
            name: resource.name.clone(),
            unit_label: resource.unit_label.clone(),
            description: resource.description.clone(),
        }
    }
}

/// Load-time catalog failures. Fatal: no allocation runs against bad data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogValidationError {
    #[error("zone identifier must not be empty")]
    EmptyZoneId,
    #[error("resource identifier must not be empty")]
    EmptyResourceId,
    #[error("duplicate zone '{0}'")]
    DuplicateZone(ZoneId),
    #[error("duplicate resource type '{0}'")]
    DuplicateResource(ResourceId),
    #[error("zone '{zone}' feature {feature} = {value} is outside [0,1]")]
    FeatureOutOfRange {
        zone: ZoneId,
        feature: &'static str,
        value: f64,
    },
    #[error("zone '{zone}' weight {feature} = {value} must be non-negative")]
    NegativeWeight {
        zone: ZoneId,
        feature: &'static str,
        value: f64,
    },
    #[error("zone '{zone}' weights sum to {sum:.6}, expected 1")]
    WeightSum { zone: ZoneId, sum: f64 },
    #[error("resource type '{resource}' has negative capacity {capacity}")]
    NegativeCapacity { resource: ResourceId, capacity: i64 },
    #[error("resource type '{0}' is not in the catalog")]
    UnknownResource(ResourceId),
}

/// Immutable, validated view of zones and resource types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSnapshot {
    version: u64,
    zones: Vec<ZoneProfile>,
    resources: Vec<ResourceType>,
}

impl CatalogSnapshot {
    pub fn new(
        version: u64,
        zones: Vec<ZoneProfile>,
        resources: Vec<ResourceType>,
    ) -> Result<Self, CatalogValidationError> {
        let mut seen_zones = BTreeSet::new();
        for zone in &zones {
            zone.validate()?;
            if !seen_zones.insert(zone.id.clone()) {
                return Err(CatalogValidationError::DuplicateZone(zone.id.clone()));
            }
        }

        let mut seen_resources = BTreeSet::new();
        for resource in &resources {
            if resource.id.0.trim().is_empty() {
                return Err(CatalogValidationError::EmptyResourceId);
            }
            if !seen_resources.insert(resource.id.clone()) {
                return Err(CatalogValidationError::DuplicateResource(
                    resource.id.clone(),
                ));
            }
        }

        Ok(Self {
            version,
            zones,
            resources,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn zones(&self) -> &[ZoneProfile] {
        &self.zones
    }

    pub fn resources(&self) -> &[ResourceType] {
        &self.resources
    }

    pub fn zone(&self, id: &ZoneId) -> Option<&ZoneProfile> {
        self.zones.iter().find(|zone| &zone.id == id)
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceType> {
        self.resources.iter().find(|resource| &resource.id == id)
    }

    /// Copy of this snapshot with one capacity changed, under the next version.
    pub fn with_capacity(
        &self,
        resource_id: &ResourceId,
        capacity: i64,
    ) -> Result<Self, CatalogValidationError> {
        if capacity < 0 {
            return Err(CatalogValidationError::NegativeCapacity {
                resource: resource_id.clone(),
                capacity,
            });
        }
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);

        let mut resources = self.resources.clone();
        let entry = resources
            .iter_mut()
            .find(|resource| &resource.id == resource_id)
            .ok_or_else(|| CatalogValidationError::UnknownResource(resource_id.clone()))?;
        entry.capacity = capacity;

        Ok(Self {
            version: self.version + 1,
            zones: self.zones.clone(),
            resources,
        })
    }
}

/// Holder of the current snapshot; readers clone the `Arc`, writers publish.
#[derive(Debug)]
pub struct CatalogStore {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl CatalogStore {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn current(&self) -> Arc<CatalogSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Administrative capacity update. Publishes and returns the new snapshot.
    pub fn update_capacity(
        &self,
        resource_id: &ResourceId,
        capacity: i64,
    ) -> Result<Arc<CatalogSnapshot>, CatalogValidationError> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = Arc::new(guard.with_capacity(resource_id, capacity)?);
        *guard = Arc::clone(&next);
        tracing::info!(
            resource = %resource_id,
            capacity,
            version = next.version(),
            "published catalog snapshot"
        );
        Ok(next)
    }

    /// Replace the whole catalog, e.g. after reloading the source files.
    pub fn replace(
        &self,
        zones: Vec<ZoneProfile>,
        resources: Vec<ResourceType>,
    ) -> Result<Arc<CatalogSnapshot>, CatalogValidationError> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = Arc::new(CatalogSnapshot::new(guard.version() + 1, zones, resources)?);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}
