//! Declarative necessity rules: a condition, a target resource and a weight.

use super::super::catalog::{ResourceId, ResourceType, ZoneProfile};
use super::super::impact::ImpactAssessment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Predicate over a zone and its impact assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NeedCondition {
    Always,
    IzAtLeast(f64),
    IzBetween { min: f64, max: f64 },
    HospitalsAtLeast(u32),
    RiverProximityAtLeast(f64),
    ElevationRiskAtLeast(f64),
    PopulationDensityAtLeast(f64),
    CriticalInfra,
}

impl NeedCondition {
    pub(crate) fn matches(&self, zone: &ZoneProfile, assessment: &ImpactAssessment) -> bool {
        match self {
            NeedCondition::Always => true,
            NeedCondition::IzAtLeast(threshold) => assessment.iz >= *threshold,
            NeedCondition::IzBetween { min, max } => assessment.iz >= *min && assessment.iz < *max,
            NeedCondition::HospitalsAtLeast(count) => zone.hospitals >= *count,
            NeedCondition::RiverProximityAtLeast(threshold) => {
                zone.features.river_proximity >= *threshold
            }
            NeedCondition::ElevationRiskAtLeast(threshold) => {
                zone.features.elevation_risk >= *threshold
            }
            NeedCondition::PopulationDensityAtLeast(threshold) => {
                zone.features.population_density >= *threshold
            }
            NeedCondition::CriticalInfra => zone.critical_infra,
        }
    }
}

/// Which resource types a rule contributes weight to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedTarget {
    Resource(ResourceId),
    AllResources,
}

impl NeedTarget {
    fn applies_to(&self, resource: &ResourceId) -> bool {
        match self {
            NeedTarget::Resource(id) => id == resource,
            NeedTarget::AllResources => true,
        }
    }
}

/// One `(condition, resource, weight)` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedRule {
    pub condition: NeedCondition,
    pub target: NeedTarget,
    pub weight: f64,
}

impl NeedRule {
    fn new(condition: NeedCondition, resource: &str, weight: f64) -> Self {
        Self {
            condition,
            target: NeedTarget::Resource(ResourceId::from(resource)),
            weight,
        }
    }
}

/// Declarative necessity table; evaluation takes the max matching weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedRuleTable {
    pub rules: Vec<NeedRule>,
}

impl NeedRuleTable {
    pub fn new(rules: Vec<NeedRule>) -> Self {
        Self { rules }
    }

    /// Field-tested defaults for pumps, sandbags, crews and vehicles.
    pub fn standard() -> Self {
        use NeedCondition::*;

        Self::new(vec![
            NeedRule {
                condition: Always,
                target: NeedTarget::AllResources,
                weight: 0.5,
            },
            NeedRule::new(Always, "sandbag", 0.6),
            NeedRule::new(IzAtLeast(0.3), "sandbag", 0.8),
            NeedRule::new(IzAtLeast(0.3), "crew", 0.6),
            NeedRule::new(IzAtLeast(0.6), "sandbag", 1.0),
            NeedRule::new(IzAtLeast(0.6), "pump", 0.8),
            NeedRule::new(IzAtLeast(0.6), "crew", 0.8),
            NeedRule::new(IzAtLeast(0.6), "vehicle", 0.6),
            NeedRule::new(IzAtLeast(0.8), "pump", 1.0),
            NeedRule::new(IzAtLeast(0.8), "crew", 1.0),
            NeedRule::new(IzAtLeast(0.8), "vehicle", 0.8),
            NeedRule::new(RiverProximityAtLeast(0.7), "pump", 0.9),
            NeedRule::new(RiverProximityAtLeast(0.7), "sandbag", 1.0),
            NeedRule::new(ElevationRiskAtLeast(0.7), "pump", 0.9),
            NeedRule::new(HospitalsAtLeast(1), "pump", 1.0),
            NeedRule::new(HospitalsAtLeast(1), "vehicle", 1.0),
            NeedRule::new(PopulationDensityAtLeast(0.7), "vehicle", 0.9),
            NeedRule::new(PopulationDensityAtLeast(0.7), "crew", 0.9),
            NeedRule::new(CriticalInfra, "pump", 1.0),
            NeedRule::new(CriticalInfra, "crew", 0.9),
        ])
    }

    /// Unscaled weight per resource type: max over matching rules, 0 if none.
    pub fn raw_weights(
        &self,
        zone: &ZoneProfile,
        assessment: &ImpactAssessment,
        resources: &[ResourceType],
    ) -> BTreeMap<ResourceId, f64> {
        let matching: Vec<&NeedRule> = self
            .rules
            .iter()
            .filter(|rule| rule.condition.matches(zone, assessment))
            .collect();

        resources
            .iter()
            .map(|resource| {
                let weight = matching
                    .iter()
                    .filter(|rule| rule.target.applies_to(&resource.id))
                    .map(|rule| sanitize_weight(rule.weight))
                    .fold(0.0_f64, f64::max);
                (resource.id.clone(), weight)
            })
            .collect()
    }
}

impl Default for NeedRuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
