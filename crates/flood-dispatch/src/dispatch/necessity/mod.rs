//! Per-zone, per-resource necessity scores and the demand derived from them.

mod rules;

pub use rules::{NeedCondition, NeedRule, NeedRuleTable, NeedTarget};

use super::catalog::{ResourceId, ResourceType, ZoneId, ZoneProfile};
use super::impact::{clamp_unit, ImpactAssessment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a zone's satisfaction level is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionBasis {
    /// Requested units are `ceil(necessity × capacity)` per needed resource.
    #[default]
    Necessity,
    /// Requested units come from the zone's configured `demand` map.
    FixedDemand,
}

/// Necessity scores and requested units for one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceNeed {
    pub zone_id: ZoneId,
    /// Scaled scores; anything under the epsilon is reported as 0.
    pub scores: BTreeMap<ResourceId, f64>,
    /// Rule weights before scaling.
    pub raw_weights: BTreeMap<ResourceId, f64>,
    pub demand: BTreeMap<ResourceId, u32>,
}

impl ResourceNeed {
    pub fn score(&self, resource: &ResourceId) -> f64 {
        self.scores.get(resource).copied().unwrap_or(0.0)
    }

    pub fn demand_for(&self, resource: &ResourceId) -> u32 {
        self.demand.get(resource).copied().unwrap_or(0)
    }

    pub fn total_demand(&self) -> u64 {
        self.demand.values().map(|units| u64::from(*units)).sum()
    }

    pub fn is_needed(&self, resource: &ResourceId) -> bool {
        self.score(resource) > 0.0
    }

    /// Mean raw weight across resource types, used to blend fuzzy shares.
    pub fn mean_raw_weight(&self) -> f64 {
        if self.raw_weights.is_empty() {
            return 0.0;
        }
        self.raw_weights.values().sum::<f64>() / self.raw_weights.len() as f64
    }

    /// Fulfilled ÷ requested units, 1 when nothing is requested.
    pub fn satisfaction(&self, units: &BTreeMap<ResourceId, u32>) -> f64 {
        let requested = self.total_demand();
        if requested == 0 {
            return 1.0;
        }
        let fulfilled: u64 = self
            .demand
            .iter()
            .map(|(resource, demand)| {
                u64::from(units.get(resource).copied().unwrap_or(0).min(*demand))
            })
            .sum();
        fulfilled as f64 / requested as f64
    }
}

/// Applies the rule table and scales by the strategy's intensity.
#[derive(Debug, Clone)]
pub struct NeedEstimator<'a> {
    table: &'a NeedRuleTable,
    epsilon: f64,
    basis: SatisfactionBasis,
}

impl<'a> NeedEstimator<'a> {
    pub fn new(table: &'a NeedRuleTable, epsilon: f64, basis: SatisfactionBasis) -> Self {
        Self {
            table,
            epsilon,
            basis,
        }
    }

    /// `scale` is the zone's base share (crisp), fuzzy share, or `iz`.
    pub fn estimate(
        &self,
        zone: &ZoneProfile,
        assessment: &ImpactAssessment,
        resources: &[ResourceType],
        scale: f64,
    ) -> ResourceNeed {
        let raw_weights = self.table.raw_weights(zone, assessment, resources);
        let scale = clamp_unit(scale);

        let mut scores = BTreeMap::new();
        let mut demand = BTreeMap::new();
        for resource in resources {
            let raw = raw_weights.get(&resource.id).copied().unwrap_or(0.0);
            let scaled = clamp_unit(raw * scale);
            let score = if scaled < self.epsilon { 0.0 } else { scaled };

            let requested = if score > 0.0 {
                match self.basis {
                    SatisfactionBasis::Necessity => {
                        (score * f64::from(resource.capacity) - 1e-9).ceil().max(0.0) as u32
                    }
                    SatisfactionBasis::FixedDemand => {
                        zone.demand.get(&resource.id).copied().unwrap_or(0)
                    }
                }
            } else {
                0
            };

            scores.insert(resource.id.clone(), score);
            demand.insert(resource.id.clone(), requested);
        }

        ResourceNeed {
            zone_id: zone.id.clone(),
            scores,
            raw_weights,
            demand,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::catalog::{FeatureWeights, RiskFeatures};
    use crate::dispatch::impact::classify;

    fn zone(hospitals: u32, river: f64, critical_infra: bool) -> ZoneProfile {
        ZoneProfile {
            id: ZoneId::from("Z1"),
            name: "Zone 1".to_string(),
            features: RiskFeatures {
                river_proximity: river,
                elevation_risk: 0.2,
                population_density: 0.2,
                critical_infra_score: 0.0,
            },
            weights: FeatureWeights::uniform(),
            critical_infra,
            hospitals,
            demand: BTreeMap::from([(ResourceId::from("pump"), 2)]),
        }
    }

    fn resources() -> Vec<ResourceType> {
        ["pump", "sandbag", "crew", "vehicle"]
            .into_iter()
            .map(|id| ResourceType {
                id: ResourceId::from(id),
                name: id.to_string(),
                unit_label: "units".to_string(),
                description: String::new(),
                capacity: 10,
            })
            .collect()
    }

    #[test]
    fn takes_maximum_matching_weight() {
        let table = NeedRuleTable::standard();
        let profile = zone(1, 0.9, false);
        let assessment = classify(profile.id.clone(), 0.9, 0.9, false);

        let raw = table.raw_weights(&profile, &assessment, &resources());
        assert_eq!(raw[&ResourceId::from("pump")], 1.0);
        assert_eq!(raw[&ResourceId::from("sandbag")], 1.0);
        assert_eq!(raw[&ResourceId::from("vehicle")], 1.0);
        assert_eq!(raw[&ResourceId::from("crew")], 1.0);
    }

    #[test]
    fn scales_by_share_and_drops_scores_under_epsilon() {
        let table = NeedRuleTable::standard();
        let estimator = NeedEstimator::new(&table, 0.05, SatisfactionBasis::Necessity);
        let profile = zone(0, 0.1, false);
        let assessment = classify(profile.id.clone(), 0.6, 0.6, false);

        let need = estimator.estimate(&profile, &assessment, &resources(), 0.09);

        assert!((need.score(&ResourceId::from("sandbag")) - 0.072).abs() < 1e-12);
        assert!((need.score(&ResourceId::from("crew")) - 0.054).abs() < 1e-12);
        assert_eq!(need.score(&ResourceId::from("pump")), 0.0);
        assert_eq!(need.demand_for(&ResourceId::from("pump")), 0);
        assert_eq!(need.demand_for(&ResourceId::from("sandbag")), 1);
    }

    #[test]
    fn zero_scale_means_no_need() {
        let table = NeedRuleTable::standard();
        let estimator = NeedEstimator::new(&table, 0.05, SatisfactionBasis::Necessity);
        let profile = zone(3, 0.9, true);
        let assessment = classify(profile.id.clone(), 0.1, 0.2, true);

        let need = estimator.estimate(&profile, &assessment, &resources(), 0.0);
        assert!(need.scores.values().all(|score| *score == 0.0));
        assert_eq!(need.total_demand(), 0);
        assert_eq!(need.satisfaction(&BTreeMap::new()), 1.0);
    }

    #[test]
    fn fixed_demand_only_counts_needed_resources() {
        let table = NeedRuleTable::standard();
        let estimator = NeedEstimator::new(&table, 0.05, SatisfactionBasis::FixedDemand);
        let profile = zone(0, 0.9, false);
        let assessment = classify(profile.id.clone(), 0.9, 0.9, false);

        let need = estimator.estimate(&profile, &assessment, &resources(), 0.5);
        assert_eq!(need.demand_for(&ResourceId::from("pump")), 2);
        assert_eq!(need.total_demand(), 2);

        let half = BTreeMap::from([(ResourceId::from("pump"), 1)]);
        assert_eq!(need.satisfaction(&half), 0.5);
        let surplus = BTreeMap::from([(ResourceId::from("pump"), 5)]);
        assert_eq!(need.satisfaction(&surplus), 1.0);
    }
}
