//! Integer allocation of a unit pool across zones and resource types.
//!
//! Every strategy works on the same [`PlanContext`]: one entry per catalog
//! zone with its assessment, necessity and strategy share, plus the priority
//! order used to break ties. Banded strategies (crisp, fuzzy, proportional)
//! live in `banding`; the max-min optimizer lives in `fairness`.

mod banding;
mod fairness;
mod grid;

pub(crate) use banding::allocate_banded;
pub(crate) use fairness::allocate_fair;
pub(crate) use grid::AllocationGrid;

use super::catalog::{CatalogSnapshot, ResourceType, ZoneProfile};
use super::forecast::ForecastSignal;
use super::impact::{assess_zone, fuzzy_share, ImpactAssessment};
use super::necessity::{NeedEstimator, NeedRuleTable, ResourceNeed, SatisfactionBasis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const MAX_TOTAL_UNITS: u32 = 200;
pub const MAX_LEAD_TIME_DAYS: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    #[default]
    Crisp,
    Fuzzy,
    Proportional,
    Fairness,
}

impl AllocationMode {
    pub fn label(&self) -> &'static str {
        match self {
            AllocationMode::Crisp => "crisp",
            AllocationMode::Fuzzy => "fuzzy",
            AllocationMode::Proportional => "proportional",
            AllocationMode::Fairness => "fairness",
        }
    }
}

fn default_lead_time() -> u8 {
    1
}

/// Caller-supplied parameters for one allocation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub total_units: u32,
    #[serde(default)]
    pub mode: AllocationMode,
    #[serde(default = "default_lead_time")]
    pub lead_time_days: u8,
    #[serde(default)]
    pub zone_cap: Option<u32>,
    /// Forces the fairness optimizer regardless of `mode`.
    #[serde(default)]
    pub optimize: bool,
}

impl DispatchRequest {
    pub fn new(total_units: u32, mode: AllocationMode) -> Self {
        Self {
            total_units,
            mode,
            lead_time_days: default_lead_time(),
            zone_cap: None,
            optimize: false,
        }
    }

    pub fn with_zone_cap(mut self, zone_cap: u32) -> Self {
        self.zone_cap = Some(zone_cap);
        self
    }

    pub fn with_lead_time(mut self, lead_time_days: u8) -> Self {
        self.lead_time_days = lead_time_days;
        self
    }

    pub fn optimized(mut self) -> Self {
        self.optimize = true;
        self
    }

    pub fn effective_mode(&self) -> AllocationMode {
        if self.optimize {
            AllocationMode::Fairness
        } else {
            self.mode
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.total_units > MAX_TOTAL_UNITS {
            return Err(RequestError::TotalUnitsOutOfRange {
                requested: self.total_units,
                max: MAX_TOTAL_UNITS,
            });
        }
        if !(1..=MAX_LEAD_TIME_DAYS).contains(&self.lead_time_days) {
            return Err(RequestError::LeadTimeOutOfRange {
                requested: self.lead_time_days,
                max: MAX_LEAD_TIME_DAYS,
            });
        }
        if self.zone_cap == Some(0) {
            return Err(RequestError::ZeroZoneCap);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("total_units {requested} exceeds the maximum of {max}")]
    TotalUnitsOutOfRange { requested: u32, max: u32 },
    #[error("lead_time_days must be between 1 and {max}, got {requested}")]
    LeadTimeOutOfRange { requested: u8, max: u8 },
    #[error("zone_cap must be at least 1 when provided")]
    ZeroZoneCap,
}

/// Tunables shared by every strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPolicy {
    pub rules: NeedRuleTable,
    /// Scaled necessity below this is reported as 0.
    pub necessity_epsilon: f64,
    /// Minimum units for a critical-infrastructure zone outside NORMAL.
    pub critical_infra_floor: u32,
    pub satisfaction_basis: SatisfactionBasis,
    /// How strongly mean rule weight modulates fuzzy shares (0 = ignore).
    pub fuzzy_blend: f64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            rules: NeedRuleTable::standard(),
            necessity_epsilon: 0.05,
            critical_infra_floor: 1,
            satisfaction_basis: SatisfactionBasis::Necessity,
            fuzzy_blend: 0.5,
        }
    }
}

/// Strategy inputs for one zone.
#[derive(Debug, Clone)]
pub(crate) struct ZonePlan<'a> {
    pub(crate) profile: &'a ZoneProfile,
    pub(crate) assessment: ImpactAssessment,
    pub(crate) need: ResourceNeed,
    pub(crate) share: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanContext<'a> {
    pub(crate) mode: AllocationMode,
    pub(crate) zones: Vec<ZonePlan<'a>>,
    pub(crate) resources: &'a [ResourceType],
    /// Zone indices, most urgent first.
    pub(crate) priority: Vec<usize>,
    /// `rank[zone]` is the zone's position in `priority`.
    pub(crate) rank: Vec<usize>,
    pub(crate) total_units: u32,
    pub(crate) zone_cap: Option<u32>,
    pub(crate) critical_floor: u32,
}

impl<'a> PlanContext<'a> {
    pub(crate) fn build(
        snapshot: &'a CatalogSnapshot,
        forecast: &ForecastSignal,
        request: &DispatchRequest,
        mode: AllocationMode,
        policy: &DispatchPolicy,
    ) -> Self {
        let estimator = NeedEstimator::new(
            &policy.rules,
            policy.necessity_epsilon,
            policy.satisfaction_basis,
        );
        let resources = snapshot.resources();
        let assessments: Vec<ImpactAssessment> = snapshot
            .zones()
            .iter()
            .map(|zone| assess_zone(zone, forecast))
            .collect();
        let total_iz: f64 = assessments.iter().map(|assessment| assessment.iz).sum();

        let zones: Vec<ZonePlan<'a>> = snapshot
            .zones()
            .iter()
            .zip(assessments)
            .map(|(profile, assessment)| {
                let (scale, share) = match mode {
                    AllocationMode::Crisp => (assessment.base_share, assessment.base_share),
                    AllocationMode::Fuzzy => {
                        let fuzzy = fuzzy_share(assessment.iz, assessment.critical_infra);
                        (fuzzy, fuzzy)
                    }
                    AllocationMode::Proportional => {
                        let share = if total_iz > 0.0 {
                            assessment.iz / total_iz
                        } else {
                            0.0
                        };
                        (assessment.iz, share)
                    }
                    AllocationMode::Fairness => (assessment.iz, assessment.iz),
                };
                let need = estimator.estimate(profile, &assessment, resources, scale);
                let share = if mode == AllocationMode::Fuzzy {
                    let blend = policy.fuzzy_blend.clamp(0.0, 1.0);
                    share * (1.0 - blend + blend * need.mean_raw_weight())
                } else {
                    share
                };
                ZonePlan {
                    profile,
                    assessment,
                    need,
                    share,
                }
            })
            .collect();

        let priority = priority_order(&zones);
        let mut rank = vec![0; zones.len()];
        for (position, zone) in priority.iter().enumerate() {
            rank[*zone] = position;
        }

        Self {
            mode,
            zones,
            resources,
            priority,
            rank,
            total_units: request.total_units,
            zone_cap: request.zone_cap,
            critical_floor: policy.critical_infra_floor.max(1),
        }
    }

    pub(crate) fn grid(&self) -> AllocationGrid {
        let demand = self
            .zones
            .iter()
            .map(|zone| {
                self.resources
                    .iter()
                    .map(|resource| zone.need.demand_for(&resource.id))
                    .collect()
            })
            .collect();
        let capacity = self.resources.iter().map(|resource| resource.capacity).collect();
        AllocationGrid::new(demand, capacity, self.zone_cap)
    }

    /// Necessity scores in catalog resource order.
    pub(crate) fn weights(&self, zone: usize) -> Vec<f64> {
        self.resources
            .iter()
            .map(|resource| self.zones[zone].need.score(&resource.id))
            .collect()
    }

    /// Units a zone must receive before anyone else is topped up.
    ///
    /// Zero unless the zone is critical infrastructure outside NORMAL, the
    /// pool is non-empty, and some needed resource has capacity.
    pub(crate) fn floor_target(&self, zone: usize) -> u32 {
        let plan = &self.zones[zone];
        if self.total_units == 0 || !plan.assessment.is_critical_at_risk() {
            return 0;
        }
        let reachable: u64 = self
            .resources
            .iter()
            .filter(|resource| resource.capacity > 0)
            .map(|resource| u64::from(plan.need.demand_for(&resource.id).min(resource.capacity)))
            .sum();
        let mut target = u64::from(self.critical_floor).min(reachable);
        if let Some(cap) = self.zone_cap {
            target = target.min(u64::from(cap));
        }
        target.min(u64::from(self.total_units)) as u32
    }
}

/// Result of a strategy before it is turned into a report.
#[derive(Debug, Clone)]
pub(crate) struct AllocationPlan {
    pub(crate) grid: AllocationGrid,
    pub(crate) fairness_level: Option<f64>,
}

/// Highest `iz` first, critical infrastructure before others, then zone id.
fn priority_order(zones: &[ZonePlan<'_>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..zones.len()).collect();
    order.sort_by(|left, right| {
        let a = &zones[*left];
        let b = &zones[*right];
        b.assessment
            .iz
            .partial_cmp(&a.assessment.iz)
            .unwrap_or(Ordering::Equal)
            .then(b.profile.critical_infra.cmp(&a.profile.critical_infra))
            .then(a.profile.id.cmp(&b.profile.id))
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimize_flag_forces_fairness() {
        let request = DispatchRequest::new(10, AllocationMode::Fuzzy).optimized();
        assert_eq!(request.effective_mode(), AllocationMode::Fairness);
        assert_eq!(
            DispatchRequest::new(10, AllocationMode::Fuzzy).effective_mode(),
            AllocationMode::Fuzzy
        );
    }

    #[test]
    fn validates_request_bounds() {
        assert!(DispatchRequest::new(0, AllocationMode::Crisp).validate().is_ok());
        assert!(DispatchRequest::new(200, AllocationMode::Crisp).validate().is_ok());
        assert_eq!(
            DispatchRequest::new(201, AllocationMode::Crisp).validate(),
            Err(RequestError::TotalUnitsOutOfRange {
                requested: 201,
                max: MAX_TOTAL_UNITS
            })
        );
        assert!(matches!(
            DispatchRequest::new(10, AllocationMode::Crisp)
                .with_lead_time(8)
                .validate(),
            Err(RequestError::LeadTimeOutOfRange { requested: 8, .. })
        ));
        assert_eq!(
            DispatchRequest::new(10, AllocationMode::Crisp)
                .with_zone_cap(0)
                .validate(),
            Err(RequestError::ZeroZoneCap)
        );
    }

    #[test]
    fn request_defaults_when_deserialized() {
        let request: DispatchRequest =
            serde_json::from_str(r#"{"total_units": 12}"#).expect("valid request");
        assert_eq!(request.mode, AllocationMode::Crisp);
        assert_eq!(request.lead_time_days, 1);
        assert_eq!(request.zone_cap, None);
        assert!(!request.optimize);
    }
}
