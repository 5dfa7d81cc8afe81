//! Post-allocation checks. A result that fails here is never returned.

use super::catalog::{CatalogSnapshot, ResourceId, ZoneId};
use super::impact::ImpactLevel;
use super::result::{DispatchResult, WarningKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessRule {
    Conservation,
    CriticalInfraFloor,
    ZoneCap,
    Completeness,
    ZoneTotals,
    ResourceCapacity,
}

impl BusinessRule {
    pub fn label(&self) -> &'static str {
        match self {
            BusinessRule::Conservation => "conservation",
            BusinessRule::CriticalInfraFloor => "critical_infra_floor",
            BusinessRule::ZoneCap => "zone_cap",
            BusinessRule::Completeness => "completeness",
            BusinessRule::ZoneTotals => "zone_totals",
            BusinessRule::ResourceCapacity => "resource_capacity",
        }
    }
}

impl fmt::Display for BusinessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("business rule '{rule}' violated: {detail}")]
pub struct BusinessRuleError {
    pub rule: BusinessRule,
    pub zones: Vec<ZoneId>,
    pub detail: String,
}

impl BusinessRuleError {
    fn new(rule: BusinessRule, zones: Vec<ZoneId>, detail: impl Into<String>) -> Self {
        Self {
            rule,
            zones,
            detail: detail.into(),
        }
    }
}

/// Request parameters the checks depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleContext {
    pub total_units: u32,
    pub zone_cap: Option<u32>,
}

pub fn validate(
    result: &DispatchResult,
    snapshot: &CatalogSnapshot,
    context: RuleContext,
) -> Result<(), BusinessRuleError> {
    check_completeness(result, snapshot)?;
    check_zone_totals(result)?;
    check_resource_capacity(result, snapshot)?;
    check_zone_cap(result, context)?;
    check_critical_floor(result, snapshot, context)?;
    check_conservation(result, snapshot, context)?;
    Ok(())
}

fn check_completeness(
    result: &DispatchResult,
    snapshot: &CatalogSnapshot,
) -> Result<(), BusinessRuleError> {
    let mut seen = BTreeSet::new();
    let mut duplicated = Vec::new();
    for zone in &result.zones {
        if !seen.insert(zone.zone_id.clone()) {
            duplicated.push(zone.zone_id.clone());
        }
    }
    if !duplicated.is_empty() {
        return Err(BusinessRuleError::new(
            BusinessRule::Completeness,
            duplicated,
            "zones reported more than once",
        ));
    }

    let missing: Vec<ZoneId> = snapshot
        .zones()
        .iter()
        .filter(|zone| !seen.contains(&zone.id))
        .map(|zone| zone.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(BusinessRuleError::new(
            BusinessRule::Completeness,
            missing,
            "catalog zones missing from the result",
        ));
    }

    let unknown: Vec<ZoneId> = result
        .zones
        .iter()
        .filter(|zone| snapshot.zone(&zone.zone_id).is_none())
        .map(|zone| zone.zone_id.clone())
        .collect();
    if !unknown.is_empty() {
        return Err(BusinessRuleError::new(
            BusinessRule::Completeness,
            unknown,
            "result contains zones outside the catalog",
        ));
    }
    Ok(())
}

fn check_zone_totals(result: &DispatchResult) -> Result<(), BusinessRuleError> {
    let mismatched: Vec<ZoneId> = result
        .zones
        .iter()
        .filter(|zone| zone.resource_units.values().sum::<u32>() != zone.units_allocated)
        .map(|zone| zone.zone_id.clone())
        .collect();
    if mismatched.is_empty() {
        Ok(())
    } else {
        Err(BusinessRuleError::new(
            BusinessRule::ZoneTotals,
            mismatched,
            "per-resource units do not add up to the zone total",
        ))
    }
}

fn allocated_by_resource(result: &DispatchResult) -> BTreeMap<&ResourceId, u32> {
    let mut used = BTreeMap::new();
    for zone in &result.zones {
        for (resource, units) in &zone.resource_units {
            *used.entry(resource).or_insert(0) += units;
        }
    }
    used
}

fn check_resource_capacity(
    result: &DispatchResult,
    snapshot: &CatalogSnapshot,
) -> Result<(), BusinessRuleError> {
    for (resource, used) in allocated_by_resource(result) {
        let capacity = snapshot
            .resource(resource)
            .map(|entry| entry.capacity)
            .unwrap_or(0);
        if used > capacity {
            let zones = result
                .zones
                .iter()
                .filter(|zone| zone.units_for(resource) > 0)
                .map(|zone| zone.zone_id.clone())
                .collect();
            return Err(BusinessRuleError::new(
                BusinessRule::ResourceCapacity,
                zones,
                format!("{used} units of '{resource}' allocated against capacity {capacity}"),
            ));
        }
    }
    Ok(())
}

fn check_zone_cap(result: &DispatchResult, context: RuleContext) -> Result<(), BusinessRuleError> {
    let Some(cap) = context.zone_cap else {
        return Ok(());
    };
    let over: Vec<ZoneId> = result
        .zones
        .iter()
        .filter(|zone| zone.units_allocated > cap)
        .map(|zone| zone.zone_id.clone())
        .collect();
    if over.is_empty() {
        Ok(())
    } else {
        Err(BusinessRuleError::new(
            BusinessRule::ZoneCap,
            over,
            format!("zones exceed the per-zone cap of {cap}"),
        ))
    }
}

fn check_critical_floor(
    result: &DispatchResult,
    snapshot: &CatalogSnapshot,
    context: RuleContext,
) -> Result<(), BusinessRuleError> {
    if context.total_units == 0 {
        return Ok(());
    }
    let starved: Vec<ZoneId> = result
        .zones
        .iter()
        .filter(|zone| zone.is_critical_infra && zone.impact_level != ImpactLevel::Normal)
        .filter(|zone| {
            zone.resource_demand.iter().any(|(resource, demand)| {
                *demand > 0
                    && snapshot
                        .resource(resource)
                        .is_some_and(|entry| entry.capacity > 0)
            })
        })
        .filter(|zone| zone.units_allocated == 0)
        .map(|zone| zone.zone_id.clone())
        .collect();
    if starved.is_empty() {
        Ok(())
    } else {
        Err(BusinessRuleError::new(
            BusinessRule::CriticalInfraFloor,
            starved,
            "critical infrastructure zones at risk received no units",
        ))
    }
}

fn check_conservation(
    result: &DispatchResult,
    snapshot: &CatalogSnapshot,
    context: RuleContext,
) -> Result<(), BusinessRuleError> {
    let summary = &result.resource_summary;
    let zone_sum: u32 = result.zones.iter().map(|zone| zone.units_allocated).sum();
    if zone_sum != summary.total_allocated_units
        || summary.total_allocated_units + summary.unallocated_units != context.total_units
    {
        return Err(BusinessRuleError::new(
            BusinessRule::Conservation,
            Vec::new(),
            format!(
                "allocated {} (zones sum to {zone_sum}) + unallocated {} != requested {}",
                summary.total_allocated_units, summary.unallocated_units, context.total_units
            ),
        ));
    }

    if summary.unallocated_units == 0 {
        return Ok(());
    }

    if !result.has_warning(WarningKind::UnallocatedUnits) {
        return Err(BusinessRuleError::new(
            BusinessRule::Conservation,
            Vec::new(),
            format!(
                "{} units left unallocated without a warning",
                summary.unallocated_units
            ),
        ));
    }

    let used = allocated_by_resource(result);
    let fillable: Vec<ZoneId> = result
        .zones
        .iter()
        .filter(|zone| {
            let zone_room = context
                .zone_cap
                .map_or(true, |cap| zone.units_allocated < cap);
            zone_room
                && zone.resource_demand.iter().any(|(resource, demand)| {
                    let capacity = snapshot
                        .resource(resource)
                        .map(|entry| entry.capacity)
                        .unwrap_or(0);
                    let in_use = used.get(resource).copied().unwrap_or(0);
                    zone.units_for(resource) < *demand && in_use < capacity
                })
        })
        .map(|zone| zone.zone_id.clone())
        .collect();
    if fillable.is_empty() {
        Ok(())
    } else {
        Err(BusinessRuleError::new(
            BusinessRule::Conservation,
            fillable,
            "units left unallocated while zones could still absorb them",
        ))
    }
}
