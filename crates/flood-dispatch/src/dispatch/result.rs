use super::allocator::AllocationMode;
use super::catalog::{ResourceId, ResourceMetadata, ZoneId};
use super::forecast::ScenarioTag;
use super::impact::ImpactLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Allocation outcome for one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAllocation {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub impact_level: ImpactLevel,
    pub iz: f64,
    pub pf: f64,
    pub vulnerability: f64,
    pub is_critical_infra: bool,
    /// 1-based position in the urgency ordering.
    pub priority_index: usize,
    pub units_allocated: u32,
    pub resource_units: BTreeMap<ResourceId, u32>,
    pub resource_scores: BTreeMap<ResourceId, f64>,
    pub resource_demand: BTreeMap<ResourceId, u32>,
    pub satisfaction_level: f64,
}

impl ZoneAllocation {
    pub fn units_for(&self, resource: &ResourceId) -> u32 {
        self.resource_units.get(resource).copied().unwrap_or(0)
    }

    pub fn score_for(&self, resource: &ResourceId) -> f64 {
        self.resource_scores.get(resource).copied().unwrap_or(0.0)
    }

    pub fn demand_for(&self, resource: &ResourceId) -> u32 {
        self.resource_demand.get(resource).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub total_allocated_units: u32,
    pub unallocated_units: u32,
    pub per_resource_type: BTreeMap<ResourceId, u32>,
    pub available_capacity: BTreeMap<ResourceId, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A zone needs a resource type but received none of it.
    Shortage,
    /// Some of the pool could not be placed anywhere.
    UnallocatedUnits,
    /// The optimizer failed or timed out and crisp allocation was used.
    SolverFallback,
    /// Requests for a resource type exceed its capacity.
    CapacityExhausted,
    /// No zone requested anything.
    NoDemand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchWarning {
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<ZoneId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    pub message: String,
}

impl DispatchWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            zone_id: None,
            resource_id: None,
            message: message.into(),
        }
    }

    pub fn for_zone(mut self, zone_id: ZoneId) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    pub fn for_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }
}

/// Full allocation report returned to callers and written by batch runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub mode: AllocationMode,
    pub requested_mode: AllocationMode,
    pub used_optimizer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fairness_level: Option<f64>,
    pub catalog_version: u64,
    pub total_units: u32,
    pub global_flood_probability: f64,
    pub lead_time_days: u8,
    pub scenario: ScenarioTag,
    pub resource_summary: ResourceSummary,
    /// Catalog order.
    pub zones: Vec<ZoneAllocation>,
    pub resource_metadata: Vec<ResourceMetadata>,
    pub warnings: Vec<DispatchWarning>,
}

impl DispatchResult {
    pub fn zone(&self, id: &ZoneId) -> Option<&ZoneAllocation> {
        self.zones.iter().find(|zone| &zone.zone_id == id)
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|warning| warning.kind == kind)
    }

    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &DispatchWarning> {
        self.warnings
            .iter()
            .filter(move |warning| warning.kind == kind)
    }

    /// Zones sorted by priority index.
    pub fn by_priority(&self) -> Vec<&ZoneAllocation> {
        let mut zones: Vec<&ZoneAllocation> = self.zones.iter().collect();
        zones.sort_by_key(|zone| zone.priority_index);
        zones
    }
}
