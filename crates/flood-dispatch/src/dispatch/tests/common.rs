use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::response::Response;
use serde_json::Value;

use crate::dispatch::catalog::{
    CatalogSnapshot, CatalogStore, FeatureWeights, ResourceId, ResourceType, RiskFeatures,
    ZoneId, ZoneProfile,
};
use crate::dispatch::forecast::ForecastSignal;
use crate::dispatch::necessity::SatisfactionBasis;
use crate::dispatch::solver::{
    DenseSimplex, LinearProgram, LinearSolver, Solution, SolverError,
};
use crate::dispatch::{DispatchEngine, DispatchPolicy, DispatchService};

pub(super) fn resource(id: &str, capacity: u32) -> ResourceType {
    ResourceType {
        id: ResourceId::from(id),
        name: id.to_string(),
        unit_label: "units".to_string(),
        description: format!("{id} stock"),
        capacity,
    }
}

/// Pumps, sandbags, crews and vehicles with the same capacity each.
pub(super) fn standard_resources(capacity: u32) -> Vec<ResourceType> {
    ["pump", "sandbag", "crew", "vehicle"]
        .into_iter()
        .map(|id| resource(id, capacity))
        .collect()
}

/// Zone whose four features all equal `vulnerability`, so the weighted
/// vulnerability under uniform weights is that same value.
pub(super) fn zone(id: &str, vulnerability: f64, critical_infra: bool) -> ZoneProfile {
    ZoneProfile {
        id: ZoneId::from(id),
        name: format!("Zone {id}"),
        features: RiskFeatures {
            river_proximity: vulnerability,
            elevation_risk: vulnerability,
            population_density: vulnerability,
            critical_infra_score: vulnerability,
        },
        weights: FeatureWeights::uniform(),
        critical_infra,
        hospitals: 0,
        demand: BTreeMap::new(),
    }
}

pub(super) fn zone_with_demand(id: &str, vulnerability: f64, demand: &[(&str, u32)]) -> ZoneProfile {
    let mut profile = zone(id, vulnerability, false);
    profile.demand = demand
        .iter()
        .map(|(resource, units)| (ResourceId::from(*resource), *units))
        .collect();
    profile
}

pub(super) fn snapshot(zones: Vec<ZoneProfile>, resources: Vec<ResourceType>) -> CatalogSnapshot {
    CatalogSnapshot::new(1, zones, resources).expect("valid catalog")
}

/// Scenario A: one critical-infrastructure zone in CRITICAL, one in NORMAL.
pub(super) fn two_zone_catalog() -> (CatalogSnapshot, ForecastSignal) {
    let catalog = snapshot(
        vec![zone("Z1", 0.9, true), zone("Z2", 0.3, false)],
        standard_resources(20),
    );
    let forecast = ForecastSignal::basin_wide(0.5)
        .with_zone_probability("Z1", 0.9)
        .with_zone_probability("Z2", 0.2);
    (catalog, forecast)
}

/// Scenario B: three CRITICAL zones competing for two pumps.
pub(super) fn scarce_pump_catalog() -> (CatalogSnapshot, ForecastSignal) {
    let mut resources = standard_resources(50);
    resources[0].capacity = 2;
    let catalog = snapshot(
        vec![
            zone("Z1", 0.9, false),
            zone("Z2", 0.9, false),
            zone("Z3", 0.9, false),
        ],
        resources,
    );
    (catalog, ForecastSignal::basin_wide(0.9))
}

/// Fixed-demand fixture whose integer max-min satisfaction is 0.5.
pub(super) fn fairness_catalog() -> (CatalogSnapshot, ForecastSignal) {
    let catalog = snapshot(
        vec![
            zone_with_demand("Z1", 0.9, &[("pump", 4), ("sandbag", 4)]),
            zone_with_demand("Z2", 0.9, &[("pump", 2), ("sandbag", 2)]),
            zone_with_demand("Z3", 0.9, &[("sandbag", 6)]),
        ],
        vec![resource("pump", 4), resource("sandbag", 6)],
    );
    (catalog, ForecastSignal::basin_wide(0.9))
}

pub(super) fn engine() -> DispatchEngine {
    DispatchEngine::new(DispatchPolicy::default())
}

pub(super) fn fixed_demand_policy() -> DispatchPolicy {
    DispatchPolicy {
        satisfaction_basis: SatisfactionBasis::FixedDemand,
        ..DispatchPolicy::default()
    }
}

pub(super) fn fixed_demand_engine() -> DispatchEngine {
    DispatchEngine::new(fixed_demand_policy())
}

pub(super) fn service_with(
    catalog: CatalogSnapshot,
    engine: DispatchEngine,
    solver_timeout: Duration,
) -> Arc<DispatchService> {
    Arc::new(DispatchService::with_limits(
        Arc::new(CatalogStore::new(catalog)),
        Arc::new(engine),
        2,
        solver_timeout,
    ))
}

pub(super) fn service(catalog: CatalogSnapshot) -> Arc<DispatchService> {
    service_with(catalog, engine(), Duration::from_secs(5))
}

/// Solver that always fails with the configured error.
pub(super) struct FailingSolver(pub(super) SolverError);

impl LinearSolver for FailingSolver {
    fn solve(&self, _program: &LinearProgram) -> Result<Solution, SolverError> {
        Err(self.0.clone())
    }
}

/// Solver that blocks its worker thread before delegating.
pub(super) struct SlowSolver(pub(super) Duration);

impl LinearSolver for SlowSolver {
    fn solve(&self, program: &LinearProgram) -> Result<Solution, SolverError> {
        std::thread::sleep(self.0);
        DenseSimplex::default().solve(program)
    }
}

/// Exhaustive max-min satisfaction over integer allocations.
///
/// `demand[z][r]` bounds each cell; the pool and per-resource capacities
/// bound the sums. Only usable for tiny fixtures.
pub(super) fn brute_force_max_min(demand: &[Vec<u32>], capacity: &[u32], total: u32) -> f64 {
    let cells: Vec<(usize, usize)> = demand
        .iter()
        .enumerate()
        .flat_map(|(zone, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, units)| **units > 0)
                .map(move |(resource, _)| (zone, resource))
        })
        .collect();
    let mut assignment = vec![0u32; cells.len()];
    let mut best = 0.0_f64;
    search(demand, capacity, total, &cells, 0, &mut assignment, &mut best);
    best
}

fn search(
    demand: &[Vec<u32>],
    capacity: &[u32],
    total: u32,
    cells: &[(usize, usize)],
    index: usize,
    assignment: &mut Vec<u32>,
    best: &mut f64,
) {
    if index == cells.len() {
        let placed: u32 = assignment.iter().sum();
        if placed > total {
            return;
        }
        for (resource, limit) in capacity.iter().enumerate() {
            let used: u32 = cells
                .iter()
                .zip(assignment.iter())
                .filter(|((_, cell_resource), _)| *cell_resource == resource)
                .map(|(_, units)| *units)
                .sum();
            if used > *limit {
                return;
            }
        }
        let minimum = demand
            .iter()
            .enumerate()
            .filter(|(_, row)| row.iter().sum::<u32>() > 0)
            .map(|(zone, row)| {
                let got: u32 = cells
                    .iter()
                    .zip(assignment.iter())
                    .filter(|((cell_zone, _), _)| *cell_zone == zone)
                    .map(|(_, units)| *units)
                    .sum();
                f64::from(got) / f64::from(row.iter().sum::<u32>())
            })
            .fold(1.0_f64, f64::min);
        *best = best.max(minimum);
        return;
    }

    let (zone, resource) = cells[index];
    for units in 0..=demand[zone][resource] {
        assignment[index] = units;
        search(demand, capacity, total, cells, index + 1, assignment, best);
    }
    assignment[index] = 0;
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
