use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::allocator::{
    allocate_banded, allocate_fair, AllocationMode, AllocationPlan, DispatchPolicy,
    DispatchRequest, PlanContext, RequestError,
};
use super::catalog::{
    CatalogSnapshot, CatalogStore, CatalogValidationError, ResourceId, ResourceMetadata,
};
use super::forecast::ForecastSignal;
use super::impact::clamp_unit;
use super::result::{
    DispatchResult, DispatchWarning, ResourceSummary, WarningKind, ZoneAllocation,
};
use super::solver::{DenseSimplex, LinearSolver, SolverError};
use super::validator::{self, BusinessRuleError, RuleContext};
use crate::config::DispatchSettings;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    BusinessRule(#[from] BusinessRuleError),
}

/// Why the fairness optimizer was abandoned in favour of crisp allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    Solver(SolverError),
    Timeout(Duration),
    Aborted,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Solver(error) => write!(f, "failed: {}", error),
            FallbackReason::Timeout(limit) => {
                write!(f, "exceeded its {} ms budget", limit.as_millis())
            }
            FallbackReason::Aborted => write!(f, "worker aborted"),
        }
    }
}

/// Synchronous allocation pipeline: classify, score, allocate, validate.
pub struct DispatchEngine {
    policy: DispatchPolicy,
    solver: Arc<dyn LinearSolver>,
}

impl DispatchEngine {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self::with_solver(policy, Arc::new(DenseSimplex::default()))
    }

    pub fn with_solver(policy: DispatchPolicy, solver: Arc<dyn LinearSolver>) -> Self {
        Self { policy, solver }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn run(
        &self,
        snapshot: &CatalogSnapshot,
        forecast: &ForecastSignal,
        request: &DispatchRequest,
    ) -> Result<DispatchResult, DispatchError> {
        request.validate()?;
        let mode = request.effective_mode();
        let context = PlanContext::build(snapshot, forecast, request, mode, &self.policy);

        if mode == AllocationMode::Fairness {
            return match allocate_fair(&context, self.solver.as_ref()) {
                Ok(plan) => self.finish(snapshot, forecast, request, &context, plan, Vec::new()),
                Err(error) => {
                    warn!(%error, "fairness optimizer failed, falling back to crisp");
                    self.fallback(snapshot, forecast, request, FallbackReason::Solver(error))
                }
            };
        }

        let plan = allocate_banded(&context);
        self.finish(snapshot, forecast, request, &context, plan, Vec::new())
    }

    /// Crisp allocation annotated with a solver-fallback warning.
    pub fn fallback(
        &self,
        snapshot: &CatalogSnapshot,
        forecast: &ForecastSignal,
        request: &DispatchRequest,
        reason: FallbackReason,
    ) -> Result<DispatchResult, DispatchError> {
        request.validate()?;
        let context =
            PlanContext::build(snapshot, forecast, request, AllocationMode::Crisp, &self.policy);
        let plan = allocate_banded(&context);
        let warning = DispatchWarning::new(
            WarningKind::SolverFallback,
            format!("fairness optimizer {reason}; crisp allocation used instead"),
        );
        self.finish(snapshot, forecast, request, &context, plan, vec![warning])
    }

    fn finish(
        &self,
        snapshot: &CatalogSnapshot,
        forecast: &ForecastSignal,
        request: &DispatchRequest,
        context: &PlanContext<'_>,
        plan: AllocationPlan,
        mut warnings: Vec<DispatchWarning>,
    ) -> Result<DispatchResult, DispatchError> {
        let grid = &plan.grid;
        let resources = snapshot.resources();

        let zones: Vec<ZoneAllocation> = context
            .zones
            .iter()
            .enumerate()
            .map(|(index, zone)| {
                let resource_units: BTreeMap<ResourceId, u32> = resources
                    .iter()
                    .enumerate()
                    .map(|(column, resource)| (resource.id.clone(), grid.units(index, column)))
                    .collect();
                ZoneAllocation {
                    zone_id: zone.profile.id.clone(),
                    zone_name: zone.profile.name.clone(),
                    impact_level: zone.assessment.impact_level,
                    iz: zone.assessment.iz,
                    pf: zone.assessment.pf,
                    vulnerability: zone.assessment.vulnerability,
                    is_critical_infra: zone.profile.critical_infra,
                    priority_index: context.rank[index] + 1,
                    units_allocated: grid.zone_total(index),
                    satisfaction_level: zone.need.satisfaction(&resource_units),
                    resource_scores: zone.need.scores.clone(),
                    resource_demand: zone.need.demand.clone(),
                    resource_units,
                }
            })
            .collect();

        let per_resource_type: BTreeMap<ResourceId, u32> = resources
            .iter()
            .enumerate()
            .map(|(column, resource)| (resource.id.clone(), grid.resource_total(column)))
            .collect();
        let available_capacity = resources
            .iter()
            .map(|resource| (resource.id.clone(), resource.capacity))
            .collect();
        let total_allocated_units = grid.total();
        let unallocated_units = request.total_units.saturating_sub(total_allocated_units);

        warnings.extend(shortage_warnings(context, &zones));
        let nothing_requested = zones
            .iter()
            .all(|zone| zone.resource_demand.values().all(|units| *units == 0));
        if request.total_units > 0 && nothing_requested {
            warnings.push(DispatchWarning::new(
                WarningKind::NoDemand,
                "no zone requested any resources; the pool was left unallocated",
            ));
        }
        if unallocated_units > 0 {
            warnings.push(DispatchWarning::new(
                WarningKind::UnallocatedUnits,
                format!(
                    "{unallocated_units} of {} units could not be placed within demand, capacity and zone caps",
                    request.total_units
                ),
            ));
        }

        let result = DispatchResult {
            mode: context.mode,
            requested_mode: request.effective_mode(),
            used_optimizer: context.mode == AllocationMode::Fairness,
            fairness_level: plan.fairness_level,
            catalog_version: snapshot.version(),
            total_units: request.total_units,
            global_flood_probability: clamp_unit(forecast.flood_probability),
            lead_time_days: request.lead_time_days,
            scenario: forecast.scenario,
            resource_summary: ResourceSummary {
                total_allocated_units,
                unallocated_units,
                per_resource_type,
                available_capacity,
            },
            zones,
            resource_metadata: resources.iter().map(ResourceMetadata::from).collect(),
            warnings,
        };

        validator::validate(
            &result,
            snapshot,
            RuleContext {
                total_units: request.total_units,
                zone_cap: request.zone_cap,
            },
        )
        .map_err(|error| {
            warn!(rule = %error.rule, zones = ?error.zones, "allocation rejected");
            error
        })?;

        info!(
            mode = result.mode.label(),
            catalog_version = result.catalog_version,
            total_units = result.total_units,
            allocated = total_allocated_units,
            unallocated = unallocated_units,
            warnings = result.warnings.len(),
            "dispatch completed"
        );
        Ok(result)
    }
}

fn shortage_warnings(context: &PlanContext<'_>, zones: &[ZoneAllocation]) -> Vec<DispatchWarning> {
    let mut warnings = Vec::new();

    for resource in context.resources {
        let requested: u64 = zones
            .iter()
            .map(|zone| u64::from(zone.demand_for(&resource.id)))
            .sum();
        if requested > u64::from(resource.capacity) {
            warnings.push(
                DispatchWarning::new(
                    WarningKind::CapacityExhausted,
                    format!(
                        "zones request {requested} {} but only {} are available",
                        resource.id, resource.capacity
                    ),
                )
                .for_resource(resource.id.clone()),
            );
        }
    }

    // Keyed on necessity alone: zero capacity or a missing fixed-demand entry
    // leaves demand at 0 for a resource the zone still needs.
    for &index in &context.priority {
        let zone = &zones[index];
        for resource in context.resources {
            if zone.score_for(&resource.id) > 0.0 && zone.units_for(&resource.id) == 0 {
                warnings.push(
                    DispatchWarning::new(
                        WarningKind::Shortage,
                        format!(
                            "{} needs {} (necessity {:.2}) but received none",
                            zone.zone_id,
                            resource.id,
                            zone.score_for(&resource.id)
                        ),
                    )
                    .for_zone(zone.zone_id.clone())
                    .for_resource(resource.id.clone()),
                );
            }
        }
    }

    warnings
}

/// Async front door: reads the current catalog, bounds optimizer concurrency,
/// and enforces the solver time budget.
pub struct DispatchService {
    catalog: Arc<CatalogStore>,
    engine: Arc<DispatchEngine>,
    workers: Arc<Semaphore>,
    solver_timeout: Duration,
}

impl DispatchService {
    pub fn new(catalog: Arc<CatalogStore>, engine: DispatchEngine, settings: &DispatchSettings) -> Self {
        Self::with_limits(
            catalog,
            Arc::new(engine),
            settings.solver_workers,
            settings.solver_timeout,
        )
    }

    pub fn with_limits(
        catalog: Arc<CatalogStore>,
        engine: Arc<DispatchEngine>,
        workers: usize,
        solver_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            engine,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            solver_timeout,
        }
    }

    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.catalog.current()
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn update_capacity(
        &self,
        resource_id: &ResourceId,
        capacity: i64,
    ) -> Result<Arc<CatalogSnapshot>, CatalogValidationError> {
        self.catalog.update_capacity(resource_id, capacity)
    }

    pub async fn dispatch(
        &self,
        forecast: ForecastSignal,
        request: DispatchRequest,
    ) -> Result<DispatchResult, DispatchError> {
        let snapshot = self.catalog.current();
        request.validate()?;

        if request.effective_mode() != AllocationMode::Fairness {
            return self.engine.run(&snapshot, &forecast, &request);
        }

        let workers = Arc::clone(&self.workers);
        let engine = Arc::clone(&self.engine);
        let job_snapshot = Arc::clone(&snapshot);
        let job_forecast = forecast.clone();
        let job_request = request.clone();

        let solve = async move {
            let permit = workers.acquire_owned().await.ok();
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine.run(&job_snapshot, &job_forecast, &job_request)
            })
            .await
        };

        match tokio::time::timeout(self.solver_timeout, solve).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!(%error, "fairness worker did not complete");
                self.engine
                    .fallback(&snapshot, &forecast, &request, FallbackReason::Aborted)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.solver_timeout.as_millis() as u64,
                    "fairness optimizer timed out"
                );
                self.engine.fallback(
                    &snapshot,
                    &forecast,
                    &request,
                    FallbackReason::Timeout(self.solver_timeout),
                )
            }
        }
    }
}
