//! Max-min satisfaction allocation.
//!
//! Phase A maximises the common satisfaction level `t`; phase B holds `t`
//! and maximises the units placed. The relaxed solution is rounded down,
//! topped up by largest fractional part, then a local search moves single
//! units towards the least-satisfied zone while that strictly improves the
//! sorted satisfaction vector.
//!
//! Rounding can strand the minimum below what integers allow. When it does,
//! the grid is re-seated from a max-flow assignment at the highest level
//! `k / D_z` (at most the relaxed level) whose per-zone unit targets fit.

use super::grid::AllocationGrid;
use super::{AllocationPlan, PlanContext};
use crate::dispatch::solver::{Constraint, LinearProgram, LinearSolver, SolverError};
use std::cmp::Ordering;
use std::collections::VecDeque;
use tracing::debug;

const LEVEL_SLACK: f64 = 1e-6;
const INTEGRALITY_TOLERANCE: f64 = 1e-7;
const MAX_IMPROVEMENT_STEPS: usize = 10_000;
const SATISFACTION_EPSILON: f64 = 1e-12;

pub(crate) fn allocate_fair(
    context: &PlanContext<'_>,
    solver: &dyn LinearSolver,
) -> Result<AllocationPlan, SolverError> {
    let mut grid = context.grid();
    let cells = decision_cells(&grid);

    if cells.is_empty() || context.total_units == 0 {
        return Ok(AllocationPlan {
            fairness_level: Some(minimum_satisfaction(&grid)),
            grid,
        });
    }

    let level_var = cells.len();

    let mut level_program = formulate(context, &grid, &cells);
    level_program.objective[level_var] = 1.0;
    let level = solver.solve(&level_program)?.values[level_var];

    let mut volume_program = formulate(context, &grid, &cells);
    for objective in volume_program.objective.iter_mut().take(level_var) {
        *objective = 1.0;
    }
    volume_program.push(Constraint::ge(
        vec![(level_var, 1.0)],
        (level - LEVEL_SLACK).max(0.0),
    ));
    let relaxed = solver.solve(&volume_program)?;
    debug!(
        relaxed_level = level,
        relaxed_units = relaxed.objective,
        "fairness relaxation solved"
    );

    round_into(&mut grid, context, &cells, &relaxed.values);
    improve_minimum(&mut grid, context);
    if let Some(seated) = seat_integral_level(context, &grid, level) {
        debug!(
            rounded_level = minimum_satisfaction(&grid),
            seated_level = minimum_satisfaction(&seated),
            "rounded minimum re-seated"
        );
        grid = seated;
        improve_minimum(&mut grid, context);
    }
    let pool = context.total_units.saturating_sub(grid.total());
    grid.fill_remaining(&context.priority, pool);
    improve_minimum(&mut grid, context);

    Ok(AllocationPlan {
        fairness_level: Some(minimum_satisfaction(&grid)),
        grid,
    })
}

/// Cells that can hold units: positive demand and positive capacity.
fn decision_cells(grid: &AllocationGrid) -> Vec<(usize, usize)> {
    (0..grid.zone_count())
        .flat_map(|zone| (0..grid.resource_count()).map(move |resource| (zone, resource)))
        .filter(|(zone, resource)| grid.demand(*zone, *resource) > 0 && grid.capacity(*resource) > 0)
        .collect()
}

/// Variables are one per cell followed by the level `t`.
fn formulate(
    context: &PlanContext<'_>,
    grid: &AllocationGrid,
    cells: &[(usize, usize)],
) -> LinearProgram {
    let level_var = cells.len();
    let mut program = LinearProgram::new(cells.len() + 1);

    for (index, (zone, resource)) in cells.iter().enumerate() {
        program.push(Constraint::le(
            vec![(index, 1.0)],
            f64::from(grid.demand(*zone, *resource)),
        ));
    }

    for resource in 0..grid.resource_count() {
        let terms: Vec<(usize, f64)> = cells
            .iter()
            .enumerate()
            .filter(|(_, (_, cell_resource))| *cell_resource == resource)
            .map(|(index, _)| (index, 1.0))
            .collect();
        if !terms.is_empty() {
            program.push(Constraint::le(terms, f64::from(grid.capacity(resource))));
        }
    }

    program.push(Constraint::le(
        (0..cells.len()).map(|index| (index, 1.0)).collect(),
        f64::from(context.total_units),
    ));

    for zone in 0..grid.zone_count() {
        let terms = zone_terms(cells, zone);
        if terms.is_empty() {
            continue;
        }
        if let Some(cap) = grid.zone_cap() {
            program.push(Constraint::le(terms.clone(), f64::from(cap)));
        }
        let floor = context.floor_target(zone);
        if floor > 0 {
            program.push(Constraint::ge(terms.clone(), f64::from(floor)));
        }
        let requested = grid.zone_demand(zone);
        if requested > 0 {
            // t·D_z − Σ x ≤ 0
            let mut row: Vec<(usize, f64)> = terms
                .into_iter()
                .map(|(index, _)| (index, -1.0))
                .collect();
            row.push((level_var, requested as f64));
            program.push(Constraint::le(row, 0.0));
        }
    }

    program.push(Constraint::le(vec![(level_var, 1.0)], 1.0));
    program
}

fn zone_terms(cells: &[(usize, usize)], zone: usize) -> Vec<(usize, f64)> {
    cells
        .iter()
        .enumerate()
        .filter(|(_, (cell_zone, _))| *cell_zone == zone)
        .map(|(index, _)| (index, 1.0))
        .collect()
}

fn round_into(
    grid: &mut AllocationGrid,
    context: &PlanContext<'_>,
    cells: &[(usize, usize)],
    values: &[f64],
) {
    let mut zone_relaxed = vec![0.0; grid.zone_count()];
    let mut resource_relaxed = vec![0.0; grid.resource_count()];
    let mut fractions = Vec::new();

    for (index, (zone, resource)) in cells.iter().enumerate() {
        let value = values.get(index).copied().unwrap_or(0.0).max(0.0);
        zone_relaxed[*zone] += value;
        resource_relaxed[*resource] += value;

        let whole = (value + INTEGRALITY_TOLERANCE).floor();
        let pool = context.total_units.saturating_sub(grid.total());
        grid.add(*zone, *resource, (whole as u32).min(pool));

        let fraction = value - whole;
        if fraction > INTEGRALITY_TOLERANCE {
            fractions.push((*zone, *resource, fraction));
        }
    }

    fractions.sort_by(|left, right| {
        right
            .2
            .partial_cmp(&left.2)
            .unwrap_or(Ordering::Equal)
            .then(context.rank[left.0].cmp(&context.rank[right.0]))
            .then(left.1.cmp(&right.1))
    });

    for (zone, resource, _) in fractions {
        if grid.total() >= context.total_units {
            break;
        }
        let zone_ceiling = (zone_relaxed[zone] - INTEGRALITY_TOLERANCE).ceil();
        let resource_ceiling = (resource_relaxed[resource] - INTEGRALITY_TOLERANCE).ceil();
        if f64::from(grid.zone_total(zone)) < zone_ceiling
            && f64::from(grid.resource_total(resource)) < resource_ceiling
        {
            grid.add(zone, resource, 1);
        }
    }
}

/// Single-unit moves toward the least-satisfied zones until none helps.
fn improve_minimum(grid: &mut AllocationGrid, context: &PlanContext<'_>) {
    let demanding: Vec<usize> = (0..grid.zone_count())
        .filter(|zone| grid.zone_demand(*zone) > 0)
        .collect();

    for _ in 0..MAX_IMPROVEMENT_STEPS {
        let mut ascending = demanding.clone();
        ascending.sort_by(|left, right| {
            grid.satisfaction(*left)
                .partial_cmp(&grid.satisfaction(*right))
                .unwrap_or(Ordering::Equal)
                .then(context.rank[*left].cmp(&context.rank[*right]))
        });

        let mut moved = false;
        for zone in ascending {
            if grid.satisfaction(zone) < 1.0 && raise_zone(grid, context, zone) {
                moved = true;
                break;
            }
        }
        if !moved {
            return;
        }
    }
}

/// One unit moved from `donor`'s `source` cell into the raised zone's `target` cell.
#[derive(Debug, Clone, Copy)]
struct Transfer {
    donor: usize,
    source: usize,
    target: usize,
    donor_after: f64,
}

impl Transfer {
    /// Richest donor after the move first, then the lowest-priority donor,
    /// then a same-resource move.
    fn beats(&self, other: &Transfer, rank: &[usize]) -> bool {
        if (self.donor_after - other.donor_after).abs() > SATISFACTION_EPSILON {
            return self.donor_after > other.donor_after;
        }
        if self.donor != other.donor {
            return rank[self.donor] > rank[other.donor];
        }
        self.source == self.target && other.source != other.target
    }
}

fn raise_zone(grid: &mut AllocationGrid, context: &PlanContext<'_>, zone: usize) -> bool {
    if grid.zone_room(zone) == 0 {
        return false;
    }

    if grid.total() < context.total_units {
        if let Some(resource) =
            (0..grid.resource_count()).find(|resource| grid.cell_room(zone, *resource) > 0)
        {
            grid.add(zone, resource, 1);
            return true;
        }
    }

    let current = grid.satisfaction(zone);
    let mut best: Option<Transfer> = None;
    for target in 0..grid.resource_count() {
        if grid.units(zone, target) >= grid.demand(zone, target) {
            continue;
        }
        let target_has_capacity = grid.resource_total(target) < grid.capacity(target);
        for donor in 0..grid.zone_count() {
            if donor == zone {
                continue;
            }
            let donor_demand = grid.zone_demand(donor);
            if donor_demand == 0 || grid.zone_total(donor) <= context.floor_target(donor) {
                continue;
            }
            let donor_after = grid.satisfaction(donor) - 1.0 / donor_demand as f64;
            if donor_after <= current + SATISFACTION_EPSILON {
                continue;
            }
            for source in 0..grid.resource_count() {
                // The pool stays the same; the target type needs a free unit
                // unless the donor hands over that very type.
                if grid.units(donor, source) == 0 || !(source == target || target_has_capacity) {
                    continue;
                }
                let candidate = Transfer {
                    donor,
                    source,
                    target,
                    donor_after,
                };
                if best.map_or(true, |best| candidate.beats(&best, &context.rank)) {
                    best = Some(candidate);
                }
            }
        }
    }

    match best {
        Some(transfer) => {
            grid.remove(transfer.donor, transfer.source, 1);
            grid.add(zone, transfer.target, 1);
            true
        }
        None => false,
    }
}

/// Highest integral level above the current minimum, re-seated as a fresh
/// grid holding exactly each zone's unit target. `None` when rounding
/// already reached it.
fn seat_integral_level(
    context: &PlanContext<'_>,
    grid: &AllocationGrid,
    relaxed_level: f64,
) -> Option<AllocationGrid> {
    let current = minimum_satisfaction(grid);
    let mut levels: Vec<f64> = (0..grid.zone_count())
        .map(|zone| grid.zone_demand(zone))
        .filter(|requested| *requested > 0)
        .flat_map(|requested| (0..=requested).map(move |units| units as f64 / requested as f64))
        .filter(|level| {
            *level > current + SATISFACTION_EPSILON && *level <= relaxed_level + LEVEL_SLACK
        })
        .collect();
    levels.sort_by(|left, right| left.partial_cmp(right).unwrap_or(Ordering::Equal));
    levels.dedup_by(|left, right| (*left - *right).abs() <= SATISFACTION_EPSILON);

    // Targets only grow with the level, so feasibility is monotone.
    let mut best = None;
    let (mut low, mut high) = (0, levels.len());
    while low < high {
        let middle = low + (high - low) / 2;
        match seat_level(context, grid, levels[middle]) {
            Some(seated) => {
                best = Some(seated);
                low = middle + 1;
            }
            None => high = middle,
        }
    }
    best
}

/// Gives every zone `max(ceil(level × D_z), floor)` units through a
/// source → zone → resource → sink flow, or `None` if that does not fit.
fn seat_level(
    context: &PlanContext<'_>,
    grid: &AllocationGrid,
    level: f64,
) -> Option<AllocationGrid> {
    let zones = grid.zone_count();
    let resources = grid.resource_count();

    let mut targets = Vec::with_capacity(zones);
    for zone in 0..zones {
        let requested = grid.zone_demand(zone);
        let by_level = if requested > 0 {
            (level * requested as f64 - 1e-9).ceil().max(0.0) as u64
        } else {
            0
        };
        let target = by_level.max(u64::from(context.floor_target(zone)));
        if grid.zone_cap().is_some_and(|cap| target > u64::from(cap)) {
            return None;
        }
        targets.push(target);
    }
    let needed: u64 = targets.iter().sum();
    if needed > u64::from(context.total_units) {
        return None;
    }

    let source = 0;
    let sink = zones + resources + 1;
    let zone_node = |zone: usize| 1 + zone;
    let resource_node = |resource: usize| 1 + zones + resource;

    let mut network = FlowNetwork::new(sink + 1);
    for (zone, target) in targets.iter().enumerate() {
        network.set_capacity(source, zone_node(zone), *target);
        for resource in 0..resources {
            network.set_capacity(
                zone_node(zone),
                resource_node(resource),
                u64::from(grid.demand(zone, resource)),
            );
        }
    }
    for resource in 0..resources {
        network.set_capacity(resource_node(resource), sink, u64::from(grid.capacity(resource)));
    }

    if network.max_flow(source, sink) < needed {
        return None;
    }

    let mut seated = context.grid();
    for zone in 0..zones {
        for resource in 0..resources {
            let units = network.flow(zone_node(zone), resource_node(resource));
            seated.add(zone, resource, units.min(u64::from(u32::MAX)) as u32);
        }
    }
    Some(seated)
}

/// Dense Edmonds-Karp network; the graphs here have a handful of nodes.
struct FlowNetwork {
    capacity: Vec<Vec<u64>>,
    flow: Vec<Vec<i64>>,
}

impl FlowNetwork {
    fn new(nodes: usize) -> Self {
        Self {
            capacity: vec![vec![0; nodes]; nodes],
            flow: vec![vec![0; nodes]; nodes],
        }
    }

    fn set_capacity(&mut self, from: usize, to: usize, capacity: u64) {
        self.capacity[from][to] = capacity;
    }

    fn residual(&self, from: usize, to: usize) -> i64 {
        self.capacity[from][to].min(i64::MAX as u64) as i64 - self.flow[from][to]
    }

    fn flow(&self, from: usize, to: usize) -> u64 {
        self.flow[from][to].max(0) as u64
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> u64 {
        let nodes = self.capacity.len();
        let mut total = 0;
        loop {
            let mut parent: Vec<Option<usize>> = vec![None; nodes];
            parent[source] = Some(source);
            let mut queue = VecDeque::from([source]);
            while let Some(node) = queue.pop_front() {
                if node == sink {
                    break;
                }
                for next in 0..nodes {
                    if parent[next].is_none() && self.residual(node, next) > 0 {
                        parent[next] = Some(node);
                        queue.push_back(next);
                    }
                }
            }
            if parent[sink].is_none() {
                return total;
            }

            let path = augmenting_path(&parent, source, sink);
            let bottleneck = path
                .iter()
                .map(|(from, to)| self.residual(*from, *to))
                .min()
                .unwrap_or(0);
            if bottleneck <= 0 {
                return total;
            }
            for (from, to) in path {
                self.flow[from][to] += bottleneck;
                self.flow[to][from] -= bottleneck;
            }
            total += bottleneck as u64;
        }
    }
}

/// Edges from `source` to `sink` recovered from BFS parents, sink end first.
fn augmenting_path(parent: &[Option<usize>], source: usize, sink: usize) -> Vec<(usize, usize)> {
    let mut path = Vec::new();
    let mut node = sink;
    while node != source {
        match parent[node] {
            Some(previous) => {
                path.push((previous, node));
                node = previous;
            }
            None => return Vec::new(),
        }
    }
    path
}

/// Lowest satisfaction among zones that requested anything; 1 when none did.
fn minimum_satisfaction(grid: &AllocationGrid) -> f64 {
    (0..grid.zone_count())
        .filter(|zone| grid.zone_demand(*zone) > 0)
        .map(|zone| grid.satisfaction(zone))
        .fold(1.0_f64, f64::min)
}
