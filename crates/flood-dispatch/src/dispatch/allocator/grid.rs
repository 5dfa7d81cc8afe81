/// Round to nearest, ties up, tolerant of representation error (2.4999999 → 3).
pub(crate) fn round_half_up(value: f64) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value + 0.5 + 1e-9).floor().min(f64::from(u32::MAX)) as u32
}

/// Hamilton apportionment of `total` over non-negative `weights`.
///
/// Floors of the exact quotas first, then one extra unit per entry in order
/// of descending remainder; equal remainders favour the lower index.
pub(crate) fn largest_remainder(total: u32, weights: &[f64]) -> Vec<u32> {
    let mut allotted = vec![0u32; weights.len()];
    let sum: f64 = weights
        .iter()
        .filter(|weight| weight.is_finite() && **weight > 0.0)
        .sum();
    if total == 0 || sum <= 0.0 {
        return allotted;
    }

    let mut remainders = Vec::with_capacity(weights.len());
    let mut assigned: u64 = 0;
    for (index, weight) in weights.iter().enumerate() {
        if !weight.is_finite() || *weight <= 0.0 {
            continue;
        }
        let quota = f64::from(total) * weight / sum;
        let floor = quota.floor();
        allotted[index] = floor as u32;
        assigned += floor as u64;
        remainders.push((index, quota - floor));
    }

    remainders.sort_by(|left, right| {
        right
            .1
            .partial_cmp(&left.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(left.0.cmp(&right.0))
    });

    let mut leftover = u64::from(total).saturating_sub(assigned);
    for (index, _) in remainders.iter().cycle().take(remainders.len() * 2) {
        if leftover == 0 {
            break;
        }
        allotted[*index] += 1;
        leftover -= 1;
    }

    allotted
}

/// Zone × resource unit matrix bounded by demand, capacity and an optional zone cap.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AllocationGrid {
    units: Vec<Vec<u32>>,
    demand: Vec<Vec<u32>>,
    capacity: Vec<u32>,
    used: Vec<u32>,
    zone_cap: Option<u32>,
}

impl AllocationGrid {
    pub(crate) fn new(demand: Vec<Vec<u32>>, capacity: Vec<u32>, zone_cap: Option<u32>) -> Self {
        let resources = capacity.len();
        let units = demand.iter().map(|_| vec![0; resources]).collect();
        Self {
            units,
            demand,
            used: vec![0; resources],
            capacity,
            zone_cap,
        }
    }

    pub(crate) fn zone_count(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn resource_count(&self) -> usize {
        self.capacity.len()
    }

    pub(crate) fn units(&self, zone: usize, resource: usize) -> u32 {
        self.units[zone][resource]
    }

    pub(crate) fn demand(&self, zone: usize, resource: usize) -> u32 {
        self.demand[zone][resource]
    }

    pub(crate) fn zone_demand(&self, zone: usize) -> u64 {
        self.demand[zone].iter().map(|units| u64::from(*units)).sum()
    }

    pub(crate) fn capacity(&self, resource: usize) -> u32 {
        self.capacity[resource]
    }

    pub(crate) fn zone_cap(&self) -> Option<u32> {
        self.zone_cap
    }

    pub(crate) fn zone_total(&self, zone: usize) -> u32 {
        self.units[zone].iter().sum()
    }

    pub(crate) fn resource_total(&self, resource: usize) -> u32 {
        self.used[resource]
    }

    pub(crate) fn total(&self) -> u32 {
        self.used.iter().sum()
    }

    pub(crate) fn zone_room(&self, zone: usize) -> u32 {
        match self.zone_cap {
            Some(cap) => cap.saturating_sub(self.zone_total(zone)),
            None => u32::MAX,
        }
    }

    /// Units a cell can still take before hitting demand, capacity or the zone cap.
    pub(crate) fn cell_room(&self, zone: usize, resource: usize) -> u32 {
        let demand_room = self.demand[zone][resource].saturating_sub(self.units[zone][resource]);
        let capacity_room = self.capacity[resource].saturating_sub(self.used[resource]);
        demand_room.min(capacity_room).min(self.zone_room(zone))
    }

    /// Adds up to `units`, returning how many fit.
    pub(crate) fn add(&mut self, zone: usize, resource: usize, units: u32) -> u32 {
        let placed = units.min(self.cell_room(zone, resource));
        self.units[zone][resource] += placed;
        self.used[resource] += placed;
        placed
    }

    pub(crate) fn remove(&mut self, zone: usize, resource: usize, units: u32) -> u32 {
        let removed = units.min(self.units[zone][resource]);
        self.units[zone][resource] -= removed;
        self.used[resource] -= removed;
        removed
    }

    /// Places `units` for `zone` split across resources by `weights`,
    /// re-splitting whatever does not fit until nothing more can be placed.
    pub(crate) fn place(&mut self, zone: usize, mut units: u32, weights: &[f64]) -> u32 {
        let mut placed = 0;
        while units > 0 {
            let masked: Vec<f64> = (0..self.resource_count())
                .map(|resource| {
                    if self.cell_room(zone, resource) > 0 {
                        weights.get(resource).copied().unwrap_or(0.0)
                    } else {
                        0.0
                    }
                })
                .collect();
            let split = largest_remainder(units, &masked);

            let mut round = 0;
            for (resource, share) in split.into_iter().enumerate() {
                if share > 0 {
                    round += self.add(zone, resource, share);
                }
            }
            if round == 0 {
                break;
            }
            placed += round;
            units -= round;
        }
        placed
    }

    /// Greedy top-up: visits zones in `order` and fills every cell with room.
    pub(crate) fn fill_remaining(&mut self, order: &[usize], mut pool: u32) -> u32 {
        let mut placed = 0;
        for &zone in order {
            for resource in 0..self.resource_count() {
                if pool == 0 {
                    return placed;
                }
                let added = self.add(zone, resource, pool);
                pool -= added;
                placed += added;
            }
        }
        placed
    }

    /// Satisfaction of `zone` against its demand row; 1 when nothing is requested.
    pub(crate) fn satisfaction(&self, zone: usize) -> f64 {
        let requested = self.zone_demand(zone);
        if requested == 0 {
            return 1.0;
        }
        let fulfilled: u64 = self.units[zone]
            .iter()
            .zip(self.demand[zone].iter())
            .map(|(units, demand)| u64::from((*units).min(*demand)))
            .sum();
        fulfilled as f64 / requested as f64
    }
}
