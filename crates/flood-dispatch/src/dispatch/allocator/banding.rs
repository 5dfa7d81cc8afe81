use super::grid::{largest_remainder, round_half_up};
use super::{AllocationPlan, PlanContext};

/// Share-driven allocation used by crisp, fuzzy and proportional modes.
pub(crate) fn allocate_banded(context: &PlanContext<'_>) -> AllocationPlan {
    let shares: Vec<f64> = context.zones.iter().map(|zone| zone.share).collect();
    let mut entitled = entitlements(context.total_units, &shares);
    if let Some(cap) = context.zone_cap {
        entitled.iter_mut().for_each(|units| *units = (*units).min(cap));
    }
    raise_critical_floors(context, &mut entitled);

    let mut grid = context.grid();

    for &zone in &context.priority {
        let floor = context.floor_target(zone).min(entitled[zone]);
        if floor > 0 {
            grid.place(zone, floor, &context.weights(zone));
        }
    }

    for &zone in &context.priority {
        let outstanding = entitled[zone].saturating_sub(grid.zone_total(zone));
        if outstanding > 0 {
            grid.place(zone, outstanding, &context.weights(zone));
        }
    }

    let pool = context.total_units.saturating_sub(grid.total());
    grid.fill_remaining(&context.priority, pool);

    AllocationPlan {
        grid,
        fairness_level: None,
    }
}

/// Per-zone entitlement: `round_half_up(total × share)`.
///
/// Over-committed pools are re-apportioned on the raw shares. Units left
/// over (zones with zero share, rounding) go to entitled zones in
/// proportion to what they already hold.
pub(crate) fn entitlements(total: u32, shares: &[f64]) -> Vec<u32> {
    let rounded: Vec<u32> = shares
        .iter()
        .map(|share| round_half_up(f64::from(total) * share))
        .collect();
    let committed: u64 = rounded.iter().map(|units| u64::from(*units)).sum();

    if committed > u64::from(total) {
        return largest_remainder(total, shares);
    }

    let freed = total - committed as u32;
    if freed == 0 {
        return rounded;
    }

    let weights: Vec<f64> = if committed > 0 {
        rounded.iter().map(|units| f64::from(*units)).collect()
    } else {
        shares.to_vec()
    };
    let extra = largest_remainder(freed, &weights);
    rounded
        .into_iter()
        .zip(extra)
        .map(|(base, bonus)| base + bonus)
        .collect()
}

/// Moves entitlement onto at-risk critical-infrastructure zones that would
/// otherwise fall under the floor, taking from the largest holder first.
fn raise_critical_floors(context: &PlanContext<'_>, entitled: &mut [u32]) {
    let committed: u32 = entitled.iter().sum();
    let mut slack = context.total_units.saturating_sub(committed);

    for &zone in &context.priority {
        let target = context.floor_target(zone);
        while entitled[zone] < target {
            if slack > 0 {
                slack -= 1;
                entitled[zone] += 1;
                continue;
            }
            let donor = (0..entitled.len())
                .filter(|other| *other != zone && entitled[*other] > context.floor_target(*other))
                .max_by(|left, right| {
                    entitled[*left]
                        .cmp(&entitled[*right])
                        .then(context.rank[*left].cmp(&context.rank[*right]))
                });
            match donor {
                Some(other) => {
                    entitled[other] -= 1;
                    entitled[zone] += 1;
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_critical_zone_absorbs_freed_units() {
        assert_eq!(entitlements(10, &[0.6, 0.0]), vec![10, 0]);
    }

    #[test]
    fn over_committed_shares_are_reapportioned() {
        // 3 × round(10 × 0.5) = 15 > 10
        assert_eq!(entitlements(10, &[0.5, 0.5, 0.5]), vec![4, 3, 3]);
    }

    #[test]
    fn leftovers_follow_existing_entitlement() {
        // 20 × 0.3 = 6, 20 × 0.1 = 2, 12 freed → 9 and 3
        assert_eq!(entitlements(20, &[0.3, 0.1, 0.0]), vec![15, 5, 0]);
    }

    #[test]
    fn tiny_shares_fall_back_to_share_weights() {
        // both round to zero, so the whole pool follows the shares
        assert_eq!(entitlements(3, &[0.1, 0.05]), vec![2, 1]);
    }

    #[test]
    fn zero_shares_entitle_nobody() {
        assert_eq!(entitlements(10, &[0.0, 0.0]), vec![0, 0]);
        assert_eq!(entitlements(0, &[0.5]), vec![0]);
    }
}
