//! Impact classification: flood probability × zone vulnerability → band.

use super::catalog::{ZoneId, ZoneProfile};
use super::forecast::ForecastSignal;
use serde::{Deserialize, Serialize};

const ADVISORY_THRESHOLD: f64 = 0.3;
const WARNING_THRESHOLD: f64 = 0.6;
const CRITICAL_THRESHOLD: f64 = 0.8;

const ADVISORY_SHARE: f64 = 0.10;
const WARNING_SHARE: f64 = 0.30;
const CRITICAL_SHARE: f64 = 0.50;
const CRITICAL_INFRA_BONUS: f64 = 0.10;

/// Discrete impact band, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    Normal,
    Advisory,
    Warning,
    Critical,
}

impl ImpactLevel {
    /// Half-open banding of the impact score.
    pub fn from_score(iz: f64) -> Self {
        let iz = clamp_unit(iz);
        if iz < ADVISORY_THRESHOLD {
            ImpactLevel::Normal
        } else if iz < WARNING_THRESHOLD {
            ImpactLevel::Advisory
        } else if iz < CRITICAL_THRESHOLD {
            ImpactLevel::Warning
        } else {
            ImpactLevel::Critical
        }
    }

    /// Fraction of the pool a zone in this band is entitled to.
    pub fn base_share(&self, critical_infra: bool) -> f64 {
        match self {
            ImpactLevel::Normal => 0.0,
            ImpactLevel::Advisory => ADVISORY_SHARE,
            ImpactLevel::Warning => WARNING_SHARE,
            ImpactLevel::Critical => critical_share(critical_infra),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImpactLevel::Normal => "NORMAL",
            ImpactLevel::Advisory => "ADVISORY",
            ImpactLevel::Warning => "WARNING",
            ImpactLevel::Critical => "CRITICAL",
        }
    }
}

fn critical_share(critical_infra: bool) -> f64 {
    if critical_infra {
        (CRITICAL_SHARE + CRITICAL_INFRA_BONUS).min(1.0)
    } else {
        CRITICAL_SHARE
    }
}

/// Per-zone classification result. Ephemeral, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactAssessment {
    pub zone_id: ZoneId,
    pub pf: f64,
    pub vulnerability: f64,
    pub iz: f64,
    pub impact_level: ImpactLevel,
    pub base_share: f64,
    pub critical_infra: bool,
}

impl ImpactAssessment {
    pub fn is_critical_at_risk(&self) -> bool {
        self.critical_infra && self.impact_level != ImpactLevel::Normal
    }
}

/// Clamp into [0,1]; NaN collapses to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn classify(
    zone_id: ZoneId,
    pf: f64,
    vulnerability: f64,
    critical_infra: bool,
) -> ImpactAssessment {
    let pf = clamp_unit(pf);
    let vulnerability = clamp_unit(vulnerability);
    let iz = pf * vulnerability;
    let impact_level = ImpactLevel::from_score(iz);

    ImpactAssessment {
        zone_id,
        pf,
        vulnerability,
        iz,
        impact_level,
        base_share: impact_level.base_share(critical_infra),
        critical_infra,
    }
}

pub fn assess_zone(zone: &ZoneProfile, forecast: &ForecastSignal) -> ImpactAssessment {
    classify(
        zone.id.clone(),
        forecast.probability_for(&zone.id),
        zone.vulnerability(),
        zone.critical_infra,
    )
}

/// Continuous counterpart of [`ImpactLevel::base_share`] used by fuzzy mode.
///
/// Trapezoidal memberships overlap around each band boundary; the result is
/// the membership-weighted mean of the band shares, so it equals the crisp
/// share well inside a band and ramps smoothly across the cut-offs.
pub fn fuzzy_share(iz: f64, critical_infra: bool) -> f64 {
    let iz = clamp_unit(iz);
    let memberships = [
        (falling(iz, 0.20, 0.35), 0.0),
        (trapezoid(iz, 0.20, 0.35, 0.50, 0.65), ADVISORY_SHARE),
        (trapezoid(iz, 0.50, 0.65, 0.75, 0.85), WARNING_SHARE),
        (rising(iz, 0.75, 0.85), critical_share(critical_infra)),
    ];

    let total: f64 = memberships.iter().map(|(mu, _)| mu).sum();
    if total <= 0.0 {
        return 0.0;
    }
    memberships.iter().map(|(mu, share)| mu * share).sum::<f64>() / total
}

fn rising(x: f64, start: f64, end: f64) -> f64 {
    if x <= start {
        0.0
    } else if x >= end {
        1.0
    } else {
        (x - start) / (end - start)
    }
}

fn falling(x: f64, start: f64, end: f64) -> f64 {
    1.0 - rising(x, start, end)
}

fn trapezoid(x: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    rising(x, a, b).min(falling(x, c, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges_are_half_open() {
        assert_eq!(ImpactLevel::from_score(0.2999), ImpactLevel::Normal);
        assert_eq!(ImpactLevel::from_score(0.3), ImpactLevel::Advisory);
        assert_eq!(ImpactLevel::from_score(0.6), ImpactLevel::Warning);
        assert_eq!(ImpactLevel::from_score(0.8), ImpactLevel::Critical);
        assert_eq!(ImpactLevel::from_score(1.0), ImpactLevel::Critical);
    }

    #[test]
    fn critical_infra_bonus_only_lifts_critical_band() {
        assert_eq!(ImpactLevel::Critical.base_share(true), 0.6);
        assert_eq!(ImpactLevel::Critical.base_share(false), 0.5);
        assert_eq!(ImpactLevel::Warning.base_share(true), 0.3);
        assert_eq!(ImpactLevel::Normal.base_share(true), 0.0);
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let assessment = classify(ZoneId::from("Z1"), 1.2, -0.1, false);
        assert_eq!(assessment.pf, 1.0);
        assert_eq!(assessment.vulnerability, 0.0);
        assert_eq!(assessment.iz, 0.0);

        let nan = classify(ZoneId::from("Z2"), f64::NAN, 0.5, false);
        assert_eq!(nan.impact_level, ImpactLevel::Normal);
    }

    #[test]
    fn scenario_a_zone_is_critical() {
        let assessment = classify(ZoneId::from("Z1"), 0.9, 0.9, true);
        assert!((assessment.iz - 0.81).abs() < 1e-12);
        assert_eq!(assessment.impact_level, ImpactLevel::Critical);
        assert_eq!(assessment.base_share, 0.6);
        assert!(assessment.is_critical_at_risk());
    }

    #[test]
    fn fuzzy_share_matches_bands_inside_them() {
        assert_eq!(fuzzy_share(0.1, false), 0.0);
        assert!((fuzzy_share(0.4, false) - 0.1).abs() < 1e-12);
        assert!((fuzzy_share(0.7, false) - 0.3).abs() < 1e-12);
        assert!((fuzzy_share(0.9, true) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn fuzzy_share_is_monotone() {
        let mut previous = 0.0;
        for step in 0..=1000 {
            let share = fuzzy_share(step as f64 / 1000.0, false);
            assert!(share + 1e-12 >= previous, "share dropped at step {step}");
            previous = share;
        }
    }
}
