use super::catalog::ZoneId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scenario tag attached by the forecasting subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioTag {
    BestCase,
    #[default]
    Normal,
    WorstCase,
}

impl ScenarioTag {
    pub fn label(&self) -> &'static str {
        match self {
            ScenarioTag::BestCase => "best case",
            ScenarioTag::Normal => "normal",
            ScenarioTag::WorstCase => "worst case",
        }
    }
}

/// Predicted river level with its 80% interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelForecast {
    pub value: f64,
    pub lower_80: f64,
    pub upper_80: f64,
}

/// Output of the external forecasting collaborator, consumed as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSignal {
    pub flood_probability: f64,
    #[serde(default)]
    pub predicted_level: Option<LevelForecast>,
    #[serde(default = "default_lead_time")]
    pub lead_time_days: u8,
    #[serde(default)]
    pub scenario: ScenarioTag,
    /// Zone-specific probabilities overriding the basin-wide value.
    #[serde(default)]
    pub zone_probabilities: BTreeMap<ZoneId, f64>,
}

fn default_lead_time() -> u8 {
    1
}

impl ForecastSignal {
    pub fn basin_wide(flood_probability: f64) -> Self {
        Self {
            flood_probability,
            predicted_level: None,
            lead_time_days: default_lead_time(),
            scenario: ScenarioTag::Normal,
            zone_probabilities: BTreeMap::new(),
        }
    }

    pub fn with_zone_probability(mut self, zone: impl Into<ZoneId>, probability: f64) -> Self {
        self.zone_probabilities.insert(zone.into(), probability);
        self
    }

    /// Probability applying to `zone`, falling back to the basin-wide value.
    pub fn probability_for(&self, zone: &ZoneId) -> f64 {
        self.zone_probabilities
            .get(zone)
            .copied()
            .unwrap_or(self.flood_probability)
    }
}
