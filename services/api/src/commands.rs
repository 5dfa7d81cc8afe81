use crate::infra::{build_runtime, parse_mode, parse_probability, parse_zone_probability};
use clap::Args;
use flood_dispatch::batch::{BatchOptions, BatchPlan, BatchRunner, ScenarioOutcome};
use flood_dispatch::config::AppConfig;
use flood_dispatch::dispatch::{
    AllocationMode, CatalogSnapshot, DispatchRequest, DispatchResult, ForecastSignal, ZoneId,
};
use flood_dispatch::error::AppError;
use flood_dispatch::telemetry;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct DispatchArgs {
    /// Units in the pool to distribute (0-200)
    #[arg(long)]
    pub(crate) total_units: u32,
    /// Basin-wide flood probability in [0, 1]
    #[arg(long, value_parser = parse_probability)]
    pub(crate) flood_probability: f64,
    /// Allocation strategy: crisp, fuzzy, proportional or fairness
    #[arg(long, default_value = "crisp", value_parser = parse_mode)]
    pub(crate) mode: AllocationMode,
    /// Per-zone probability override, e.g. Z1=0.9 (repeatable)
    #[arg(long = "zone-probability", value_parser = parse_zone_probability)]
    pub(crate) zone_probabilities: Vec<(ZoneId, f64)>,
    /// Forecast lead time in days (1-7)
    #[arg(long = "lead-time", default_value_t = 1)]
    pub(crate) lead_time_days: u8,
    /// Maximum units any single zone may receive
    #[arg(long)]
    pub(crate) zone_cap: Option<u32>,
    /// Use the fairness optimizer regardless of --mode
    #[arg(long)]
    pub(crate) optimize: bool,
    /// Print the full result as JSON instead of a table
    #[arg(long)]
    pub(crate) json: bool,
}

impl DispatchArgs {
    fn forecast(&self) -> ForecastSignal {
        let mut forecast = ForecastSignal::basin_wide(self.flood_probability);
        forecast.lead_time_days = self.lead_time_days;
        for (zone, probability) in &self.zone_probabilities {
            forecast = forecast.with_zone_probability(zone.clone(), *probability);
        }
        forecast
    }

    fn request(&self) -> DispatchRequest {
        DispatchRequest {
            total_units: self.total_units,
            mode: self.mode,
            lead_time_days: self.lead_time_days,
            zone_cap: self.zone_cap,
            optimize: self.optimize,
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct CatalogArgs {
    /// Print the catalog as JSON instead of a table
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct BatchArgs {
    /// JSON plan listing the scenarios to run
    #[arg(long)]
    pub(crate) plan: PathBuf,
    /// Directory receiving per-scenario outputs and run_status.json
    #[arg(long, default_value = "results")]
    pub(crate) results_dir: PathBuf,
}

pub(crate) async fn run_dispatch(args: DispatchArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let runtime = build_runtime(&config)?;

    let result = runtime
        .service
        .dispatch(args.forecast(), args.request())
        .await?;

    if args.json {
        println!("{}", to_pretty_json(&result)?);
    } else {
        render_result(&result);
    }
    Ok(())
}

pub(crate) fn run_catalog(args: CatalogArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let runtime = build_runtime(&config)?;
    let snapshot = runtime.service.catalog();

    if args.json {
        println!("{}", to_pretty_json(snapshot.as_ref())?);
    } else {
        render_catalog(&snapshot);
    }
    Ok(())
}

pub(crate) async fn run_batch(args: BatchArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let runtime = build_runtime(&config)?;

    let plan = BatchPlan::load(&args.plan)?;
    let runner = BatchRunner::new(
        runtime.service,
        BatchOptions {
            results_dir: args.results_dir.clone(),
            plan_path: args.plan,
            dataset_paths: runtime.dataset_paths,
        },
    );
    let status = runner.run(&plan).await?;

    println!(
        "Batch {}: {} passed, {} failed, {} retried",
        status.run_id, status.passed, status.failed, status.retried
    );
    for scenario in &status.scenarios {
        let marker = match scenario.outcome {
            ScenarioOutcome::Passed => "ok",
            ScenarioOutcome::Failed => "FAILED",
        };
        print!("  - {} [{}] attempts={}", scenario.name, marker, scenario.attempts);
        match &scenario.error {
            Some(error) => println!(" ({error})"),
            None => println!(),
        }
    }
    println!("Results written to {}", args.results_dir.display());
    Ok(())
}

fn to_pretty_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(value).map_err(|err| AppError::Io(err.into()))
}

pub(crate) fn render_result(result: &DispatchResult) {
    println!(
        "Dispatch ({} mode{}) | catalog v{} | pf {:.2} | lead time {} day(s)",
        result.mode.label(),
        if result.used_optimizer { ", optimized" } else { "" },
        result.catalog_version,
        result.global_flood_probability,
        result.lead_time_days
    );
    if let Some(level) = result.fairness_level {
        println!("Fairness level (minimum satisfaction): {:.2}", level);
    }

    let resources = &result.resource_metadata;
    print!("{:<4} {:<24} {:<9} {:>5}", "#", "zone", "level", "iz");
    for resource in resources {
        print!(" {:>8}", resource.id.0);
    }
    println!(" {:>6} {:>6}", "total", "sat");

    for zone in result.by_priority() {
        print!(
            "{:<4} {:<24} {:<9} {:>5.2}",
            zone.priority_index,
            truncate(&zone.zone_name, 24),
            zone.impact_level.label(),
            zone.iz
        );
        for resource in resources {
            print!(" {:>8}", zone.units_for(&resource.id));
        }
        println!(" {:>6} {:>6.2}", zone.units_allocated, zone.satisfaction_level);
    }

    let summary = &result.resource_summary;
    println!(
        "Allocated {} of {} units ({} unallocated)",
        summary.total_allocated_units, result.total_units, summary.unallocated_units
    );
    if result.warnings.is_empty() {
        println!("Warnings: none");
    } else {
        println!("Warnings:");
        for warning in &result.warnings {
            println!("  - {}", warning.message);
        }
    }
}

pub(crate) fn render_catalog(snapshot: &CatalogSnapshot) {
    println!("Catalog version {}", snapshot.version());
    println!("Zones:");
    for zone in snapshot.zones() {
        println!(
            "  - {} {} | vulnerability {:.2}{}{}",
            zone.id,
            zone.name,
            zone.vulnerability(),
            if zone.critical_infra { " | critical infrastructure" } else { "" },
            if zone.hospitals > 0 {
                format!(" | {} hospital(s)", zone.hospitals)
            } else {
                String::new()
            }
        );
    }
    println!("Resources:");
    for resource in snapshot.resources() {
        println!(
            "  - {} {}: {} {}",
            resource.id, resource.name, resource.capacity, resource.unit_label
        );
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut shortened: String = value.chars().take(width.saturating_sub(1)).collect();
        shortened.push('~');
        shortened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_build_forecast_and_request() {
        let args = DispatchArgs {
            total_units: 30,
            flood_probability: 0.6,
            mode: AllocationMode::Proportional,
            zone_probabilities: vec![(ZoneId::from("Z2"), 0.1)],
            lead_time_days: 3,
            zone_cap: Some(8),
            optimize: true,
            json: false,
        };

        let forecast = args.forecast();
        assert_eq!(forecast.probability_for(&ZoneId::from("Z2")), 0.1);
        assert_eq!(forecast.probability_for(&ZoneId::from("Z1")), 0.6);
        assert_eq!(forecast.lead_time_days, 3);

        let request = args.request();
        assert_eq!(request.zone_cap, Some(8));
        assert_eq!(request.effective_mode(), AllocationMode::Fairness);
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("Lower Floodplain", 24), "Lower Floodplain");
        assert_eq!(truncate("abcdef", 4), "abc~");
    }
}
