//! Offline scenario runs.
//!
//! A JSON plan lists named scenarios (forecast plus request). Each scenario
//! is dispatched against the live catalog, retried on business-rule
//! failures, and written to `<results>/<scenario>/` as `allocation.json`,
//! `allocation.csv` and `provenance.json`. A `run_status.json` at the
//! results root summarises the whole run.

mod provenance;

pub use provenance::{sha256_hex, source_revision, FileDigest, ProvenanceManifest};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::dispatch::{
    DispatchError, DispatchRequest, DispatchResult, DispatchService, ForecastSignal,
};

pub const RUN_STATUS_FILE: &str = "run_status.json";
pub const ALLOCATION_JSON: &str = "allocation.json";
pub const ALLOCATION_CSV: &str = "allocation.csv";
pub const PROVENANCE_FILE: &str = "provenance.json";

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid batch plan: {0}")]
    Plan(#[from] serde_json::Error),
    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("batch plan has no scenarios")]
    EmptyPlan,
    #[error("scenario name '{0}' must be a plain, non-empty file name")]
    InvalidScenarioName(String),
    #[error("scenario '{0}' appears more than once")]
    DuplicateScenario(String),
}

fn default_max_retries() -> u32 {
    2
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    pub forecast: ForecastSignal,
    #[serde(flatten)]
    pub request: DispatchRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    /// Extra attempts after a business-rule failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Scenarios dispatched concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    pub scenarios: Vec<ScenarioSpec>,
}

impl BatchPlan {
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let raw = fs::read(path).map_err(|source| BatchError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let plan: Self = serde_json::from_slice(&raw)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.scenarios.is_empty() {
            return Err(BatchError::EmptyPlan);
        }
        let mut seen = BTreeSet::new();
        for scenario in &self.scenarios {
            let name = scenario.name.trim();
            let plain = !name.is_empty()
                && name != "."
                && name != ".."
                && !name.contains(['/', '\\'])
                && name != RUN_STATUS_FILE;
            if !plain {
                return Err(BatchError::InvalidScenarioName(scenario.name.clone()));
            }
            if !seen.insert(name) {
                return Err(BatchError::DuplicateScenario(scenario.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStatus {
    pub name: String,
    pub outcome: ScenarioOutcome,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioStatus {
    fn failed(name: &str, attempts: u32, error: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            outcome: ScenarioOutcome::Failed,
            attempts,
            catalog_version: None,
            output_dir: None,
            error: Some(error.to_string()),
        }
    }

    pub fn retried(&self) -> bool {
        self.attempts > 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_revision: Option<String>,
    pub passed: usize,
    pub failed: usize,
    pub retried: usize,
    /// Plan order.
    pub scenarios: Vec<ScenarioStatus>,
}

impl RunStatus {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Where a run reads its inputs from and writes its outputs to.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub results_dir: PathBuf,
    pub plan_path: PathBuf,
    /// Catalog source files; empty when the catalog was built in memory.
    pub dataset_paths: Vec<PathBuf>,
}

struct RunContext {
    results_dir: PathBuf,
    config: FileDigest,
    inputs: Vec<FileDigest>,
    source_revision: Option<String>,
    max_retries: u32,
}

pub struct BatchRunner {
    service: Arc<DispatchService>,
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(service: Arc<DispatchService>, options: BatchOptions) -> Self {
        Self { service, options }
    }

    pub async fn run(&self, plan: &BatchPlan) -> Result<RunStatus, BatchError> {
        plan.validate()?;
        let started_at = Utc::now();
        let run_id = format!("run-{}", started_at.format("%Y%m%dT%H%M%S%.3fZ"));

        let results_dir = self.options.results_dir.clone();
        fs::create_dir_all(&results_dir).map_err(|source| BatchError::Write {
            path: results_dir.clone(),
            source,
        })?;

        let inputs = if self.options.dataset_paths.is_empty() {
            let snapshot = self.service.catalog();
            vec![FileDigest::of_bytes(
                "builtin:catalog",
                &serde_json::to_vec(snapshot.as_ref())?,
            )]
        } else {
            self.options
                .dataset_paths
                .iter()
                .map(|path| FileDigest::of_file(path))
                .collect::<Result<Vec<_>, _>>()?
        };

        let context = Arc::new(RunContext {
            results_dir,
            config: FileDigest::of_file(&self.options.plan_path)?,
            inputs,
            source_revision: source_revision(),
            max_retries: plan.max_retries,
        });

        info!(
            run_id = %run_id,
            scenarios = plan.scenarios.len(),
            workers = plan.workers,
            "starting batch run"
        );

        let permits = Arc::new(Semaphore::new(plan.workers.max(1)));
        let mut handles = Vec::with_capacity(plan.scenarios.len());
        for spec in plan.scenarios.iter().cloned() {
            let permits = Arc::clone(&permits);
            let service = Arc::clone(&self.service);
            let context = Arc::clone(&context);
            let name = spec.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                run_scenario(&service, &context, spec).await
            });
            handles.push((name, handle));
        }

        let mut scenarios = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let status = match handle.await {
                Ok(status) => status,
                Err(error) => ScenarioStatus::failed(&name, 0, format!("worker aborted: {error}")),
            };
            scenarios.push(status);
        }

        let passed = scenarios
            .iter()
            .filter(|status| status.outcome == ScenarioOutcome::Passed)
            .count();
        let status = RunStatus {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_revision: context.source_revision.clone(),
            passed,
            failed: scenarios.len() - passed,
            retried: scenarios.iter().filter(|status| status.retried()).count(),
            scenarios,
        };

        let status_path = context.results_dir.join(RUN_STATUS_FILE);
        write_file(&status_path, &serde_json::to_vec_pretty(&status)?)?;
        info!(
            run_id = %status.run_id,
            passed = status.passed,
            failed = status.failed,
            retried = status.retried,
            "batch run finished"
        );
        Ok(status)
    }
}

async fn run_scenario(
    service: &DispatchService,
    context: &RunContext,
    spec: ScenarioSpec,
) -> ScenarioStatus {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match service
            .dispatch(spec.forecast.clone(), spec.request.clone())
            .await
        {
            Ok(result) => {
                let dir = context.results_dir.join(&spec.name);
                return match write_outputs(&dir, context, &spec, &result, attempts) {
                    Ok(()) => {
                        info!(scenario = %spec.name, attempts, "scenario passed");
                        ScenarioStatus {
                            name: spec.name.clone(),
                            outcome: ScenarioOutcome::Passed,
                            attempts,
                            catalog_version: Some(result.catalog_version),
                            output_dir: Some(dir.display().to_string()),
                            error: None,
                        }
                    }
                    Err(error) => {
                        warn!(scenario = %spec.name, %error, "failed to write outputs");
                        ScenarioStatus::failed(&spec.name, attempts, error)
                    }
                };
            }
            Err(DispatchError::BusinessRule(error)) if attempts <= context.max_retries => {
                warn!(
                    scenario = %spec.name,
                    attempts,
                    rule = %error.rule,
                    "business rule failed, retrying against a fresh catalog snapshot"
                );
            }
            Err(error) => {
                warn!(scenario = %spec.name, attempts, %error, "scenario failed");
                return ScenarioStatus::failed(&spec.name, attempts, error);
            }
        }
    }
}

fn write_outputs(
    dir: &Path,
    context: &RunContext,
    spec: &ScenarioSpec,
    result: &DispatchResult,
    attempts: u32,
) -> Result<(), BatchError> {
    fs::create_dir_all(dir).map_err(|source| BatchError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let json = serde_json::to_vec_pretty(result)?;
    write_file(&dir.join(ALLOCATION_JSON), &json)?;

    let csv = allocation_csv(result)?;
    write_file(&dir.join(ALLOCATION_CSV), &csv)?;

    let manifest = ProvenanceManifest {
        scenario: spec.name.clone(),
        generated_at: Utc::now(),
        source_revision: context.source_revision.clone(),
        config: context.config.clone(),
        inputs: context.inputs.clone(),
        catalog_version: result.catalog_version,
        mode: result.mode,
        used_optimizer: result.used_optimizer,
        attempts,
        outputs: vec![
            FileDigest::of_bytes(ALLOCATION_JSON, &json),
            FileDigest::of_bytes(ALLOCATION_CSV, &csv),
        ],
    };
    write_file(
        &dir.join(PROVENANCE_FILE),
        &serde_json::to_vec_pretty(&manifest)?,
    )
}

#[derive(Debug, Serialize)]
struct AllocationRow<'a> {
    zone_id: &'a str,
    zone_name: &'a str,
    impact_level: &'static str,
    priority_index: usize,
    resource_id: &'a str,
    units: u32,
    necessity: f64,
    demand: u32,
    satisfaction: f64,
}

/// One row per zone and resource type, in catalog order.
pub fn allocation_csv(result: &DispatchResult) -> Result<Vec<u8>, BatchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for zone in &result.zones {
        for resource in &result.resource_metadata {
            writer.serialize(AllocationRow {
                zone_id: &zone.zone_id.0,
                zone_name: &zone.zone_name,
                impact_level: zone.impact_level.label(),
                priority_index: zone.priority_index,
                resource_id: &resource.id.0,
                units: zone.units_for(&resource.id),
                necessity: zone.score_for(&resource.id),
                demand: zone.demand_for(&resource.id),
                satisfaction: zone.satisfaction_level,
            })?;
        }
    }
    writer
        .into_inner()
        .map_err(|error| BatchError::Csv(error.into_error().into()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BatchError> {
    fs::write(path, bytes).map_err(|source| BatchError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(names: &[&str]) -> BatchPlan {
        BatchPlan {
            max_retries: 1,
            workers: 1,
            scenarios: names
                .iter()
                .map(|name| ScenarioSpec {
                    name: name.to_string(),
                    forecast: ForecastSignal::basin_wide(0.5),
                    request: DispatchRequest::new(5, Default::default()),
                })
                .collect(),
        }
    }

    #[test]
    fn rejects_unsafe_or_duplicate_names() {
        assert!(matches!(plan(&[]).validate(), Err(BatchError::EmptyPlan)));
        assert!(matches!(
            plan(&["../escape"]).validate(),
            Err(BatchError::InvalidScenarioName(_))
        ));
        assert!(matches!(
            plan(&["wet", "wet"]).validate(),
            Err(BatchError::DuplicateScenario(_))
        ));
        assert!(plan(&["wet", "dry"]).validate().is_ok());
    }

    #[test]
    fn plan_fields_default() {
        let plan: BatchPlan = serde_json::from_str(
            r#"{"scenarios":[{"name":"s1","forecast":{"flood_probability":0.4},"total_units":8}]}"#,
        )
        .expect("valid plan");
        assert_eq!(plan.max_retries, 2);
        assert_eq!(plan.workers, 2);
        assert_eq!(plan.scenarios[0].request.total_units, 8);
    }
}
