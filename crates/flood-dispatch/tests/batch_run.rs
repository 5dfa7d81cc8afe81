use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flood_dispatch::batch::{
    sha256_hex, BatchOptions, BatchPlan, BatchRunner, ProvenanceManifest, RunStatus,
    ScenarioOutcome, ALLOCATION_CSV, ALLOCATION_JSON, PROVENANCE_FILE, RUN_STATUS_FILE,
};
use flood_dispatch::dispatch::{
    CatalogSnapshot, CatalogStore, DispatchEngine, DispatchPolicy, DispatchResult,
    DispatchService, FeatureWeights, ResourceId, ResourceType, RiskFeatures, ZoneId, ZoneProfile,
};

const PLAN: &str = r#"{
  "workers": 2,
  "max_retries": 1,
  "scenarios": [
    {
      "name": "spring-melt",
      "forecast": { "flood_probability": 0.5, "zone_probabilities": { "Z1": 0.9, "Z2": 0.2 } },
      "total_units": 10,
      "mode": "crisp"
    },
    {
      "name": "fair-share",
      "forecast": { "flood_probability": 0.9 },
      "total_units": 12,
      "mode": "fairness"
    },
    {
      "name": "oversized",
      "forecast": { "flood_probability": 0.9 },
      "total_units": 500
    }
  ]
}"#;

fn zone(id: &str, vulnerability: f64, critical_infra: bool) -> ZoneProfile {
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

fn service() -> Arc<DispatchService> {
    let resources = ["pump", "sandbag", "crew", "vehicle"]
        .into_iter()
        .map(|id| ResourceType {
            id: ResourceId::from(id),
            name: id.to_string(),
            unit_label: "units".to_string(),
            description: String::new(),
            capacity: 20,
        })
        .collect();
    let catalog = CatalogSnapshot::new(
        1,
        vec![zone("Z1", 0.9, true), zone("Z2", 0.3, false)],
        resources,
    )
    .expect("valid catalog");

    Arc::new(DispatchService::with_limits(
        Arc::new(CatalogStore::new(catalog)),
        Arc::new(DispatchEngine::new(DispatchPolicy::default())),
        2,
        Duration::from_secs(5),
    ))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    let raw = fs::read(path).unwrap_or_else(|error| panic!("read {}: {error}", path.display()));
    serde_json::from_slice(&raw).expect("valid json")
}

#[tokio::test]
async fn batch_run_writes_outputs_and_provenance() {
    let workspace = tempfile::tempdir().expect("temp dir");
    let plan_path = workspace.path().join("plan.json");
    fs::write(&plan_path, PLAN).expect("write plan");
    let results_dir = workspace.path().join("results");

    let plan = BatchPlan::load(&plan_path).expect("plan loads");
    let runner = BatchRunner::new(
        service(),
        BatchOptions {
            results_dir: results_dir.clone(),
            plan_path: plan_path.clone(),
            dataset_paths: Vec::new(),
        },
    );

    let status = runner.run(&plan).await.expect("run completes");
    assert_eq!(status.passed, 2);
    assert_eq!(status.failed, 1);
    assert_eq!(status.retried, 0);
    assert!(!status.succeeded());
    let names: Vec<&str> = status.scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["spring-melt", "fair-share", "oversized"]);

    let oversized = &status.scenarios[2];
    assert_eq!(oversized.outcome, ScenarioOutcome::Failed);
    assert_eq!(oversized.attempts, 1, "request errors are not retried");
    assert!(oversized
        .error
        .as_deref()
        .is_some_and(|error| error.contains("total_units")));
    assert!(!results_dir.join("oversized").exists());

    let persisted: RunStatus = read_json(&results_dir.join(RUN_STATUS_FILE));
    assert_eq!(persisted, status);

    let scenario_dir = results_dir.join("spring-melt");
    let allocation: DispatchResult = read_json(&scenario_dir.join(ALLOCATION_JSON));
    assert_eq!(
        allocation
            .zone(&ZoneId::from("Z1"))
            .map(|zone| zone.units_allocated),
        Some(10)
    );

    let csv = fs::read(scenario_dir.join(ALLOCATION_CSV)).expect("csv written");
    let text = String::from_utf8(csv.clone()).expect("utf8 csv");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("zone_id,zone_name,impact_level,priority_index,resource_id,units,necessity,demand,satisfaction")
    );
    assert_eq!(lines.count(), 2 * 4);

    let manifest: ProvenanceManifest = read_json(&scenario_dir.join(PROVENANCE_FILE));
    assert_eq!(manifest.scenario, "spring-melt");
    assert_eq!(manifest.attempts, 1);
    assert_eq!(manifest.catalog_version, 1);
    assert_eq!(manifest.config.sha256, sha256_hex(PLAN.as_bytes()));
    assert_eq!(manifest.inputs.len(), 1);
    assert_eq!(manifest.inputs[0].path, "builtin:catalog");
    let csv_digest = manifest
        .outputs
        .iter()
        .find(|output| output.path == ALLOCATION_CSV)
        .expect("csv digest recorded");
    assert_eq!(csv_digest.sha256, sha256_hex(&csv));

    let fair: ProvenanceManifest = read_json(&results_dir.join("fair-share").join(PROVENANCE_FILE));
    assert_eq!(fair.outputs.len(), 2);
}

#[tokio::test]
async fn dataset_files_are_digested_as_inputs() {
    let workspace = tempfile::tempdir().expect("temp dir");
    let plan_path = workspace.path().join("plan.json");
    fs::write(
        &plan_path,
        r#"{"scenarios":[{"name":"only","forecast":{"flood_probability":0.9},"total_units":4}]}"#,
    )
    .expect("write plan");
    let dataset = workspace.path().join("zones.csv");
    fs::write(&dataset, "id,name\n").expect("write dataset");

    let plan = BatchPlan::load(&plan_path).expect("plan loads");
    let runner = BatchRunner::new(
        service(),
        BatchOptions {
            results_dir: workspace.path().join("out"),
            plan_path,
            dataset_paths: vec![dataset.clone()],
        },
    );
    let status = runner.run(&plan).await.expect("run completes");
    assert!(status.succeeded());

    let manifest: ProvenanceManifest =
        read_json(&workspace.path().join("out").join("only").join(PROVENANCE_FILE));
    assert_eq!(manifest.inputs[0].path, dataset.display().to_string());
    assert_eq!(manifest.inputs[0].sha256, sha256_hex(b"id,name\n"));
}

#[test]
fn plans_with_bad_names_are_rejected_on_load() {
    let workspace = tempfile::tempdir().expect("temp dir");
    let plan_path = workspace.path().join("plan.json");
    fs::write(
        &plan_path,
        r#"{"scenarios":[{"name":"a/b","forecast":{"flood_probability":0.5},"total_units":1}]}"#,
    )
    .expect("write plan");

    let error = BatchPlan::load(&plan_path).expect_err("path separators rejected");
    assert!(error.to_string().contains("a/b"));
}
