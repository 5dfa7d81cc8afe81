use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::allocator::DispatchRequest;
use super::catalog::{CatalogSnapshot, CatalogValidationError, ResourceId, ResourceType, ZoneId};
use super::forecast::ForecastSignal;
use super::service::{DispatchError, DispatchService};

/// Body of `POST /api/v1/dispatch`: forecast plus request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchPayload {
    pub forecast: ForecastSignal,
    #[serde(flatten)]
    pub request: DispatchRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapacityUpdate {
    pub capacity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneSummaryView {
    pub id: ZoneId,
    pub name: String,
    pub vulnerability: f64,
    pub critical_infra: bool,
    pub hospitals: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub version: u64,
    pub zones: Vec<ZoneSummaryView>,
    pub resources: Vec<ResourceType>,
}

impl From<&CatalogSnapshot> for CatalogView {
    fn from(snapshot: &CatalogSnapshot) -> Self {
        Self {
            version: snapshot.version(),
            zones: snapshot
                .zones()
                .iter()
                .map(|zone| ZoneSummaryView {
                    id: zone.id.clone(),
                    name: zone.name.clone(),
                    vulnerability: zone.vulnerability(),
                    critical_infra: zone.critical_infra,
                    hospitals: zone.hospitals,
                })
                .collect(),
            resources: snapshot.resources().to_vec(),
        }
    }
}

/// Router exposing allocation and catalog administration endpoints.
pub fn dispatch_router(service: Arc<DispatchService>) -> Router {
    Router::new()
        .route("/api/v1/dispatch", post(dispatch_handler))
        .route("/api/v1/catalog", get(catalog_handler))
        .route(
            "/api/v1/catalog/resources/:resource_id/capacity",
            put(capacity_handler),
        )
        .with_state(service)
}

pub(crate) async fn dispatch_handler(
    State(service): State<Arc<DispatchService>>,
    axum::Json(payload): axum::Json<DispatchPayload>,
) -> Response {
    match service.dispatch(payload.forecast, payload.request).await {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(DispatchError::Request(error)) => {
            let payload = json!({
                "error": error.to_string(),
            });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        Err(DispatchError::BusinessRule(error)) => {
            let payload = json!({
                "error": error.to_string(),
                "rule": error.rule,
                "zones": error.zones,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn catalog_handler(State(service): State<Arc<DispatchService>>) -> Response {
    let snapshot = service.catalog();
    (StatusCode::OK, axum::Json(CatalogView::from(snapshot.as_ref()))).into_response()
}

pub(crate) async fn capacity_handler(
    State(service): State<Arc<DispatchService>>,
    Path(resource_id): Path<String>,
    axum::Json(update): axum::Json<CapacityUpdate>,
) -> Response {
    let id = ResourceId(resource_id);
    match service.update_capacity(&id, update.capacity) {
        Ok(snapshot) => {
            let capacity = snapshot.resource(&id).map(|resource| resource.capacity);
            let payload = json!({
                "resource_id": id,
                "capacity": capacity,
                "version": snapshot.version(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(CatalogValidationError::UnknownResource(_)) => {
            let payload = json!({
                "error": format!("unknown resource type '{}'", id),
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
    }
}
