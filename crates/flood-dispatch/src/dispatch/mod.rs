//! Flood-response resource allocation.
//!
//! Pipeline per request: impact classification → necessity scoring →
//! allocation strategy → business-rule validation. The catalog is read as an
//! immutable snapshot, so concurrent requests never see a half-applied
//! capacity update.

pub mod allocator;
pub mod catalog;
pub mod forecast;
pub mod impact;
pub mod necessity;
pub mod result;
pub mod router;
pub mod service;
pub mod solver;
pub mod validator;

#[cfg(test)]
mod tests;

pub use allocator::{AllocationMode, DispatchPolicy, DispatchRequest, RequestError};
pub use catalog::{
    CatalogSnapshot, CatalogStore, CatalogValidationError, FeatureWeights, ResourceId,
    ResourceMetadata, ResourceType, RiskFeatures, ZoneId, ZoneProfile,
};
pub use forecast::{ForecastSignal, LevelForecast, ScenarioTag};
pub use impact::{ImpactAssessment, ImpactLevel};
pub use necessity::{NeedRuleTable, ResourceNeed, SatisfactionBasis};
pub use result::{
    DispatchResult, DispatchWarning, ResourceSummary, WarningKind, ZoneAllocation,
};
pub use router::dispatch_router;
pub use service::{DispatchEngine, DispatchError, DispatchService, FallbackReason};
pub use validator::{BusinessRule, BusinessRuleError};
