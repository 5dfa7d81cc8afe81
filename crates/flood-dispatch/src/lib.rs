//! Flood-response resource allocation engine.
//!
//! Given a flood forecast and a catalog of zones and resource types, the
//! [`dispatch`] module decides how many units of each resource every zone
//! receives. [`batch`] runs whole scenario sets to disk with provenance.

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod telemetry;
