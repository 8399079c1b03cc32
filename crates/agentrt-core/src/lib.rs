//! Core data model and pure validation logic for the agent runtime:
//! Plan/Step/Guard/Event/CacheItem types, the consent vocabulary, the
//! Plan/Step state machines, and DAG validation for Step dependencies.
//!
//! This crate has no I/O — persistence lives in `agentrt-store`, path
//! confinement in `agentrt-sandbox`, scheduling in `agentrt-executor`.

pub mod dag;
pub mod error;
pub mod ids;
pub mod submit;
pub mod types;

pub use error::AppError;
pub use ids::new_id;
pub use submit::{build_plan, PlanRequest, StepRequest};
pub use types::{
    Budget, CacheItem, CapabilityRef, ConsentScope, ConsentToken, Event, EventKind, Guard, Plan, PlanState, Step,
    StepState,
};
