//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod activity;
mod grant;
mod integration;
mod policy;
mod scope;

pub use activity::{
    ActivityCapabilities, ActivityCatalog, ActivityDefinition, ActivityDescriptor, ActivityGroup,
    ActivityKind, ActivityRef,
};
pub use grant::{Grant, GrantKey, GrantType};
pub use integration::IntegrationEvent;
pub use policy::{PolicyData, PolicyDecision, PolicyInput, evaluate_policy};
pub use scope::{GrantScope, qualifier_candidates, qualifier_matches};
