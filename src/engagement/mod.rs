//! Engagement domain module
//!
//! Contains the engagement record, its state machine, and the service that
//! commits transitions.

mod machine;
mod model;
mod service;

pub use machine::{Transition, AUTO_EXPIRY_REASON};
pub use model::*;
pub use service::EngagementService;
