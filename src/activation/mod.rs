//! Capability activation domain module
//!
//! Providers request admin approval for gated capabilities; repeated
//! rejections impose an escalating cooldown before the next request.

pub mod cooldown;
mod model;
mod service;

pub use model::*;
pub use service::ActivationService;
