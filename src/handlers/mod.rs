//! HTTP handlers, one module per domain

pub mod activation;
pub mod earnings;
pub mod engagement;
pub mod system;
