//! Earnings domain module
//!
//! Evidence gate, balance computation, withdrawal requests and FIFO
//! settlement.

pub mod gate;
pub mod ledger;
mod model;
mod service;

pub use model::*;
pub use service::EarningsService;
