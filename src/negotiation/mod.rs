//! Negotiation ledger
//!
//! Append-only message and offer log scoped to one engagement.

mod model;

pub use model::*;
