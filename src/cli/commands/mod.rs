//! CLI command implementations.

pub mod ledger;
pub mod rules;
pub mod sync;
