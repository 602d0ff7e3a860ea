//! Infrastructure layer module
//!
//! Process-level concerns that sit outside the reconciliation core:
//! configuration loading and logging setup.

pub mod config;
pub mod logging;
