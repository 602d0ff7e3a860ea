//! TickTick Open API adapter.

pub mod client;
pub mod date;
pub mod models;

pub use client::{RateLimiter, TickTickClient, ACCESS_TOKEN_ENV};
pub use date::parse_ticktick_date;
