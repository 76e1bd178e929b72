//! SeaORM entity models for the Mentions API tables.

pub mod audit;
pub mod circuit_breaker_state;
pub mod mention;
pub mod task;
pub mod user;
