//! # Mentions API Library
//!
//! Core functionality for the Mentions API service: the upstream gateway
//! stack (HTTP client, circuit breaker, retry), the outbox-driven mention
//! engine, and the HTTP surface.

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
