//! Request-scoped tiered caching for multi-tenant site monitoring.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
