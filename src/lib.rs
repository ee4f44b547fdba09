//! Club backend with a Redis-backed HTTP response cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
