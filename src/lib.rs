//! Creative Orchestrator
//!
//! Turns creative-generation requests (image, video, text) into model runtime
//! invocations, tracks each one as a job until it settles, and records the
//! outcome through Postgres, S3-compatible storage and Redis.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
