//! Medical Scan Analysis Queue
//!
//! Server side: a prioritized, single-worker queue that drives scan records
//! through remote AI inference and report generation with bounded retry.
//! Client side: submission, status polling, synthetic progress and a
//! short-lived result cache for callers waiting on an analysis.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
