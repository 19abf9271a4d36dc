//! AlphaStream: adaptive intraday gapper scoring and decision engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod features;
pub mod math;
pub mod predictor;
pub mod storage;
pub mod strategy;
pub mod types;
