//! HTTP boundary of the case outcome predictor

pub mod api;
pub mod cases;
pub mod config;
