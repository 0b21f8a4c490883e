//! HTTP Routes

pub mod cache;
pub mod metrics;
