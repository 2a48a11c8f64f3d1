// Core domain: errors, models, scope matching, metrics, resilience

pub mod errors;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod scope;
