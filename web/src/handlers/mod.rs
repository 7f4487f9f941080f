//! HTTP handlers shared by every Moby Comps service binary.

pub mod health;

pub use health::{HealthReport, health_check, readiness};
