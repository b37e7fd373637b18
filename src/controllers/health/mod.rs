mod handlers;
mod models;
mod routes;

pub use models::{HealthCheckBody, LivenessCheckBody, ReadyCheckBody, ServiceReadiness};
pub use routes::health_routes;
