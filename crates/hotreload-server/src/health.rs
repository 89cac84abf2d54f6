//! `/health` endpoint body.

use serde::Serialize;

/// Fixed body returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the listener is up.
    pub status: &'static str,
    /// Configured service name.
    pub service: String,
}

/// Build the health body for `service`.
pub fn health_check(service: &str) -> HealthResponse {
    HealthResponse {
        status: "healthy",
        service: service.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_has_exactly_status_and_service() {
        let v = serde_json::to_value(health_check("axiom-hotreload")).unwrap();
        assert_eq!(v, serde_json::json!({"status": "healthy", "service": "axiom-hotreload"}));
    }
}
