use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub secret_key_configured: bool,
    pub secret_key_format_valid: bool,
    pub test_mode: bool,
}

pub async fn health_check(
    State(config): State<Config>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version,
        environment: config.server.environment.clone(),
        secret_key_configured: config.toss.secret_key.is_some(),
        secret_key_format_valid: config.toss.has_valid_secret_key(),
        test_mode: config.toss.test_mode,
    };

    Ok(Json(response))
}
