//! Administrative Handlers
//!
//! Guarded by the bootstrap credential minted at startup, presented as a
//! bearer token.

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::api::handlers::evaluate::AppState;
use crate::bootstrap::BootstrapScope;
use crate::config::TrustbindConfig;

/// Response from a successful reload
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub revision: u64,
    pub bindings: usize,
    pub digest: String,
}

fn bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer credential".into()))
}

/// Recompile from the configuration file and publish
///
/// POST /v1/admin/reload
pub async fn reload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ReloadResponse>, ApiError> {
    let credential = state.bootstrap.as_ref().ok_or_else(|| {
        warn!("SECURITY: reload attempted with no bootstrap credential minted");
        ApiError::Unauthorized("administrative endpoints are disabled".into())
    })?;
    credential.verify(bearer(&headers)?, BootstrapScope::Reload, Utc::now())?;

    let path = state
        .config_path
        .as_ref()
        .ok_or_else(|| ApiError::Internal("no configuration file to reload from".into()))?;
    let config = TrustbindConfig::from_file(path)?.with_env_overrides()?;

    let published = state.gateway.reload(&config).await?;

    info!(
        credential_id = %credential.id,
        revision = published.revision(),
        bindings = published.len(),
        "Reloaded binding set"
    );

    Ok(Json(ReloadResponse {
        revision: published.revision(),
        bindings: published.len(),
        digest: published.digest(),
    }))
}
