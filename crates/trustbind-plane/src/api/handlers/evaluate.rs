//! Token Evaluation Handler
//!
//! Verifies a presented CI/CD identity token, evaluates it against the
//! published binding set and returns the decision. Responses carry the
//! binding key, policy and TTL on a grant, or a structured reason on a
//! denial; they never echo claim values.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trustbind_core::{Decision, DenialReason, Verdict};

use crate::api::error::ApiError;
use crate::bootstrap::BootstrapCredential;
use crate::gateway::Gateway;

/// Shared application state
pub struct AppState {
    pub gateway: Gateway,

    /// Credential guarding administrative endpoints; `None` disables them
    pub bootstrap: Option<BootstrapCredential>,

    /// Configuration file re-read on reload
    pub config_path: Option<PathBuf>,

    /// Deadline applied when a request does not ask for a shorter one
    pub default_deadline: Duration,
}

/// Request to evaluate a presented token
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Raw signed JWT
    pub token: String,

    /// Requested credential lifetime in seconds
    #[serde(default)]
    pub requested_ttl: Option<u64>,

    /// Shorter deadline for this call, in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Evaluation response
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    /// `granted` or `denied`
    pub decision: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_ttl: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Binding set revision the token was evaluated against
    pub revision: u64,
}

impl EvaluateResponse {
    /// Response body and status for a decision
    pub fn from_decision(decision: &Decision) -> (StatusCode, Self) {
        match &decision.verdict {
            Verdict::Granted {
                binding,
                policy,
                effective_ttl,
            } => (
                StatusCode::OK,
                Self {
                    decision: "granted".into(),
                    binding: Some(binding.clone()),
                    policy: Some(policy.clone()),
                    effective_ttl: Some(*effective_ttl),
                    reason: None,
                    code: None,
                    revision: decision.revision,
                },
            ),
            Verdict::Denied { reason } => {
                let status = match reason {
                    DenialReason::Timeout | DenialReason::AuditUnavailable => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::FORBIDDEN,
                };
                (
                    status,
                    Self {
                        decision: "denied".into(),
                        binding: None,
                        policy: None,
                        effective_ttl: None,
                        reason: Some(*reason),
                        code: Some(reason.code().to_string()),
                        revision: decision.revision,
                    },
                )
            }
        }
    }
}

/// Evaluate a presented token
///
/// POST /v1/evaluate
///
/// 200 on a grant, 403 on a denial, 503 when the decision could not be
/// completed in time or could not be audited.
pub async fn evaluate_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateRequest>,
) -> Result<(StatusCode, Json<EvaluateResponse>), ApiError> {
    if request.token.trim().is_empty() {
        return Err(ApiError::BadRequest("token cannot be empty".into()));
    }

    let deadline = request
        .deadline_ms
        .map(Duration::from_millis)
        .map_or(state.default_deadline, |d| d.min(state.default_deadline));

    let decision = state
        .gateway
        .evaluate_raw(&request.token, deadline, request.requested_ttl)
        .await;

    let (status, body) = EvaluateResponse::from_decision(&decision);
    Ok((status, Json(body)))
}
