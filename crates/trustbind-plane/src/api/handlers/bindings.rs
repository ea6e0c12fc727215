//! Published binding set handler

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use trustbind_core::Binding;

use crate::api::handlers::evaluate::AppState;

/// The published binding set as records
#[derive(Debug, Serialize)]
pub struct BindingsResponse {
    pub revision: u64,
    pub digest: String,
    pub count: usize,
    pub records: Vec<Binding>,
}

/// List the published bindings
///
/// GET /v1/bindings
pub async fn list_bindings(State(state): State<Arc<AppState>>) -> Json<BindingsResponse> {
    let snapshot = state.gateway.snapshot();
    let records = snapshot.records();

    Json(BindingsResponse {
        revision: snapshot.revision(),
        digest: snapshot.digest(),
        count: records.len(),
        records,
    })
}
