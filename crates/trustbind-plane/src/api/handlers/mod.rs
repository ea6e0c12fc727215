//! API request handlers

pub mod admin;
pub mod bindings;
pub mod evaluate;

pub use admin::{reload, ReloadResponse};
pub use bindings::{list_bindings, BindingsResponse};
pub use evaluate::{evaluate_token, AppState, EvaluateRequest, EvaluateResponse};
