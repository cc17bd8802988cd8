use rusqlite::Connection;

use crate::codegen::MintExhausted;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::stats::Level;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Every data-access method needs a selected workspace first.
pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Optional proficiency level; present-but-unparseable is a caller error.
pub fn get_optional_level(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Level>, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => Level::parse(raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown level: {}", raw))),
    }
}

pub fn query_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn insert_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_insert_failed", e.to_string())
}

pub fn update_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_update_failed", e.to_string())
}

pub fn mint_failed(e: anyhow::Error) -> HandlerErr {
    if e.downcast_ref::<MintExhausted>().is_some() {
        HandlerErr::new("code_generation_exhausted", e.to_string())
    } else {
        query_failed(e)
    }
}

pub fn to_json<T: serde::Serialize>(value: T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
