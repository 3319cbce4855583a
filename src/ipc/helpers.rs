use rusqlite::Connection;
use serde_json::Value;

use crate::grading::ValidationError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, RosterSession};
use crate::scheme::{GradingScheme, SchemeCatalog};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ValidationError> for HandlerErr {
    fn from(e: ValidationError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: Some(e.details()),
        }
    }
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_index(params: &Value, key: &str) -> Result<usize, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                format!("missing or invalid {} (non-negative integer)", key),
            )
        })
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(state: &mut AppState) -> Result<&mut RosterSession, HandlerErr> {
    state
        .session
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_session", "open a roster first"))
}

/// `schemeId`, or the (`classLevel`, `cycle`) pair.
pub fn resolve_scheme<'a>(
    catalog: &'a SchemeCatalog,
    params: &Value,
) -> Result<&'a GradingScheme, HandlerErr> {
    if let Some(id) = get_opt_str(params, "schemeId") {
        return catalog.get(&id).ok_or_else(|| {
            HandlerErr::new("unknown_scheme", format!("no scheme with id {}", id))
                .with_details(serde_json::json!({ "schemeId": id }))
        });
    }
    let (Some(class_level), Some(cycle)) =
        (get_opt_str(params, "classLevel"), get_opt_str(params, "cycle"))
    else {
        return Err(HandlerErr::new(
            "bad_params",
            "missing schemeId or classLevel + cycle",
        ));
    };
    catalog.find(&class_level, &cycle).ok_or_else(|| {
        HandlerErr::new(
            "unknown_scheme",
            format!("no scheme for {} {}", class_level, cycle),
        )
        .with_details(serde_json::json!({ "classLevel": class_level, "cycle": cycle }))
    })
}
