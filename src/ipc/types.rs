use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::grading::StudentRecord;
use crate::roster::RosterContext;
use crate::scheme::{GradingScheme, SchemeCatalog};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The one roster currently being edited.
pub struct RosterSession {
    pub context: RosterContext,
    pub scheme: GradingScheme,
    pub records: Vec<StudentRecord>,
    pub dirty: bool,
}

impl RosterSession {
    pub fn summary(&self) -> serde_json::Value {
        json!({
            "context": self.context,
            "schemeId": self.scheme.id,
            "students": self.records.len(),
            "dirty": self.dirty,
        })
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub builtin: SchemeCatalog,
    /// Built-in catalog with the workspace override applied, if any.
    pub catalog: SchemeCatalog,
    pub session: Option<RosterSession>,
}

impl AppState {
    pub fn new(builtin: SchemeCatalog) -> Self {
        Self {
            workspace: None,
            db: None,
            catalog: builtin.clone(),
            builtin,
            session: None,
        }
    }
}
