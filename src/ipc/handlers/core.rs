use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let last_context = state.db.as_ref().and_then(roster::last_context);
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "schemeCount": state.catalog.len(),
            "lastContext": last_context,
            "session": state.session.as_ref().map(|s| s.summary()),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "workspace open failed");
            return err(&req.id, "db_open_failed", format!("{e:?}"), None);
        }
    };

    // A broken override must not prevent the workspace from opening.
    let mut override_error: Option<String> = None;
    let scheme_override = match state.builtin.with_workspace_override(&path) {
        Ok(Some(catalog)) => {
            state.catalog = catalog;
            true
        }
        Ok(None) => {
            state.catalog = state.builtin.clone();
            false
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "scheme override ignored");
            state.catalog = state.builtin.clone();
            override_error = Some(e.to_string());
            false
        }
    };

    if let Some(session) = state.session.take() {
        if session.dirty {
            tracing::warn!(
                school = %session.context.school,
                "unsaved roster discarded on workspace change"
            );
        }
    }

    let last_context = roster::last_context(&conn);
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    tracing::info!(path = %path.display(), schemes = state.catalog.len(), "workspace selected");

    let mut result = json!({
        "workspacePath": path.to_string_lossy(),
        "schemeCount": state.catalog.len(),
        "schemeOverride": scheme_override,
        "lastContext": last_context,
    });
    if let Some(e) = override_error {
        result["schemeOverrideError"] = json!(e);
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
