use crate::export::{self, ExportError, ExportFormat};
use crate::ipc::helpers::{get_opt_str, get_required_str, require_session, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn export_err(e: ExportError) -> HandlerErr {
    match e {
        ExportError::UnknownFormat(f) => {
            HandlerErr::new("bad_params", format!("unsupported export format: {}", f))
        }
        other => HandlerErr::new("export_failed", other.to_string()),
    }
}

fn roster_export(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let format = ExportFormat::resolve(get_opt_str(params, "format").as_deref(), &out_path)
        .map_err(export_err)?;
    let session = require_session(state)?;

    let sheet = export::build_sheet(&session.scheme, &session.records);
    let bytes = export::write_file(&sheet, format, &out_path).map_err(|e| {
        tracing::error!(path = %out_path.display(), error = %e, "export failed");
        export_err(e)
    })?;
    tracing::info!(
        path = %out_path.display(),
        format = format.as_str(),
        rows = sheet.rows.len(),
        "roster exported"
    );
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "format": format.as_str(),
        "rows": sheet.rows.len(),
        "columns": sheet.width(),
        "bytes": bytes,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "roster.export" => Some(respond(&req.id, roster_export(state, &req.params))),
        _ => None,
    }
}
