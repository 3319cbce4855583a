use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_db, require_session, resolve_scheme, respond,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request, RosterSession};
use crate::roster::{self, RosterContext, ALL_SCHOOLS};
use serde_json::{json, Value};

fn rosters_list(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let rosters = roster::list_rosters(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "rosters": rosters }))
}

fn roster_import(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let scheme = resolve_scheme(&state.catalog, params)?;
    let path = get_required_str(params, "path")?;
    let school = get_opt_str(params, "school");
    if school
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(ALL_SCHOOLS))
    {
        return Err(HandlerErr::new(
            "bad_params",
            "ALL is not a school that records can be imported into",
        ));
    }

    let text = std::fs::read_to_string(&path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": path }))
    })?;
    let parsed = roster::parse_import(&text, school.as_deref(), scheme)
        .map_err(|e| HandlerErr::new(e.code(), e.to_string()))?;

    let ctx = RosterContext {
        school: ALL_SCHOOLS.to_string(),
        class_level: scheme.class_level.clone(),
        cycle: scheme.cycle.clone(),
    };
    let report = roster::save(conn, &ctx, scheme, &parsed.records)
        .map_err(|e| HandlerErr::new("db_save_failed", e.to_string()))?;
    tracing::info!(
        path = %path,
        scheme = %scheme.id,
        students = parsed.records.len(),
        warnings = parsed.warnings.len(),
        "roster imported"
    );
    Ok(json!({
        "schemeId": scheme.id,
        "schools": parsed.schools,
        "students": parsed.records.len(),
        "created": report.created,
        "updated": report.updated,
        "duplicatePens": report.duplicate_pens,
        "warnings": parsed.warnings,
    }))
}

fn roster_open(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let school = get_required_str(params, "school")?;
    let scheme = resolve_scheme(&state.catalog, params)?.clone();
    let conn = require_db(state)?;

    let context = RosterContext {
        school: if school.trim().eq_ignore_ascii_case(ALL_SCHOOLS) {
            ALL_SCHOOLS.to_string()
        } else {
            school.trim().to_string()
        },
        class_level: scheme.class_level.clone(),
        cycle: scheme.cycle.clone(),
    };
    let (records, warnings) = roster::load(conn, &context, &scheme)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if let Err(e) = roster::remember_context(conn, &context) {
        tracing::warn!(error = %e, "could not remember roster context");
    }

    if let Some(previous) = state.session.take() {
        if previous.dirty {
            tracing::warn!(school = %previous.context.school, "unsaved roster discarded");
        }
    }
    tracing::info!(
        school = %context.school,
        scheme = %scheme.id,
        students = records.len(),
        "roster opened"
    );

    let rows = serde_json::to_value(&records)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    let result = json!({
        "context": context,
        "schemeId": scheme.id,
        "rows": rows,
        "warnings": warnings,
    });
    state.session = Some(RosterSession {
        context,
        scheme,
        records,
        dirty: false,
    });
    Ok(result)
}

fn roster_search(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let query = params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let session = require_session(state)?;
    let rows: Vec<Value> = roster::search(&session.records, &query)
        .into_iter()
        .map(|i| json!({ "row": i, "record": session.records[i] }))
        .collect();
    Ok(json!({
        "query": query,
        "total": session.records.len(),
        "rows": rows,
    }))
}

fn roster_save(state: &mut AppState) -> Result<Value, HandlerErr> {
    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let session = state
        .session
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_session", "open a roster first"))?;

    let report = roster::save(conn, &session.context, &session.scheme, &session.records)
        .map_err(|e| {
            tracing::error!(error = %e, "roster save failed");
            HandlerErr::new("db_save_failed", e.to_string())
        })?;
    session.dirty = false;
    if let Err(e) = roster::remember_context(conn, &session.context) {
        tracing::warn!(error = %e, "could not remember roster context");
    }
    Ok(json!({
        "context": session.context,
        "saved": session.records.len(),
        "created": report.created,
        "updated": report.updated,
        "duplicatePens": report.duplicate_pens,
    }))
}

fn roster_close(state: &mut AppState) -> Result<Value, HandlerErr> {
    let closed = state.session.take();
    Ok(json!({
        "closed": closed.is_some(),
        "discardedChanges": closed.as_ref().is_some_and(|s| s.dirty),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "rosters.list" => rosters_list(state),
        "roster.import" => roster_import(state, &req.params),
        "roster.open" => roster_open(state, &req.params),
        "roster.search" => roster_search(state, &req.params),
        "roster.save" => roster_save(state),
        "roster.close" => roster_close(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
