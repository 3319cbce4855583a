use crate::export;
use crate::grading::grade_of;
use crate::ipc::helpers::{get_opt_str, resolve_scheme, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn schemes_list(state: &AppState) -> Result<Value, HandlerErr> {
    let schemes: Vec<Value> = state.catalog.iter().map(|s| s.summary()).collect();
    Ok(json!({ "schemes": schemes }))
}

fn schemes_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let scheme = resolve_scheme(&state.catalog, params)?;
    let sheet = export::build_sheet(scheme, &[]);
    let merges: Vec<Value> = sheet
        .merges
        .iter()
        .map(|m| {
            json!({
                "firstRow": m.first_row,
                "firstCol": m.first_col,
                "lastRow": m.last_row,
                "lastCol": m.last_col,
                "label": m.label,
            })
        })
        .collect();
    let subject_max: Vec<Value> = scheme
        .subjects
        .iter()
        .map(|s| json!({ "id": s.id, "maxTotal": s.max_total() }))
        .collect();
    Ok(json!({
        "scheme": scheme,
        "subjectMaxTotals": subject_max,
        "layout": {
            "header": sheet.header,
            "merges": merges,
        }
    }))
}

fn grades_lookup(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let scheme = resolve_scheme(&state.catalog, params)?;
    let total = params
        .get("total")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing total"))?;
    let (table, max_total, label) = match get_opt_str(params, "subject") {
        Some(subject) => {
            let s = scheme.subject(&subject).ok_or_else(|| {
                HandlerErr::new("unknown_subject", format!("unknown subject: {}", subject))
                    .with_details(json!({ "subject": subject }))
            })?;
            (&s.grade_table, s.max_total(), s.id.clone())
        }
        None => (
            &scheme.overall_grade_table,
            scheme.overall_max_total,
            "overall".to_string(),
        ),
    };
    Ok(json!({
        "schemeId": scheme.id,
        "table": label,
        "total": total,
        "maxTotal": max_total,
        "grade": grade_of(total, table),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "schemes.list" => schemes_list(state),
        "schemes.get" => schemes_get(state, &req.params),
        "grades.lookup" => grades_lookup(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
