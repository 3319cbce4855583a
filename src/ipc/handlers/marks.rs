use crate::grading::apply_mark;
use crate::ipc::helpers::{
    get_opt_str, get_required_index, get_required_str, require_session, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

/// The raw cell text as typed. Numbers are accepted for convenience and
/// `null` clears the cell.
fn raw_value(params: &Value) -> Result<String, HandlerErr> {
    match params.get("value") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) => Ok(String::new()),
        _ => Err(HandlerErr::new("bad_params", "missing value")),
    }
}

fn marks_apply(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?;
    let criterion = get_required_index(params, "criterion")?;
    let raw = raw_value(params)?;
    let session = require_session(state)?;

    let row = match get_opt_str(params, "penNumber") {
        Some(pen) => session
            .records
            .iter()
            .position(|r| r.pen_number == pen)
            .ok_or_else(|| {
                HandlerErr::new("not_found", format!("no student with pen number {}", pen))
                    .with_details(json!({ "penNumber": pen }))
            })?,
        None => {
            let row = get_required_index(params, "row")?;
            if row >= session.records.len() {
                return Err(HandlerErr::new(
                    "not_found",
                    format!("row {} is out of range", row),
                )
                .with_details(json!({ "row": row, "rows": session.records.len() })));
            }
            row
        }
    };

    let next = apply_mark(
        &session.records[row],
        &subject,
        criterion,
        &raw,
        &session.scheme,
    )
    .map_err(|e| {
        tracing::debug!(row, subject = %subject, criterion, error = %e, "mark rejected");
        HandlerErr::from(e)
    })?;
    session.records[row] = next;
    session.dirty = true;

    Ok(json!({
        "row": row,
        "record": session.records[row],
        "dirty": session.dirty,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "marks.apply" => Some(respond(&req.id, marks_apply(state, &req.params))),
        _ => None,
    }
}
