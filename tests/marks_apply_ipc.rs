use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn fixture_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_marksentryd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn marksentryd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn open_tandur(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    scheme_id: &str,
) {
    let roster_file = fixture_path("fixtures/students_class10.json");
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "import",
        "roster.import",
        json!({ "schemeId": scheme_id, "path": roster_file.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "open",
        "roster.open",
        json!({ "school": "Tandur", "schemeId": scheme_id }),
    );
}

#[test]
fn rejected_marks_report_codes_and_leave_row_untouched() {
    let workspace = temp_dir("marksentry-marks-reject");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_tandur(&mut stdin, &mut reader, &workspace, "class-1-fa-1");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.apply",
        json!({ "row": 0, "subject": "english", "criterion": 0, "value": "12" }),
    );
    let before = first["record"].clone();

    let over = request(
        &mut stdin,
        &mut reader,
        "2",
        "marks.apply",
        json!({ "row": 0, "subject": "english", "criterion": 0, "value": "25" }),
    );
    assert_eq!(error_code(&over), "out_of_range");
    assert_eq!(over["error"]["details"]["max"], json!(20.0));
    assert_eq!(over["error"]["details"]["criterion"], json!("FA1-20M"));

    let absent = request(
        &mut stdin,
        &mut reader,
        "3",
        "marks.apply",
        json!({ "row": 0, "subject": "english", "criterion": 1, "value": "A" }),
    );
    assert_eq!(error_code(&absent), "bad_format");

    let subject = request(
        &mut stdin,
        &mut reader,
        "4",
        "marks.apply",
        json!({ "row": 0, "subject": "science", "criterion": 0, "value": "1" }),
    );
    assert_eq!(error_code(&subject), "unknown_subject");

    let criterion = request(
        &mut stdin,
        &mut reader,
        "5",
        "marks.apply",
        json!({ "row": 0, "subject": "english", "criterion": 7, "value": "1" }),
    );
    assert_eq!(error_code(&criterion), "unknown_criterion");

    let row = request(
        &mut stdin,
        &mut reader,
        "6",
        "marks.apply",
        json!({ "row": 99, "subject": "english", "criterion": 0, "value": "1" }),
    );
    assert_eq!(error_code(&row), "not_found");

    let pen = request(
        &mut stdin,
        &mut reader,
        "7",
        "marks.apply",
        json!({ "penNumber": "NOPE", "subject": "english", "criterion": 0, "value": "1" }),
    );
    assert_eq!(error_code(&pen), "not_found");

    let search = request_ok(&mut stdin, &mut reader, "8", "roster.search", json!({ "query": "PEN1001" }));
    assert_eq!(search["rows"][0]["record"], before);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn seven_criteria_entry_reaches_full_grade() {
    let workspace = temp_dir("marksentry-marks-seven");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_tandur(&mut stdin, &mut reader, &workspace, "class-1-fa-1");

    let mut last = json!({});
    for (i, v) in ["20", "5", "5", "5", "5", "5", "5"].iter().enumerate() {
        last = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "marks.apply",
            json!({ "row": 2, "subject": "telugu", "criterion": i, "value": v }),
        );
    }
    let telugu = &last["record"]["subjectMarks"]["telugu"];
    assert_eq!(telugu["subtotal"], json!(50.0));
    assert_eq!(telugu["grade"], json!("A1"));
    assert_eq!(telugu["gpa"], json!("10.0"));
    assert_eq!(last["record"]["grandTotal"], json!(50.0));
    assert_eq!(last["record"]["overallGrade"], json!("C"));

    // Re-applying the same value is a no-op on the record.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "again",
        "marks.apply",
        json!({ "row": 2, "subject": "telugu", "criterion": 6, "value": "5" }),
    );
    assert_eq!(again["record"], last["record"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn absent_counts_as_zero_on_exam_criteria() {
    let workspace = temp_dir("marksentry-marks-absent");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_tandur(&mut stdin, &mut reader, &workspace, "class-8-sa-2");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "marks.apply",
        json!({ "row": 1, "subject": "pscience", "criterion": 0, "value": "8" }),
    );
    let absent = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.apply",
        json!({ "row": 1, "subject": "pscience", "criterion": 1, "value": " a " }),
    );
    let pscience = &absent["record"]["subjectMarks"]["pscience"];
    assert_eq!(pscience["raw"], json!([8.0, "A"]));
    assert_eq!(pscience["subtotal"], json!(8.0));
    assert_eq!(pscience["grade"], json!("D2"));
    assert_eq!(pscience["gpa"], json!("1.6"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
