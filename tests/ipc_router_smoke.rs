use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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
    let exe = env!("CARGO_BIN_EXE_tutordeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutordeskd");
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("tutordesk-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let registered = request(
        &mut stdin,
        &mut reader,
        "3",
        "teacher.register",
        json!({ "name": "Smoke Teacher" }),
    );
    let teacher_id = registered
        .get("result")
        .and_then(|v| v.get("teacherId"))
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "classcode.get",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "classcode.regenerate",
        json!({ "teacherId": teacher_id }),
    );

    let enrolled = request(
        &mut stdin,
        &mut reader,
        "6",
        "roster.enroll",
        json!({ "teacherId": teacher_id, "displayName": "Smoke Student", "level": "B1" }),
    );
    let student_id = enrolled
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "roster.list",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "roster.suspend",
        json!({ "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "roster.reactivate",
        json!({ "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "roster.setPlan",
        json!({ "studentId": student_id, "plan": "standard" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "roster.recordSession",
        json!({ "studentId": student_id, "seconds": 600, "stars": 3 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "roster.usage",
        json!({ "studentId": student_id }),
    );

    let created = request(
        &mut stdin,
        &mut reader,
        "13",
        "missions.create",
        json!({ "teacherId": teacher_id, "title": "Smoke Mission", "targetLevel": "A2" }),
    );
    let mission_id = created
        .get("result")
        .and_then(|v| v.get("missionId"))
        .and_then(|v| v.as_str())
        .expect("missionId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "missions.list",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "missions.complete",
        json!({ "missionId": mission_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "missions.stats",
        json!({ "teacherId": teacher_id, "missionId": mission_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "missions.statsAll",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "missions.deactivate",
        json!({ "missionId": mission_id }),
    );

    let generated = request(
        &mut stdin,
        &mut reader,
        "19",
        "codes.generate",
        json!({ "teacherId": teacher_id }),
    );
    let code_id = generated
        .get("result")
        .and_then(|v| v.get("codeId"))
        .and_then(|v| v.as_str())
        .expect("codeId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "codes.list",
        json!({ "teacherId": teacher_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "codes.validate",
        json!({ "code": "PRV-ABC234" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "codes.revoke",
        json!({ "codeId": code_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "roster.remove",
        json!({ "teacherId": teacher_id, "studentId": student_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_request_lines_get_in_band_bad_json_envelopes() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // Not JSON at all, then valid JSON with a wrongly typed id.
    for bad_line in ["this is not json", r#"{"id":5,"method":"health"}"#] {
        writeln!(stdin, "{}", bad_line).expect("write request");
        stdin.flush().expect("flush request");
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("envelope must itself parse");
        assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(
            value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str()),
            Some("bad_json"),
            "{}",
            bad_line
        );
    }

    // The loop keeps serving well-formed requests afterwards.
    let resp = request(&mut stdin, &mut reader, "after", "health", json!({}));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_methods_report_not_implemented() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let payload = json!({ "id": "1", "method": "roster.teleport", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some("1"));
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn methods_without_workspace_report_no_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "roster.list",
        json!({ "teacherId": "nobody" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    drop(stdin);
    let _ = child.wait();
}
