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
    let exe = env!("CARGO_BIN_EXE_successd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn successd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_no: &str,
) -> String {
    let student = request_ok(
        stdin,
        reader,
        id,
        "students.save",
        json!({
            "studentId": student_no,
            "password": "pw1234",
            "name": "박민수",
            "department": "스마트물류공학전공",
            "field": "물류 분야"
        }),
    );
    student["id"].as_str().expect("student id").to_string()
}

fn run_program_to_completion(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    student_id: &str,
    category: &str,
    score: i64,
) {
    let program = request_ok(
        stdin,
        reader,
        &format!("{tag}-p"),
        "programs.save",
        json!({
            "title": format!("{} 프로그램", category),
            "category": category,
            "field": "공통",
            "status": "모집중",
            "score": score
        }),
    );
    let program_id = program["id"].as_str().expect("program id");
    let applied = request_ok(
        stdin,
        reader,
        &format!("{tag}-a"),
        "applications.apply",
        json!({ "programId": program_id, "studentId": student_id }),
    );
    let app_id = applied["id"].as_str().expect("application id");
    request_ok(
        stdin,
        reader,
        &format!("{tag}-ap"),
        "applications.approve",
        json!({ "applicationId": app_id }),
    );
    request_ok(
        stdin,
        reader,
        &format!("{tag}-c"),
        "applications.complete",
        json!({ "applicationId": app_id }),
    );
}

fn fetch_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
) -> serde_json::Value {
    let list = request_ok(stdin, reader, id, "students.list", json!({}));
    list["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["id"] == student_id)
        .cloned()
        .expect("student present")
}

#[test]
fn fifteen_point_noncurricular_program_credits_the_right_bucket() {
    let workspace = temp_dir("successd-routing-15");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = create_student(&mut stdin, &mut reader, "s1", "202411001");

    run_program_to_completion(&mut stdin, &mut reader, "nc", &student_id, "비교과", 15);

    let student = fetch_student(&mut stdin, &mut reader, "f1", &student_id);
    assert_eq!(student["nonCurricularScore"], 15);
    assert_eq!(student["coreSubjectScore"], 0);
    assert_eq!(student["industryScore"], 0);
    assert_eq!(student["total"], 15);

    let history = student["nonCurricularHistory"].as_array().expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["score"], 15);
    assert_eq!(history[0]["programTitle"], "비교과 프로그램");
    assert!(history[0]["date"].as_str().is_some());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn each_category_routes_to_its_bucket_and_credits_accumulate() {
    let workspace = temp_dir("successd-routing-all");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = create_student(&mut stdin, &mut reader, "s1", "202411002");

    run_program_to_completion(&mut stdin, &mut reader, "nc", &student_id, "비교과", 10);
    run_program_to_completion(&mut stdin, &mut reader, "cs", &student_id, "교과", 5);
    run_program_to_completion(&mut stdin, &mut reader, "ia", &student_id, "산학협력", 20);
    // an unknown category falls through to the industry bucket
    run_program_to_completion(&mut stdin, &mut reader, "xx", &student_id, "해외연수", 7);

    let student = fetch_student(&mut stdin, &mut reader, "f1", &student_id);
    assert_eq!(student["nonCurricularScore"], 10);
    assert_eq!(student["coreSubjectScore"], 5);
    assert_eq!(student["industryScore"], 27);
    assert_eq!(student["total"], 42);
    assert_eq!(
        student["industryHistory"].as_array().expect("history").len(),
        2
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn second_completion_adds_to_the_same_bucket() {
    let workspace = temp_dir("successd-routing-add");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student_id = create_student(&mut stdin, &mut reader, "s1", "202411003");

    run_program_to_completion(&mut stdin, &mut reader, "a", &student_id, "비교과", 10);
    run_program_to_completion(&mut stdin, &mut reader, "b", &student_id, "비교과", 15);

    let student = fetch_student(&mut stdin, &mut reader, "f1", &student_id);
    assert_eq!(student["nonCurricularScore"], 25);
    assert_eq!(student["total"], 25);
    assert_eq!(
        student["nonCurricularHistory"]
            .as_array()
            .expect("history")
            .len(),
        2
    );

    let _ = std::fs::remove_dir_all(workspace);
}
