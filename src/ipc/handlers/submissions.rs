use super::{db_conn, db_err, required_str, HandlerErr};
use crate::attach;
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring::{self, CompletedCourse};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

fn parse_courses(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!([]))
}

fn submission_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let status: String = r.get(8)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "completedCourses": parse_courses(&r.get::<_, String>(2)?),
        "totalCompletedCount": r.get::<_, i64>(3)?,
        "totalScore": r.get::<_, i64>(4)?,
        "transcriptFileName": r.get::<_, Option<String>>(5)?,
        "transcriptFileSize": r.get::<_, Option<i64>>(6)?,
        "transcriptChecksum": r.get::<_, Option<String>>(7)?,
        "status": status,
        "statusLabel": scoring::submission_status_label(&status),
        "submittedAt": r.get::<_, Option<String>>(9)?,
        "approvedAt": r.get::<_, Option<String>>(10)?,
        "rejectionReason": r.get::<_, Option<String>>(11)?,
        "transcriptFile": r.get::<_, Option<String>>(12)?,
    }))
}

const SUBMISSION_COLUMNS: &str = "id, student_id, completed_courses, total_completed_count,
       total_score, transcript_file_name, transcript_file_size, transcript_checksum,
       status, submitted_at, approved_at, rejection_reason";

fn get_submission(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let sql = format!(
        "SELECT {SUBMISSION_COLUMNS}, transcript_file
         FROM core_courses_submissions WHERE student_id = ?"
    );
    let submission = conn
        .query_row(&sql, [student_id.as_str()], submission_json)
        .optional()
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "submission": submission }))
}

fn submit(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let courses: Vec<CompletedCourse> = serde_json::from_value(
        req.params
            .get("completedCourses")
            .cloned()
            .unwrap_or_else(|| json!([])),
    )
    .map_err(|e| HandlerErr::new("bad_params", format!("completedCourses: {}", e)))?;

    let score_info = scoring::core_courses_score(&courses);
    if score_info.completed_count == 0 {
        return Err(HandlerErr::new(
            "no_courses",
            "이수한 과목을 최소 1개 이상 선택해주세요.",
        ));
    }
    if let Some(code) = scoring::find_duplicate_code(&courses) {
        return Err(HandlerErr::with_details(
            "duplicate_course",
            "이미 동일 과목을 선택하셨습니다. (학수번호 중복)",
            json!({ "courseCode": code }),
        ));
    }

    let transcript_file = required_str(&req.params, "transcriptFile").map_err(|_| {
        HandlerErr::new("missing_transcript", "교과과정 이수표를 업로드해주세요.")
    })?;
    let transcript_name = required_str(&req.params, "transcriptFileName").map_err(|_| {
        HandlerErr::new("missing_transcript", "교과과정 이수표를 업로드해주세요.")
    })?;
    let parsed = attach::validate_transcript(&transcript_file)
        .map_err(|e| HandlerErr::new("bad_file", e.to_string()))?;
    let transcript_size = req
        .params
        .get("transcriptFileSize")
        .and_then(|v| v.as_i64())
        .unwrap_or(parsed.decoded_len as i64);

    // Only a rejected (or absent) row may be (re)submitted.
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, status FROM core_courses_submissions WHERE student_id = ?",
            [student_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if let Some((_, status)) = &existing {
        match status.as_str() {
            "approved" => {
                return Err(HandlerErr::new(
                    "submission_locked",
                    "이미 승인된 제출입니다. 수정할 수 없습니다.",
                ))
            }
            "pending" => {
                return Err(HandlerErr::new(
                    "submission_locked",
                    "제출 후에는 관리자 승인 전까지 수정할 수 없습니다.",
                ))
            }
            _ => {}
        }
    }

    // The first MAX_COURSES checked entries in list order are the accepted
    // set; everything past the cap is dropped here, not at scoring time.
    let kept = scoring::clamp_completed(courses);
    let total_count = kept.len() as i64;
    let total_score = total_count * scoring::POINTS_PER_COURSE;
    let courses_json = serde_json::to_string(&kept)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    let submitted_at = scoring::now_iso();

    let submission_id = match existing {
        Some((id, _)) => {
            conn.execute(
                "UPDATE core_courses_submissions
                 SET completed_courses = ?, total_completed_count = ?, total_score = ?,
                     transcript_file = ?, transcript_file_name = ?, transcript_file_size = ?,
                     transcript_checksum = ?, status = 'pending', submitted_at = ?,
                     approved_at = NULL, rejection_reason = NULL
                 WHERE id = ?",
                rusqlite::params![
                    courses_json,
                    total_count,
                    total_score,
                    transcript_file,
                    transcript_name,
                    transcript_size,
                    parsed.checksum,
                    submitted_at,
                    id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO core_courses_submissions(
                    id, student_id, completed_courses, total_completed_count, total_score,
                    transcript_file, transcript_file_name, transcript_file_size,
                    transcript_checksum, status, submitted_at, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
                rusqlite::params![
                    id,
                    student_id,
                    courses_json,
                    total_count,
                    total_score,
                    transcript_file,
                    transcript_name,
                    transcript_size,
                    parsed.checksum,
                    submitted_at,
                    scoring::now_iso(),
                ],
            )
            .map_err(db_err("db_insert_failed"))?;
            id
        }
    };

    Ok(json!({
        "id": submission_id,
        "status": "pending",
        "totalCompletedCount": total_count,
        "totalScore": total_score,
    }))
}

fn list_by_department(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let field = required_str(&req.params, "field")?;
    let department = required_str(&req.params, "department")?;
    let status_filter = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .filter(|s| *s != "all")
        .map(|s| s.to_string());

    let mut sql = format!(
        "SELECT u.id, u.student_id, u.name, u.department,
                s.id, s.total_completed_count, s.total_score, s.transcript_file_name,
                s.transcript_checksum, s.status, s.submitted_at, s.approved_at,
                s.rejection_reason, s.completed_courses
         FROM users u
         LEFT JOIN core_courses_submissions s ON s.student_id = u.id
         WHERE u.account_type = 'student' AND u.status = 'approved'
           AND u.field = ? AND u.department = ?"
    );
    if status_filter.is_some() {
        sql.push_str(" AND s.status = ?");
    }
    sql.push_str(" ORDER BY u.student_id");

    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        let submission_id: Option<String> = r.get(4)?;
        let submission = match submission_id {
            Some(id) => {
                let status: String = r.get(9)?;
                json!({
                    "id": id,
                    "totalCompletedCount": r.get::<_, i64>(5)?,
                    "totalScore": r.get::<_, i64>(6)?,
                    "transcriptFileName": r.get::<_, Option<String>>(7)?,
                    "transcriptChecksum": r.get::<_, Option<String>>(8)?,
                    "status": status,
                    "statusLabel": scoring::submission_status_label(&status),
                    "submittedAt": r.get::<_, Option<String>>(10)?,
                    "approvedAt": r.get::<_, Option<String>>(11)?,
                    "rejectionReason": r.get::<_, Option<String>>(12)?,
                    "completedCourses": parse_courses(&r.get::<_, String>(13)?),
                })
            }
            None => serde_json::Value::Null,
        };
        Ok(json!({
            "student": {
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, Option<String>>(1)?,
                "name": r.get::<_, String>(2)?,
                "department": r.get::<_, Option<String>>(3)?,
            },
            "submission": submission,
        }))
    };
    let rows = match &status_filter {
        Some(s) => stmt
            .query_map([field.as_str(), department.as_str(), s.as_str()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([field.as_str(), department.as_str()], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "rows": rows }))
}

/// pending -> approved, and the submission's total score becomes the
/// student's core-subject bucket. Overwrite, not increment: one submission
/// per student is the sole source of that bucket. One transaction.
fn approve(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let submission_id = required_str(&req.params, "submissionId")?;

    let row: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT student_id, status, total_score
             FROM core_courses_submissions WHERE id = ?",
            [submission_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some((student_id, status, total_score)) = row else {
        return Err(HandlerErr::new("not_found", "제출 내역을 찾을 수 없습니다."));
    };
    if status != "pending" {
        return Err(HandlerErr::with_details(
            "invalid_status",
            format!("검토중 상태의 제출만 승인할 수 있습니다. (현재: {})", status),
            json!({ "status": status }),
        ));
    }

    let approved_at = scoring::now_iso();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Err(e) = tx.execute(
        "UPDATE core_courses_submissions
         SET status = 'approved', approved_at = ?, rejection_reason = NULL
         WHERE id = ? AND status = 'pending'",
        [approved_at.as_str(), submission_id.as_str()],
    ) {
        let _ = tx.rollback();
        warn!(submission = %submission_id, error = %e, "approve: status update failed");
        return Err(HandlerErr::new("db_update_failed", e.to_string()));
    }
    if let Err(e) = tx.execute(
        "UPDATE users SET core_subject_score = ? WHERE id = ?",
        rusqlite::params![total_score, student_id],
    ) {
        let _ = tx.rollback();
        warn!(student = %student_id, error = %e, "approve: score write failed, rolled back");
        return Err(HandlerErr::new("db_update_failed", e.to_string()));
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({
        "id": submission_id,
        "status": "approved",
        "approvedAt": approved_at,
        "coreSubjectScore": total_score,
    }))
}

fn reject(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let submission_id = required_str(&req.params, "submissionId")?;
    let reason = required_str(&req.params, "reason")
        .ok()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| HandlerErr::new("missing_reason", "반려 사유를 입력해주세요."))?;

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM core_courses_submissions WHERE id = ?",
            [submission_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some(status) = status else {
        return Err(HandlerErr::new("not_found", "제출 내역을 찾을 수 없습니다."));
    };
    if status != "pending" {
        return Err(HandlerErr::with_details(
            "invalid_status",
            format!("검토중 상태의 제출만 반려할 수 있습니다. (현재: {})", status),
            json!({ "status": status }),
        ));
    }

    conn.execute(
        "UPDATE core_courses_submissions
         SET status = 'rejected', rejection_reason = ?
         WHERE id = ? AND status = 'pending'",
        [reason.as_str(), submission_id.as_str()],
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "id": submission_id, "status": "rejected", "reason": reason }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "submissions.get" => get_submission(conn, req),
        "submissions.submit" => submit(conn, req),
        "submissions.listByDepartment" => list_by_department(conn, req),
        "submissions.approve" => approve(conn, req),
        _ => reject(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.get"
        | "submissions.submit"
        | "submissions.listByDepartment"
        | "submissions.approve"
        | "submissions.reject" => Some(handle(state, req)),
        _ => None,
    }
}
