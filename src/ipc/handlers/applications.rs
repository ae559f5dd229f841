use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring::{self, HistoryEntry, ScoreCategory};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::programs::STATUS_RECRUITING;

fn application_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let status: String = r.get(3)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "programId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "status": status,
        "statusLabel": scoring::application_status_label(&status),
        "appliedDate": r.get::<_, String>(4)?,
        "completedDate": r.get::<_, Option<String>>(5)?,
        "attachedFiles": serde_json::from_str::<serde_json::Value>(&r.get::<_, String>(6)?)
            .unwrap_or_else(|_| json!([])),
    }))
}

fn list_applications(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = optional_str(&req.params, "studentId");
    let program_id = optional_str(&req.params, "programId");
    let active_only = req
        .params
        .get("activeOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(sid) = student_id {
        clauses.push("student_id = ?");
        binds.push(sid);
    }
    if let Some(pid) = program_id {
        clauses.push("program_id = ?");
        binds.push(pid);
    }
    if active_only {
        // Completed applications disappear from every active list view.
        clauses.push("status != 'completed'");
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT id, program_id, student_id, status, applied_date, completed_date, attached_files
         FROM program_applications{}
         ORDER BY created_at DESC",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let applications = stmt
        .query_map(
            rusqlite::params_from_iter(binds.iter()),
            application_row_json,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "applications": applications }))
}

fn apply(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let program_id = required_str(&req.params, "programId")?;
    let student_id = required_str(&req.params, "studentId")?;
    let attached_files = req
        .params
        .get("attachedFiles")
        .cloned()
        .unwrap_or_else(|| json!([]));

    let program: Option<(String, i64)> = conn
        .query_row(
            "SELECT status, requires_file FROM programs WHERE id = ?",
            [program_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some((program_status, requires_file)) = program else {
        return Err(HandlerErr::new("not_found", "프로그램을 찾을 수 없습니다."));
    };
    if program_status != STATUS_RECRUITING {
        return Err(HandlerErr::new(
            "not_recruiting",
            "모집중인 프로그램이 아닙니다.",
        ));
    }
    if requires_file != 0
        && attached_files
            .as_array()
            .map(|a| a.is_empty())
            .unwrap_or(true)
    {
        return Err(HandlerErr::new("bad_params", "신청 파일을 첨부해주세요."));
    }

    // Point lookup for the friendly message; the UNIQUE(program_id,
    // student_id) index closes the insert race behind it.
    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM program_applications WHERE program_id = ? AND student_id = ?",
            [program_id.as_str(), student_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if existing.is_some() {
        return Err(HandlerErr::new(
            "duplicate_application",
            "이미 신청한 프로그램입니다.",
        ));
    }

    let application_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO program_applications(
            id, program_id, student_id, status, applied_date, attached_files, created_at
         ) VALUES(?, ?, ?, 'pending', ?, ?, ?)",
        rusqlite::params![
            application_id,
            program_id,
            student_id,
            scoring::today(),
            attached_files.to_string(),
            scoring::now_iso(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HandlerErr::new("duplicate_application", "이미 신청한 프로그램입니다.")
        }
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    Ok(json!({ "id": application_id, "status": "pending" }))
}

fn current_status(conn: &Connection, application_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT status FROM program_applications WHERE id = ?",
        [application_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::new("not_found", "신청 내역을 찾을 수 없습니다."))
}

/// pending -> approved | rejected. Anything else is illegal.
fn review(conn: &Connection, req: &Request, next: &str) -> Result<serde_json::Value, HandlerErr> {
    let application_id = required_str(&req.params, "applicationId")?;
    let status = current_status(conn, &application_id)?;
    if status != "pending" {
        return Err(HandlerErr::with_details(
            "invalid_status",
            format!("대기중 상태의 신청만 처리할 수 있습니다. (현재: {})", status),
            json!({ "status": status }),
        ));
    }
    conn.execute(
        "UPDATE program_applications SET status = ? WHERE id = ? AND status = 'pending'",
        [next, application_id.as_str()],
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "id": application_id, "status": next }))
}

/// approved -> completed, crediting the program's score to the bucket its
/// category routes to and appending one history entry. One transaction: the
/// status stamp and the credit land together or not at all.
fn complete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let application_id = required_str(&req.params, "applicationId")?;

    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT program_id, student_id, status FROM program_applications WHERE id = ?",
            [application_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some((program_id, student_id, status)) = row else {
        return Err(HandlerErr::new("not_found", "신청 내역을 찾을 수 없습니다."));
    };
    if status != "approved" {
        return Err(HandlerErr::with_details(
            "invalid_status",
            format!("승인된 신청만 완료 처리할 수 있습니다. (현재: {})", status),
            json!({ "status": status }),
        ));
    }

    let program: Option<(String, String, i64)> = conn
        .query_row(
            "SELECT title, category, score FROM programs WHERE id = ?",
            [program_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some((program_title, category, score)) = program else {
        return Err(HandlerErr::new("not_found", "프로그램을 찾을 수 없습니다."));
    };

    let bucket = ScoreCategory::from_label(&category);
    let (current, history_raw): (i64, String) = conn
        .query_row(
            &format!(
                "SELECT {}, {} FROM users WHERE id = ?",
                bucket.score_column(),
                bucket.history_column()
            ),
            [student_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("not_found", "학생을 찾을 수 없습니다."))?;

    let mut history: Vec<HistoryEntry> = serde_json::from_str(&history_raw).unwrap_or_default();
    let date = scoring::today();
    history.push(HistoryEntry {
        program_id: program_id.clone(),
        program_title,
        score,
        date: date.clone(),
    });
    let history_json = serde_json::to_string(&history)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    // Program completions accumulate, unlike the core-course credit which
    // overwrites its bucket.
    let new_score = current + score;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Err(e) = tx.execute(
        "UPDATE program_applications
         SET status = 'completed', completed_date = ?
         WHERE id = ? AND status = 'approved'",
        [date.as_str(), application_id.as_str()],
    ) {
        let _ = tx.rollback();
        warn!(application = %application_id, error = %e, "complete: application update failed");
        return Err(HandlerErr::new("db_update_failed", e.to_string()));
    }
    if let Err(e) = tx.execute(
        &format!(
            "UPDATE users SET {} = ?, {} = ? WHERE id = ?",
            bucket.score_column(),
            bucket.history_column()
        ),
        rusqlite::params![new_score, history_json, student_id],
    ) {
        let _ = tx.rollback();
        warn!(student = %student_id, error = %e, "complete: score credit failed, rolled back");
        return Err(HandlerErr::new("db_update_failed", e.to_string()));
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    Ok(json!({
        "id": application_id,
        "status": "completed",
        "completedDate": date,
        "creditedScore": score,
        "creditedBucket": bucket.score_column(),
    }))
}

/// Students may withdraw while the application is still pending; the row is
/// deleted so re-applying later stays possible.
fn cancel(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let application_id = required_str(&req.params, "applicationId")?;
    let student_id = required_str(&req.params, "studentId")?;

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM program_applications WHERE id = ? AND student_id = ?",
            [application_id.as_str(), student_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some(status) = status else {
        return Err(HandlerErr::new("not_found", "신청 내역을 찾을 수 없습니다."));
    };
    if status != "pending" {
        return Err(HandlerErr::with_details(
            "invalid_status",
            "대기중 상태의 신청만 취소할 수 있습니다.",
            json!({ "status": status }),
        ));
    }
    conn.execute(
        "DELETE FROM program_applications WHERE id = ?",
        [application_id.as_str()],
    )
    .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "cancelled": true }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "applications.list" => list_applications(conn, req),
        "applications.apply" => apply(conn, req),
        "applications.approve" => review(conn, req, "approved"),
        "applications.reject" => review(conn, req, "rejected"),
        "applications.complete" => complete(conn, req),
        _ => cancel(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "applications.list"
        | "applications.apply"
        | "applications.approve"
        | "applications.reject"
        | "applications.complete"
        | "applications.cancel" => Some(handle(state, req)),
        _ => None,
    }
}
