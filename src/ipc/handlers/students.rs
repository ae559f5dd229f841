use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_history(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!([]))
}

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let non_curricular: i64 = r.get(8)?;
    let core_subject: i64 = r.get(9)?;
    let industry: i64 = r.get(10)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, Option<String>>(1)?,
        "name": r.get::<_, String>(2)?,
        "department": r.get::<_, Option<String>>(3)?,
        "field": r.get::<_, Option<String>>(4)?,
        "email": r.get::<_, Option<String>>(5)?,
        "phone": r.get::<_, Option<String>>(6)?,
        "memo": r.get::<_, Option<String>>(7)?.unwrap_or_default(),
        "nonCurricularScore": non_curricular,
        "coreSubjectScore": core_subject,
        "industryScore": industry,
        "total": scoring::total_score(non_curricular, core_subject, industry),
        "nonCurricularHistory": parse_history(&r.get::<_, String>(11)?),
        "coreSubjectHistory": parse_history(&r.get::<_, String>(12)?),
        "industryHistory": parse_history(&r.get::<_, String>(13)?),
    }))
}

const STUDENT_COLUMNS: &str = "id, student_id, name, department, field, email, phone, memo,
       non_curricular_score, core_subject_score, industry_score,
       non_curricular_history, core_subject_history, industry_history";

fn list_students(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let field = optional_str(&req.params, "field");
    let sql = format!(
        "SELECT {STUDENT_COLUMNS}
         FROM users
         WHERE account_type = 'student' AND status = 'approved'{}
         ORDER BY student_id",
        if field.is_some() { " AND field = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let students = match &field {
        Some(f) => stmt
            .query_map([f], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "students": students }))
}

fn save_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(&req.params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "이름을 입력해주세요."));
    }
    let department = optional_str(&req.params, "department");
    let field = optional_str(&req.params, "field");
    let email = optional_str(&req.params, "email");
    let phone = optional_str(&req.params, "phone");
    let memo = optional_str(&req.params, "memo");

    if let Some(existing_id) = optional_str(&req.params, "id") {
        let changed = conn
            .execute(
                "UPDATE users
                 SET name = ?, department = ?, field = ?, email = ?, phone = ?, memo = ?
                 WHERE id = ? AND account_type = 'student'",
                rusqlite::params![name.trim(), department, field, email, phone, memo, existing_id],
            )
            .map_err(db_err("db_update_failed"))?;
        if changed == 0 {
            return Err(HandlerErr::new("not_found", "학생을 찾을 수 없습니다."));
        }
        return Ok(json!({ "id": existing_id }));
    }

    // Admin-registered students use the student number as username and are
    // approved immediately, unlike self-signups.
    let student_no = required_str(&req.params, "studentId")?;
    let password = required_str(&req.params, "password")?;
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [student_no.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if taken.is_some() {
        return Err(HandlerErr::new(
            "duplicate_username",
            "이미 존재하는 학번입니다.",
        ));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(
            id, username, password, name, account_type, role, status,
            student_id, department, field, email, phone, memo, created_at
         ) VALUES(?, ?, ?, ?, 'student', 'student', 'approved', ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            user_id,
            student_no,
            password,
            name.trim(),
            student_no,
            department,
            field,
            email,
            phone,
            memo,
            scoring::today(),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "id": user_id }))
}

fn delete_student(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND account_type = 'student'",
            [student_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "학생을 찾을 수 없습니다."));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;

    // Dependent rows first (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM program_applications WHERE student_id = ?",
        [student_id.as_str()],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "program_applications" }),
        ));
    }
    if let Err(e) = tx.execute(
        "DELETE FROM core_courses_submissions WHERE student_id = ?",
        [student_id.as_str()],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "core_courses_submissions" }),
        ));
    }
    if let Err(e) = tx.execute("DELETE FROM users WHERE id = ?", [student_id.as_str()]) {
        let _ = tx.rollback();
        return Err(HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "users" }),
        ));
    }

    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "deleted": true }))
}

fn update_scores(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let non_curricular = req
        .params
        .get("nonCurricularScore")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let core_subject = req
        .params
        .get("coreSubjectScore")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let industry = req
        .params
        .get("industryScore")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let non_curricular_history = req
        .params
        .get("nonCurricularHistory")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let core_subject_history = req
        .params
        .get("coreSubjectHistory")
        .cloned()
        .unwrap_or_else(|| json!([]));
    let industry_history = req
        .params
        .get("industryHistory")
        .cloned()
        .unwrap_or_else(|| json!([]));

    let changed = conn
        .execute(
            "UPDATE users
             SET non_curricular_score = ?, core_subject_score = ?, industry_score = ?,
                 non_curricular_history = ?, core_subject_history = ?, industry_history = ?
             WHERE id = ? AND account_type = 'student'",
            rusqlite::params![
                non_curricular,
                core_subject,
                industry,
                non_curricular_history.to_string(),
                core_subject_history.to_string(),
                industry_history.to_string(),
                student_id,
            ],
        )
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "학생을 찾을 수 없습니다."));
    }
    Ok(json!({
        "id": student_id,
        "total": scoring::total_score(non_curricular, core_subject, industry)
    }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "students.list" => list_students(conn, req),
        "students.save" => save_student(conn, req),
        "students.delete" => delete_student(conn, req),
        _ => update_scores(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" | "students.save" | "students.delete" | "students.updateScores" => {
            Some(handle(state, req))
        }
        _ => None,
    }
}
