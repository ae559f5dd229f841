use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::attach;
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

pub const STATUS_RECRUITING: &str = "모집중";
pub const STATUS_ONGOING: &str = "진행중";
pub const STATUS_CLOSED: &str = "종료";

fn program_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "category": r.get::<_, String>(2)?,
        "field": r.get::<_, String>(3)?,
        "startDate": r.get::<_, Option<String>>(4)?,
        "endDate": r.get::<_, Option<String>>(5)?,
        "status": r.get::<_, String>(6)?,
        "maxParticipants": r.get::<_, Option<i64>>(7)?,
        "requiresFile": r.get::<_, i64>(8)? != 0,
        "score": r.get::<_, i64>(9)?,
        "description": r.get::<_, Option<String>>(10)?,
        "imageUrl": r.get::<_, Option<String>>(11)?,
        "attachedFiles": serde_json::from_str::<serde_json::Value>(&r.get::<_, String>(12)?)
            .unwrap_or_else(|_| json!([])),
    }))
}

fn list_programs(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let field = optional_str(&req.params, "field");
    let sql = format!(
        "SELECT id, title, category, field, start_date, end_date, status,
                max_participants, requires_file, score, description, image_url, attached_files
         FROM programs{}
         ORDER BY created_at DESC",
        if field.is_some() { " WHERE field = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let programs = match &field {
        Some(f) => stmt
            .query_map([f], program_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], program_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "programs": programs }))
}

fn validate_status(status: &str) -> Result<(), HandlerErr> {
    match status {
        STATUS_RECRUITING | STATUS_ONGOING | STATUS_CLOSED => Ok(()),
        other => Err(HandlerErr::with_details(
            "bad_params",
            "status must be one of: 모집중, 진행중, 종료",
            json!({ "status": other }),
        )),
    }
}

fn save_program(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let title = required_str(&req.params, "title")?;
    let category = required_str(&req.params, "category")?;
    let field = required_str(&req.params, "field")?;
    let status = required_str(&req.params, "status")?;
    validate_status(&status)?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "프로그램명을 입력해주세요."));
    }
    let score = req.params.get("score").and_then(|v| v.as_i64()).unwrap_or(0);
    if score < 0 {
        return Err(HandlerErr::new("bad_params", "score must not be negative"));
    }
    let max_participants = req.params.get("maxParticipants").and_then(|v| v.as_i64());
    let requires_file = req
        .params
        .get("requiresFile")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let image_url = optional_str(&req.params, "imageUrl");
    if let Some(url) = &image_url {
        attach::validate_image(url)
            .map_err(|e| HandlerErr::new("bad_file_type", e.to_string()))?;
    }
    let attached_files = req
        .params
        .get("attachedFiles")
        .cloned()
        .unwrap_or_else(|| json!([]));

    if let Some(existing_id) = optional_str(&req.params, "id") {
        let changed = conn
            .execute(
                "UPDATE programs
                 SET title = ?, category = ?, field = ?, start_date = ?, end_date = ?,
                     status = ?, max_participants = ?, requires_file = ?, score = ?,
                     description = ?, image_url = ?, attached_files = ?
                 WHERE id = ?",
                rusqlite::params![
                    title.trim(),
                    category,
                    field,
                    optional_str(&req.params, "startDate"),
                    optional_str(&req.params, "endDate"),
                    status,
                    max_participants,
                    requires_file as i64,
                    score,
                    optional_str(&req.params, "description"),
                    image_url,
                    attached_files.to_string(),
                    existing_id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
        if changed == 0 {
            return Err(HandlerErr::new("not_found", "프로그램을 찾을 수 없습니다."));
        }
        return Ok(json!({ "id": existing_id }));
    }

    let program_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(
            id, title, category, field, start_date, end_date, status,
            max_participants, requires_file, score, description, image_url,
            attached_files, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            program_id,
            title.trim(),
            category,
            field,
            optional_str(&req.params, "startDate"),
            optional_str(&req.params, "endDate"),
            status,
            max_participants,
            requires_file as i64,
            score,
            optional_str(&req.params, "description"),
            image_url,
            attached_files.to_string(),
            scoring::now_iso(),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "id": program_id }))
}

fn delete_program(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let program_id = required_str(&req.params, "programId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Err(e) = tx.execute(
        "DELETE FROM program_applications WHERE program_id = ?",
        [program_id.as_str()],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr::with_details(
            "db_delete_failed",
            e.to_string(),
            json!({ "table": "program_applications" }),
        ));
    }
    let changed = match tx.execute("DELETE FROM programs WHERE id = ?", [program_id.as_str()]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "programs" }),
            ));
        }
    };
    if changed == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::new("not_found", "프로그램을 찾을 수 없습니다."));
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "deleted": true }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "programs.list" => list_programs(conn, req),
        "programs.save" => save_program(conn, req),
        _ => delete_program(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.list" | "programs.save" | "programs.delete" => Some(handle(state, req)),
        _ => None,
    }
}
