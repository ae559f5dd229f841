use super::{db_conn, db_err, optional_str, required_str, HandlerErr};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn notice_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "field": r.get::<_, String>(2)?,
        "content": r.get::<_, String>(3)?,
        "author": r.get::<_, Option<String>>(4)?,
        "date": r.get::<_, Option<String>>(5)?,
        "views": r.get::<_, i64>(6)?,
        "imageUrl": r.get::<_, Option<String>>(7)?,
        "attachedFiles": serde_json::from_str::<serde_json::Value>(&r.get::<_, String>(8)?)
            .unwrap_or_else(|_| json!([])),
    }))
}

fn list_notices(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let field = optional_str(&req.params, "field");
    let sql = format!(
        "SELECT id, title, field, content, author, date, views, image_url, attached_files
         FROM notices{}
         ORDER BY created_at DESC",
        if field.is_some() { " WHERE field = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let notices = match &field {
        Some(f) => stmt
            .query_map([f], notice_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], notice_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "notices": notices }))
}

fn save_notice(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let title = required_str(&req.params, "title")?;
    let field = required_str(&req.params, "field")?;
    let content = required_str(&req.params, "content")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "제목을 입력해주세요."));
    }
    let attached_files = req
        .params
        .get("attachedFiles")
        .cloned()
        .unwrap_or_else(|| json!([]));

    if let Some(existing_id) = optional_str(&req.params, "id") {
        let changed = conn
            .execute(
                "UPDATE notices
                 SET title = ?, field = ?, content = ?, author = ?, date = ?,
                     image_url = ?, attached_files = ?
                 WHERE id = ?",
                rusqlite::params![
                    title.trim(),
                    field,
                    content,
                    optional_str(&req.params, "author"),
                    optional_str(&req.params, "date"),
                    optional_str(&req.params, "imageUrl"),
                    attached_files.to_string(),
                    existing_id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
        if changed == 0 {
            return Err(HandlerErr::new("not_found", "공지사항을 찾을 수 없습니다."));
        }
        return Ok(json!({ "id": existing_id }));
    }

    let notice_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notices(
            id, title, field, content, author, date, views, image_url,
            attached_files, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
        rusqlite::params![
            notice_id,
            title.trim(),
            field,
            content,
            optional_str(&req.params, "author"),
            optional_str(&req.params, "date"),
            optional_str(&req.params, "imageUrl"),
            attached_files.to_string(),
            scoring::now_iso(),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "id": notice_id }))
}

fn delete_notice(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let notice_id = required_str(&req.params, "noticeId")?;
    let changed = conn
        .execute("DELETE FROM notices WHERE id = ?", [notice_id.as_str()])
        .map_err(db_err("db_delete_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "공지사항을 찾을 수 없습니다."));
    }
    Ok(json!({ "deleted": true }))
}

// The detail modal bumps the counter once per open.
fn view_notice(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let notice_id = required_str(&req.params, "noticeId")?;
    let changed = conn
        .execute(
            "UPDATE notices SET views = views + 1 WHERE id = ?",
            [notice_id.as_str()],
        )
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "공지사항을 찾을 수 없습니다."));
    }
    let views: i64 = conn
        .query_row(
            "SELECT views FROM notices WHERE id = ?",
            [notice_id.as_str()],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "id": notice_id, "views": views }))
}

fn handle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = match req.method.as_str() {
        "notices.list" => list_notices(conn, req),
        "notices.save" => save_notice(conn, req),
        "notices.view" => view_notice(conn, req),
        _ => delete_notice(conn, req),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notices.list" | "notices.save" | "notices.delete" | "notices.view" => {
            Some(handle(state, req))
        }
        _ => None,
    }
}
