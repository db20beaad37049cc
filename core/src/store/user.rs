use super::{tag_missing, CaseStore};
use crate::{error::DeskResult, model::DeskUser, types::UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const USER_COLUMNS: &str = "id, email, username, role, created_at";

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeskUser> {
    Ok(DeskUser {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(super) fn user_by_id(conn: &Connection, user_id: UserId) -> DeskResult<DeskUser> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM desk_user WHERE id = ?1"),
        params![user_id],
        user_row,
    )
    .map_err(|e| tag_missing(e.into(), "user", user_id))
}

impl CaseStore {
    // ── Users ─────────────────────────────────────────────────────

    pub fn insert_user(
        &self,
        email: &str,
        username: &str,
        role: &str,
        at: DateTime<Utc>,
    ) -> DeskResult<DeskUser> {
        self.conn.execute(
            "INSERT INTO desk_user (email, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![email, username, role, at],
        )?;
        user_by_id(&self.conn, self.conn.last_insert_rowid())
    }

    pub fn user_by_email(&self, email: &str) -> DeskResult<Option<DeskUser>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM desk_user WHERE email = ?1"),
                params![email],
                user_row,
            )
            .optional()
            .map_err(Into::into)
    }
}
