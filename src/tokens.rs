use crate::schema::tokens;
use crate::schema::tokens::dsl::*;
use crate::{lock_db_write, lock_db_read};
use diesel::sqlite::SqliteConnection;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

// Opaque bearer token handed out on sign-in.
// Tokens never expire on their own; they go away with their user (ON DELETE CASCADE).
#[derive(Queryable, Insertable)]
#[table_name = "tokens"]
pub struct Token {
    id: String,
    uid: i32,
    timestamp: Option<NaiveDateTime>
}

impl Token {
    // Return the owning user id, if the token is known
    pub fn find_token_by_id(db: &SqliteConnection, tid: &str) -> Option<i32> {
        let _lock = lock_db_read!().ok()?;
        tokens.filter(id.eq(tid))
            .select(uid)
            .first::<i32>(db)
            .optional()
            .unwrap_or_else(|e| {
                tracing::error!("token lookup failed: {}", e);
                None
            })
    }

    pub fn create_token(db: &SqliteConnection, user: i32) -> Option<String> {
        let tid = Uuid::new_v4().to_hyphenated().to_string();
        let _lock = lock_db_write!().ok()?;
        diesel::insert_into(tokens::table)
            .values(Token {
                id: tid.clone(),
                uid: user,
                timestamp: Some(chrono::Utc::now().naive_utc())
            })
            .execute(db)
            .map_err(|e| tracing::error!("token insert failed: {}", e))
            .ok()
            .map(|_| tid)
    }
}
