//! User repository implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use notebridge_core::{Error, NoteMode, Notebook, Result, User, UserRepository};

/// PostgreSQL implementation of UserRepository.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<User> {
        let mode: String = row.get("mode");
        let mode = NoteMode::parse(&mode)
            .ok_or_else(|| Error::InvalidInput(format!("unknown note mode: {}", mode)))?;
        let places: serde_json::Value = row.get("places");
        let places: HashMap<String, String> = serde_json::from_value(places)?;

        Ok(User {
            id: row.get("id"),
            chat_id: row.get("chat_id"),
            access_token: row.get("access_token"),
            mode,
            current_notebook: Notebook {
                guid: row.get("current_notebook_guid"),
                name: row.get("current_notebook_name"),
            },
            places,
        })
    }

    /// Insert a user, or overwrite it when the id already exists.
    pub async fn upsert(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO bot_user (id, chat_id, access_token, mode, current_notebook_guid,
                                   current_notebook_name, places)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE SET
                 chat_id = EXCLUDED.chat_id,
                 access_token = EXCLUDED.access_token,
                 mode = EXCLUDED.mode,
                 current_notebook_guid = EXCLUDED.current_notebook_guid,
                 current_notebook_name = EXCLUDED.current_notebook_name,
                 places = EXCLUDED.places,
                 updated_at = now()",
        )
        .bind(user.id)
        .bind(user.chat_id)
        .bind(&user.access_token)
        .bind(user.mode.as_str())
        .bind(&user.current_notebook.guid)
        .bind(&user.current_notebook.name)
        .bind(serde_json::to_value(&user.places)?)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, user_id: i64) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, chat_id, access_token, mode, current_notebook_guid,
                    current_notebook_name, places
             FROM bot_user WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_row(row),
            None => Err(Error::UserNotFound(user_id)),
        }
    }

    async fn save(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE bot_user
             SET mode = $2, current_notebook_guid = $3, current_notebook_name = $4,
                 places = $5, updated_at = now()
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(user.mode.as_str())
        .bind(&user.current_notebook.guid)
        .bind(&user.current_notebook.name)
        .bind(serde_json::to_value(&user.places)?)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::UserNotFound(user.id));
        }
        Ok(())
    }
}
