use libsql::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const COLUMNS: &str = "id, username, full_name, cpf, registration, agency, sector, email, \
                       is_admin, is_agent, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub cpf: Option<String>,
    pub registration: Option<String>,
    pub agency: Option<String>,
    pub sector: Option<String>,
    pub email: Option<String>,
    pub is_admin: bool,
    #[serde(skip_serializing)]
    pub is_agent: bool,
    #[serde(skip_serializing)]
    pub created_at: String,
    #[serde(skip_serializing)]
    pub updated_at: String,
}

impl User {
    fn from_row(row: &libsql::Row) -> Result<Self, libsql::Error> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            full_name: row.get(2)?,
            cpf: row.get(3)?,
            registration: row.get(4)?,
            agency: row.get(5)?,
            sector: row.get(6)?,
            email: row.get(7)?,
            is_admin: row.get::<i32>(8)? != 0,
            is_agent: row.get::<i32>(9)? != 0,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

/// Profile fields taken from identity-provider claims on every authenticated call.
#[derive(Debug, Clone, Default)]
pub struct SyncUser {
    pub username: String,
    pub full_name: Option<String>,
    pub cpf: Option<String>,
    pub registration: Option<String>,
    pub agency: Option<String>,
    pub sector: Option<String>,
    pub email: Option<String>,
    pub is_admin: bool,
    pub is_agent: bool,
}

impl User {
    pub async fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<Self>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", COLUMNS);
        let mut rows = conn.query(&sql, [id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_username(conn: &Connection, username: &str) -> AppResult<Option<Self>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?", COLUMNS);
        let mut rows = conn.query(&sql, [username]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(conn: &Connection, limit: u32, offset: u32) -> AppResult<Vec<Self>> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY username LIMIT ? OFFSET ?",
            COLUMNS
        );
        let mut rows = conn
            .query(&sql, libsql::params![limit as i64, offset as i64])
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(Self::from_row(&row)?);
        }

        Ok(users)
    }

    pub async fn count(conn: &Connection) -> AppResult<u64> {
        let mut rows = conn.query("SELECT COUNT(*) FROM users", ()).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }

    /// Creates the user on first sight, otherwise refreshes profile and role flags.
    pub async fn sync(conn: &Connection, data: SyncUser) -> AppResult<Self> {
        if let Some(existing) = Self::find_by_username(conn, &data.username).await? {
            conn.execute(
                "UPDATE users SET full_name = ?, cpf = ?, registration = ?, agency = ?, \
                 sector = ?, email = ?, is_admin = ?, is_agent = ?, updated_at = datetime('now') \
                 WHERE id = ?",
                libsql::params![
                    data.full_name,
                    data.cpf,
                    data.registration,
                    data.agency,
                    data.sector,
                    data.email,
                    data.is_admin as i32,
                    data.is_agent as i32,
                    existing.id.clone()
                ],
            )
            .await?;

            return Self::find_by_id(conn, &existing.id)
                .await?
                .ok_or_else(|| AppError::Internal("Failed to update user".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users (id, username, full_name, cpf, registration, agency, sector, \
             email, is_admin, is_agent) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                id.clone(),
                data.username,
                data.full_name,
                data.cpf,
                data.registration,
                data.agency,
                data.sector,
                data.email,
                data.is_admin as i32,
                data.is_agent as i32
            ],
        )
        .await?;

        tracing::info!("Created local user {}", id);

        Self::find_by_id(conn, &id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to create user".to_string()))
    }
}
