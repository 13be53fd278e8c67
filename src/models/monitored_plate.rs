use libsql::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct MonitoredPlate {
    pub id: String,
    pub plate: String,
    pub created_at: String,
}

impl MonitoredPlate {
    fn from_row(row: &libsql::Row) -> Result<Self, libsql::Error> {
        Ok(Self {
            id: row.get(0)?,
            plate: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    pub async fn find_by_plate(conn: &Connection, plate: &str) -> AppResult<Option<Self>> {
        let mut rows = conn
            .query(
                "SELECT id, plate, created_at FROM monitored_plates WHERE plate = ?",
                [plate],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(conn: &Connection, limit: u32, offset: u32) -> AppResult<Vec<Self>> {
        let mut rows = conn
            .query(
                "SELECT id, plate, created_at FROM monitored_plates ORDER BY plate LIMIT ? OFFSET ?",
                libsql::params![limit as i64, offset as i64],
            )
            .await?;

        let mut plates = Vec::new();
        while let Some(row) = rows.next().await? {
            plates.push(Self::from_row(&row)?);
        }

        Ok(plates)
    }

    pub async fn count(conn: &Connection) -> AppResult<u64> {
        let mut rows = conn.query("SELECT COUNT(*) FROM monitored_plates", ()).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }

    /// Fails with `Conflict` when the plate is already monitored.
    pub async fn create(conn: &Connection, plate: &str) -> AppResult<Self> {
        if Self::find_by_plate(conn, plate).await?.is_some() {
            return Err(AppError::Conflict("Plate already monitored".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO monitored_plates (id, plate) VALUES (?, ?)",
            libsql::params![id, plate],
        )
        .await?;

        Self::find_by_plate(conn, plate)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to create monitored plate".to_string()))
    }

    pub async fn delete(conn: &Connection, plate: &str) -> AppResult<Self> {
        let existing = Self::find_by_plate(conn, plate)
            .await?
            .ok_or_else(|| AppError::NotFound("Plate not found".to_string()))?;

        conn.execute("DELETE FROM monitored_plates WHERE id = ?", [existing.id.as_str()])
            .await?;

        Ok(existing)
    }
}
