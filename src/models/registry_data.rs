use std::collections::HashSet;

use libsql::{Connection, Value as SqlValue};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Registries served by the lookup service. Each keeps its own local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    Plate,
    Person,
    Company,
}

impl Registry {
    fn table(&self) -> &'static str {
        match self {
            Registry::Plate => "plate_data",
            Registry::Person => "person_data",
            Registry::Company => "company_data",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Registry::Plate => "plate",
            Registry::Person => "cpf",
            Registry::Company => "cnpj",
        }
    }

    /// Human name used in error details.
    pub fn subject(&self) -> &'static str {
        match self {
            Registry::Plate => "Plate",
            Registry::Person => "Person",
            Registry::Company => "Company",
        }
    }
}

/// Registry payloads already fetched from the lookup service.
pub struct RegistryData;

impl RegistryData {
    pub async fn get(conn: &Connection, registry: Registry, key: &str) -> AppResult<Option<Value>> {
        let sql = format!(
            "SELECT data FROM {} WHERE {} = ?",
            registry.table(),
            registry.key_column()
        );
        let mut rows = conn.query(&sql, [key]).await?;

        match rows.next().await? {
            Some(row) => {
                let data: String = row.get(0)?;
                serde_json::from_str(&data).map(Some).map_err(|e| {
                    AppError::Internal(format!("Corrupt {} data: {}", registry.table(), e))
                })
            }
            None => Ok(None),
        }
    }

    pub async fn store(conn: &Connection, registry: Registry, key: &str, data: &Value) -> AppResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}, data) VALUES (?, ?)",
            registry.table(),
            registry.key_column()
        );
        conn.execute(&sql, libsql::params![key, data.to_string()]).await?;

        Ok(())
    }

    /// Which of `keys` are already stored locally.
    pub async fn known(conn: &Connection, registry: Registry, keys: &[String]) -> AppResult<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT {col} FROM {table} WHERE {col} IN ({placeholders})",
            col = registry.key_column(),
            table = registry.table(),
        );
        let params = keys.iter().cloned().map(SqlValue::Text);
        let mut rows = conn.query(&sql, libsql::params_from_iter(params)).await?;

        let mut known = HashSet::new();
        while let Some(row) = rows.next().await? {
            known.insert(row.get::<String>(0)?);
        }

        Ok(known)
    }
}
