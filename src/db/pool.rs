use libsql::{Builder, Database};

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Libsql(#[from] libsql::Error),
}

pub async fn create_database(
    database_url: &str,
    auth_token: Option<&str>,
) -> Result<Database, DatabaseError> {
    // Turso remote URL
    if database_url.starts_with("libsql://") {
        let auth_token = auth_token.ok_or(ConfigError::Missing("TURSO_AUTH_TOKEN"))?;

        return Ok(Builder::new_remote(database_url.to_string(), auth_token.to_string())
            .build()
            .await?);
    }

    // Local SQLite file
    let path = database_url
        .strip_prefix("sqlite:")
        .unwrap_or(database_url)
        .split('?')
        .next()
        .unwrap_or("civitas.db");

    Ok(Builder::new_local(path).build().await?)
}
