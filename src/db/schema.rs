use libsql::Connection;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        full_name TEXT,
        cpf TEXT,
        registration TEXT,
        agency TEXT,
        sector TEXT,
        email TEXT,
        is_admin INTEGER NOT NULL DEFAULT 0,
        is_agent INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS user_history (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        query_params TEXT,
        body TEXT,
        status_code INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        report_id TEXT,
        timestamp TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_user_history_user ON user_history(user_id, timestamp)",
    "CREATE TABLE IF NOT EXISTS report_history (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        kind TEXT NOT NULL,
        id_report TEXT NOT NULL,
        query_params TEXT,
        body TEXT,
        timestamp TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_report_history_report ON report_history(path, id_report)",
    "CREATE TABLE IF NOT EXISTS monitored_plates (
        id TEXT PRIMARY KEY,
        plate TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS plate_data (
        plate TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS person_data (
        cpf TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS company_data (
        cnpj TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
];

/// Creates every table the API reads or writes. Safe to run on each start.
pub async fn run_migrations(conn: &Connection) -> Result<(), libsql::Error> {
    for statement in MIGRATIONS {
        conn.execute(statement, ()).await?;
    }

    tracing::info!("Applied {} schema statements", MIGRATIONS.len());
    Ok(())
}
