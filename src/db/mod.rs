mod pool;
mod schema;

pub use pool::{create_database, DatabaseError};
pub use schema::run_migrations;
