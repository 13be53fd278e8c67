//! Vehicle monitoring API: guarded HTTP routes over plate registrations,
//! detection trips and correlated-plate reports.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

pub use config::Config;
pub use guard::{Guard, RouteTable};
pub use routes::{create_router, AppState};
