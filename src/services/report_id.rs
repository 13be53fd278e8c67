use chrono::Local;
use uuid::Uuid;

/// New report identifier: local `YYYYMMDD.HHMMSS` followed by three random digits.
pub fn generate() -> String {
    let suffix = Uuid::new_v4().as_u128() % 1000;
    format!("{}{:03}", Local::now().format("%Y%m%d.%H%M%S"), suffix)
}
