pub mod monitored_plate;
pub mod page;
pub mod registry_data;
pub mod report_history;
pub mod user;
pub mod user_history;

pub use monitored_plate::MonitoredPlate;
pub use page::{Page, PageParams};
pub use registry_data::{Registry, RegistryData};
pub use report_history::ReportHistory;
pub use user::{SyncUser, User};
pub use user_history::{HistoryFilter, UserHistory};
