pub mod repo;
pub mod schema;

pub use repo::{CustodyStore, ImageRecord, SYSTEM_SENTINEL};
