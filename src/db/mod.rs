pub mod connection;
pub mod dynamic_targets;
pub mod import_jobs;
pub mod import_logs;
pub mod migrations;
pub mod templates;
pub mod vehicles;

pub use connection::{DbConn, DbPool};
