// Jobpool Infrastructure - SQLite Adapter
// Implements: JobStore (atomic multi-row claim via UPDATE ... RETURNING)

mod connection;
mod job_store;
mod migration;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
