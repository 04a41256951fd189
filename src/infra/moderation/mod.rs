// SQLite implementation of the host ports.

pub mod sqlite_host_store;

pub use sqlite_host_store::{SqliteHostStore, ESCALATION_PENDING};
