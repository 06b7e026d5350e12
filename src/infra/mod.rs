// Storage adapters backed by external systems

pub mod sqlite_storage;

pub use sqlite_storage::SqliteStorage;
