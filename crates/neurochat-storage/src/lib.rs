// Postgres storage layer with sqlx

pub mod models;
pub mod object_store;
pub mod repositories;

pub use models::*;
pub use object_store::{
    purge_thread_objects, save_to_storage, MemoryStorage, ObjectMetadata, ObjectStorage,
};
pub use repositories::Database;
