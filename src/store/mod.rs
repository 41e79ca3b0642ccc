pub mod base;
pub mod memory_store;
pub mod sqlite_store;

// Re-export the primary Store items so code outside can do
// "use crate::store::{Store, create_store};"
pub use base::{
    create_store, DefaultStoreOpener, SessionRecord, Store, StoreError, StoreOpener,
    AUTH_STATE_TTL_SECONDS, SESSION_TTL_SECONDS,
};
pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;
