//! Versioned persistent response caching.
//!
//! One store per version tag, each a SQLite database file under the cache
//! directory. The registry enumerates and deletes stores by name; bumping
//! the configured version and activating is the only invalidation path.

mod key;
mod registry;
mod store;

pub use key::RequestKey;
pub use registry::StoreRegistry;
pub use store::{CacheStore, StoredResponse};
