pub mod adapter;
pub mod backend;
pub mod cache;
pub mod memory;

pub use adapter::{CacheRecord, DualSource, Origin, Persisted, WritePolicy};
pub use backend::{CatalogEntry, FeeBackend, RemoteError, RemoteResult};
pub use cache::{FallbackCache, JsonFileCache, LocalCache, MemoryCache};
pub use memory::InMemoryBackend;
