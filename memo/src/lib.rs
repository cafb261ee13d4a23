//! Agent memory SDK facade.
//!
//! Bundles the memo crates behind feature flags so downstream users can pull in
//! only the pieces they need, for example the engine without the config loader.

#![warn(missing_docs, clippy::pedantic)]

/// Identifiers shared by every component.
pub use memo_primitives as primitives;

/// Embedding providers (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use memo_adapters as adapters;

/// Document store, vector index and memory engine (enabled by `store` feature).
#[cfg(feature = "store")]
pub use memo_store as store;

/// Configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use memo_config as config;

/// Logging setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use memo_telemetry as telemetry;

/// Items most applications need.
#[cfg(feature = "store")]
pub mod prelude {
    pub use memo_primitives::{AgentId, MemoryId, PointId};
    pub use memo_store::{
        ErrorKind, Memory, MemoryDraft, MemoryEngine, MemoryError, MemoryResult, MemoryUpdate,
        SearchResults,
    };
}
