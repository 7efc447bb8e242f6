//! Term store core: interned term types, storage ports, writer orchestration,
//! asynchronous cleanup, prefetching lookups and fallback-aware retrieval.
//!
//! This crate carries no database driver. Postgres adapters for the ports live
//! in `term_store_postgres`; `memory` provides an in-process backend for tests.
//!
//! - Write path: `EntityTermStoreWriter` → `TermStoreTransaction` → link tables,
//!   with removed ids handed to a `CleanupJobSink` after commit.
//! - Cleanup: `CleanupDispatcher` claims jobs and runs a `TermInLangIdsCleaner`.
//! - Read path: `DispatchingFallbackLabelDescriptionLookup` → per-kind fallback
//!   lookup → `TermLookup` → `LanguageFallbackChain` reduction.

pub mod cleanup;
pub mod entity_id;
pub mod error;
pub mod fallback;
pub mod lookup;
pub mod mapping;
pub mod memory;
pub mod normalize;
pub mod ports;
pub mod term;
pub mod writer;

pub use cleanup::{CleanupDispatcher, CleanupJob, CleanupPolicy, DispatchOutcome};
pub use entity_id::{
    EntityId, EntityIdKind, EntityIdParser, EntityKind, FederatedPropertyId, PseudoEntityId,
    StandardEntityId,
};
pub use error::TermStoreError;
pub use fallback::{
    CachingFallbackLabelDescriptionLookup, DispatchingFallbackLabelDescriptionLookup,
    FallbackLabelDescriptionLookup, LanguageFallbackChain, LanguageFallbackLabelDescriptionLookup,
    LanguageWithConversion, PseudoFallbackLabelDescriptionLookup, PseudoTermLookupRegistry,
};
pub use lookup::{
    ApiPrefetchingTermLookup, DatabasePrefetchingTermLookup, PrefetchingTermLookup, Prefetched,
    TermLookup,
};
pub use mapping::{LinkTableMapping, LinkTableRegistry};
pub use normalize::{NfcNormalizer, StringNormalizer};
pub use ports::Result;
pub use term::{Fingerprint, TermFallback, TermInLangId, TermKey, TermType, TermsByType};
pub use writer::{EntityTermStoreWriter, LinkDiff, WriteOutcome};
