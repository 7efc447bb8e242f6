//! Postgres implementations of all term_store_core port traits.
//!
//! Each adapter wraps a PgPool. All SQL is runtime-checked (sqlx::query,
//! not sqlx::query!) to avoid a compile-time database requirement. Link-table
//! names come from validated `LinkTableMapping`s and are interpolated.

mod acquirer;
pub mod cleaner;
pub mod locks;
pub mod queue;
pub mod resolver;
pub mod schema;
pub mod transaction;

use sqlx::PgPool;
use term_store_core::mapping::LinkTableRegistry;

pub use cleaner::PgTermInLangIdsCleaner;
pub use queue::PgCleanupQueue;
pub use resolver::PgTermInLangIdsResolver;
pub use schema::apply_migrations;
pub use transaction::{PgTermStoreBackend, PgTermStoreTransaction};

/// Every Postgres adapter over one pool.
pub struct PgStores {
    pub backend: PgTermStoreBackend,
    pub resolver: PgTermInLangIdsResolver,
    pub cleaner: PgTermInLangIdsCleaner,
    pub queue: PgCleanupQueue,
}

impl PgStores {
    pub fn new(pool: PgPool, registry: LinkTableRegistry) -> Self {
        Self {
            backend: PgTermStoreBackend::new(pool.clone()),
            resolver: PgTermInLangIdsResolver::new(pool.clone()),
            cleaner: PgTermInLangIdsCleaner::new(pool.clone(), registry),
            queue: PgCleanupQueue::new(pool),
        }
    }
}
