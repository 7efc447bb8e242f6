//! Postgres-backed wiring of writers, cleanup and lookups over one pool.

use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;

use term_store_core::cleanup::{CleanupDispatcher, CleanupPolicy};
use term_store_core::ports::TermInLangIdsResolver;
use term_store_core::{
    DatabasePrefetchingTermLookup, EntityTermStoreWriter, LinkTableMapping, LinkTableRegistry,
    NfcNormalizer, TermInLangId, TermKey,
};
use term_store_postgres::{
    PgCleanupQueue, PgTermInLangIdsCleaner, PgTermInLangIdsResolver, PgTermStoreBackend,
};

pub struct PgFixture {
    pub pool: PgPool,
    pub backend: Arc<PgTermStoreBackend>,
    pub resolver: Arc<PgTermInLangIdsResolver>,
    pub cleaner: Arc<PgTermInLangIdsCleaner>,
    pub queue: Arc<PgCleanupQueue>,
    pub items: Arc<EntityTermStoreWriter>,
    pub properties: Arc<EntityTermStoreWriter>,
}

impl PgFixture {
    pub fn new(pool: PgPool) -> Self {
        let backend = Arc::new(PgTermStoreBackend::new(pool.clone()));
        let queue = Arc::new(PgCleanupQueue::new(pool.clone()));
        let writer = |mapping| {
            Arc::new(EntityTermStoreWriter::new(
                backend.clone(),
                mapping,
                Arc::new(NfcNormalizer),
                queue.clone(),
            ))
        };
        let items = writer(LinkTableMapping::items());
        let properties = writer(LinkTableMapping::properties());
        Self {
            resolver: Arc::new(PgTermInLangIdsResolver::new(pool.clone())),
            cleaner: Arc::new(PgTermInLangIdsCleaner::new(
                pool.clone(),
                LinkTableRegistry::standard(),
            )),
            pool,
            backend,
            queue,
            items,
            properties,
        }
    }

    pub fn dispatcher(&self, policy: CleanupPolicy) -> CleanupDispatcher {
        CleanupDispatcher::new(self.queue.clone(), self.cleaner.clone(), policy)
    }

    pub fn lookup(&self) -> DatabasePrefetchingTermLookup {
        DatabasePrefetchingTermLookup::new(self.resolver.clone(), LinkTableRegistry::standard())
    }

    pub async fn linked(&self, mapping: &LinkTableMapping, numeric_id: u32) -> BTreeSet<TermInLangId> {
        self.resolver
            .entity_term_in_lang_ids(mapping, numeric_id)
            .await
            .expect("link lookup failed")
    }

    /// Rows in `term_in_lang` for one triple: 0 or 1.
    pub async fn term_in_lang_rows(&self, key: &TermKey) -> i64 {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT count(*)
            FROM term_store.term_in_lang t
            JOIN term_store.text_in_lang til ON til.id = t.text_in_lang_id
            JOIN term_store.text x ON x.id = til.text_id
            WHERE t.type_id = $1 AND til.language = $2 AND x.text = $3
            "#,
        )
        .bind(key.term_type.type_id())
        .bind(&key.language)
        .bind(&key.text)
        .fetch_one(&self.pool)
        .await
        .expect("count term_in_lang failed");
        row.0
    }

    pub async fn term_in_lang_exists(&self, id: TermInLangId) -> bool {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM term_store.term_in_lang WHERE id = $1)")
                .bind(id.0)
                .fetch_one(&self.pool)
                .await
                .expect("term_in_lang lookup failed");
        row.0
    }

    pub async fn text_rows(&self, text: &str) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM term_store.text WHERE text = $1")
            .bind(text)
            .fetch_one(&self.pool)
            .await
            .expect("count text failed");
        row.0
    }

    pub async fn link_rows(&self, mapping: &LinkTableMapping) -> i64 {
        let sql = format!("SELECT count(*) FROM {}", mapping.table_name());
        let row: (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await
            .expect("count links failed");
        row.0
    }
}
