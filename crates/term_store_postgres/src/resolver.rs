//! Batched, read-only resolution of TermInLangIds.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};

use term_store_core::mapping::LinkTableMapping;
use term_store_core::ports::{Result, TermFilter, TermInLangIdsResolver};
use term_store_core::term::{TermInLangId, TermType, TermsByType};

/// Reads through the three interning levels. Point it at a replica pool if one
/// is available; it never takes locks.
pub struct PgTermInLangIdsResolver {
    pool: PgPool,
}

impl PgTermInLangIdsResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `NULL` array parameters disable the corresponding filter.
fn filter_params(filter: &TermFilter) -> (Option<Vec<i16>>, Option<Vec<String>>) {
    let type_ids = filter
        .term_types
        .as_ref()
        .map(|types| types.iter().map(TermType::type_id).collect());
    let languages = filter
        .languages
        .as_ref()
        .map(|langs| langs.iter().cloned().collect());
    (type_ids, languages)
}

fn push_row(terms: &mut TermsByType, type_id: i16, language: String, text: String) {
    match TermType::from_type_id(type_id) {
        Some(term_type) => terms.push(term_type, language, text),
        None => tracing::warn!(type_id, "Skipping term_in_lang row with unknown type_id"),
    }
}

#[async_trait]
impl TermInLangIdsResolver for PgTermInLangIdsResolver {
    async fn resolve_term_in_lang_ids(
        &self,
        ids: &BTreeSet<TermInLangId>,
        filter: &TermFilter,
    ) -> Result<TermsByType> {
        if ids.is_empty() || filter.is_unsatisfiable() {
            return Ok(TermsByType::new());
        }
        let (type_ids, languages) = filter_params(filter);
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();

        let rows = sqlx::query_as::<_, (i16, String, String)>(
            r#"
            SELECT t.type_id, til.language, x.text
            FROM term_store.term_in_lang t
            JOIN term_store.text_in_lang til ON til.id = t.text_in_lang_id
            JOIN term_store.text x ON x.id = til.text_id
            WHERE t.id = ANY($1::bigint[])
              AND ($2::smallint[] IS NULL OR t.type_id = ANY($2))
              AND ($3::text[] IS NULL OR til.language = ANY($3))
            ORDER BY t.id
            "#,
        )
        .bind(&raw_ids)
        .bind(&type_ids)
        .bind(&languages)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;

        let mut terms = TermsByType::new();
        for (type_id, language, text) in rows {
            push_row(&mut terms, type_id, language, text);
        }
        Ok(terms)
    }

    async fn resolve_grouped_term_in_lang_ids(
        &self,
        mapping: &LinkTableMapping,
        entity_numeric_ids: &[u32],
        filter: &TermFilter,
    ) -> Result<BTreeMap<u32, TermsByType>> {
        if entity_numeric_ids.is_empty() || filter.is_unsatisfiable() {
            return Ok(BTreeMap::new());
        }
        let (type_ids, languages) = filter_params(filter);
        let entity_ids: Vec<i64> = entity_numeric_ids.iter().map(|id| i64::from(*id)).collect();

        // Link row order is insertion order, which keeps alias lists stable.
        let sql = format!(
            r#"
            SELECT l.{entity}, t.type_id, til.language, x.text
            FROM {table} l
            JOIN term_store.term_in_lang t ON t.id = l.{til_col}
            JOIN term_store.text_in_lang til ON til.id = t.text_in_lang_id
            JOIN term_store.text x ON x.id = til.text_id
            WHERE l.{entity} = ANY($1::bigint[])
              AND ($2::smallint[] IS NULL OR t.type_id = ANY($2))
              AND ($3::text[] IS NULL OR til.language = ANY($3))
            ORDER BY l.{entity}, l.{row_id}
            "#,
            entity = mapping.entity_id_column(),
            table = mapping.table_name(),
            til_col = mapping.term_in_lang_id_column(),
            row_id = mapping.row_id_column(),
        );
        let rows = sqlx::query_as::<_, (i64, i16, String, String)>(&sql)
            .bind(&entity_ids)
            .bind(&type_ids)
            .bind(&languages)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;

        let mut grouped: BTreeMap<u32, TermsByType> = BTreeMap::new();
        for (entity_id, type_id, language, text) in rows {
            let entity_id = u32::try_from(entity_id)
                .map_err(|_| anyhow!("entity id {entity_id} out of range in {}", mapping.table_name()))?;
            push_row(grouped.entry(entity_id).or_default(), type_id, language, text);
        }
        Ok(grouped)
    }

    async fn entity_term_in_lang_ids(
        &self,
        mapping: &LinkTableMapping,
        entity_numeric_id: u32,
    ) -> Result<BTreeSet<TermInLangId>> {
        let sql = format!(
            "SELECT {til} FROM {table} WHERE {entity} = $1",
            til = mapping.term_in_lang_id_column(),
            table = mapping.table_name(),
            entity = mapping.entity_id_column(),
        );
        let rows = sqlx::query_as::<_, (i64,)>(&sql)
            .bind(i64::from(entity_numeric_id))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(|(id,)| TermInLangId(id)).collect())
    }
}
