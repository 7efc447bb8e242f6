//! Bundled migrations for the `term_store` schema.

use anyhow::anyhow;
use sqlx::PgPool;

use term_store_core::ports::Result;

/// `(name, sql)` in apply order. Every statement is idempotent.
pub const MIGRATIONS: &[(&str, &str)] = &[(
    "001_term_store.sql",
    include_str!("../../../migrations/001_term_store.sql"),
)];

/// Apply all bundled migrations in order.
pub async fn apply_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .map_err(|e| anyhow!("migration {name} failed: {e}"))?;
        tracing::info!("Applied migration {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_by_name() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn schema_creates_every_standard_link_table() {
        let sql = MIGRATIONS[0].1;
        for table in ["item_terms", "property_terms", "term_in_lang", "cleanup_jobs"] {
            assert!(
                sql.contains(&format!("CREATE TABLE IF NOT EXISTS term_store.{table}")),
                "missing table {table}"
            );
        }
    }
}
