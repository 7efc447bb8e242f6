//! Transaction-scoped advisory locks.
//!
//! Keys are derived from a namespace (the link table) and an entity id, so
//! writers of the same entity serialize while writers of different entities
//! never contend. Locks are released on commit or rollback.

use anyhow::anyhow;
use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};

use term_store_core::ports::Result;

/// Stable 64-bit lock key for `(namespace, id)`.
pub fn lock_key(namespace: &str, id: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Block until the advisory lock for `key` is held by this transaction.
pub async fn advisory_xact_lock(tx: &mut Transaction<'static, Postgres>, key: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(|e| anyhow!(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable() {
        assert_eq!(
            lock_key("term_store.item_terms", "42"),
            lock_key("term_store.item_terms", "42")
        );
    }

    #[test]
    fn lock_key_separates_namespaces_and_ids() {
        let key = lock_key("term_store.item_terms", "42");
        assert_ne!(key, lock_key("term_store.property_terms", "42"));
        assert_ne!(key, lock_key("term_store.item_terms", "43"));
        // The separator keeps ("ab", "c") apart from ("a", "bc").
        assert_ne!(lock_key("ab", "c"), lock_key("a", "bc"));
    }
}
