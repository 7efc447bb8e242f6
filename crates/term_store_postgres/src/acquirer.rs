//! Insert-if-absent interning of (type, language, text) triples.
//!
//! Each level (`text`, `text_in_lang`, `term_in_lang`) is handled the same
//! way: `INSERT .. ON CONFLICT DO NOTHING` over sorted input, then a
//! `SELECT .. FOR SHARE` to read the ids back and pin the rows until commit.
//! A concurrent first insert of the same value is waited for by the unique
//! index and then read back; nobody ever sees a duplicate-key error.
//!
//! The share locks conflict with the cleaner's `FOR UPDATE`, so a row this
//! transaction returns cannot be deleted under it. A row the cleaner deleted
//! between our insert and our select is simply missing from the select; the
//! whole acquisition is then repeated.

use anyhow::anyhow;
use sqlx::PgConnection;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use term_store_core::ports::Result;
use term_store_core::term::{TermInLangId, TermKey, TermsByType};

const MAX_ACQUIRE_ATTEMPTS: usize = 3;

pub(crate) async fn acquire_term_in_lang_ids(
    conn: &mut PgConnection,
    terms: &TermsByType,
) -> Result<BTreeSet<TermInLangId>> {
    let keys = terms.keys();
    if keys.is_empty() {
        return Ok(BTreeSet::new());
    }

    for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
        let acquired = try_acquire(conn, &keys).await?;
        if acquired.len() == keys.len() {
            return Ok(acquired.into_values().collect());
        }
        tracing::debug!(
            attempt,
            missing = keys.len() - acquired.len(),
            "Interned rows removed by a concurrent cleanup, retrying acquisition"
        );
    }

    Err(anyhow!(
        "could not acquire ids for {} terms after {} attempts",
        keys.len(),
        MAX_ACQUIRE_ATTEMPTS
    )
    .into())
}

/// One pass over all three levels. Keys whose rows vanished mid-way are
/// missing from the result.
async fn try_acquire(
    conn: &mut PgConnection,
    keys: &BTreeSet<TermKey>,
) -> Result<BTreeMap<TermKey, TermInLangId>> {
    // ── text ──────────────────────────────────────────────────
    let texts: Vec<String> = keys
        .iter()
        .map(|k| k.text.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    sqlx::query(
        r#"
        INSERT INTO term_store.text (text)
        SELECT t FROM UNNEST($1::text[]) AS t
        ORDER BY t
        ON CONFLICT (text) DO NOTHING
        "#,
    )
    .bind(&texts)
    .execute(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?;

    let text_ids: HashMap<String, i64> = sqlx::query_as::<_, (i64, String)>(
        r#"
        SELECT id, text
        FROM term_store.text
        WHERE text = ANY($1::text[])
        ORDER BY id
        FOR SHARE
        "#,
    )
    .bind(&texts)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?
    .into_iter()
    .map(|(id, text)| (text, id))
    .collect();

    // ── text_in_lang ──────────────────────────────────────────
    let pairs: BTreeSet<(String, i64)> = keys
        .iter()
        .filter_map(|k| text_ids.get(&k.text).map(|id| (k.language.clone(), *id)))
        .collect();
    let (languages, pair_text_ids): (Vec<String>, Vec<i64>) = pairs.into_iter().unzip();

    sqlx::query(
        r#"
        INSERT INTO term_store.text_in_lang (language, text_id)
        SELECT w.language, w.text_id
        FROM UNNEST($1::text[], $2::bigint[]) AS w(language, text_id)
        ORDER BY w.language, w.text_id
        ON CONFLICT (language, text_id) DO NOTHING
        "#,
    )
    .bind(&languages)
    .bind(&pair_text_ids)
    .execute(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?;

    let text_in_lang_ids: HashMap<(String, i64), i64> = sqlx::query_as::<_, (i64, String, i64)>(
        r#"
        SELECT til.id, til.language, til.text_id
        FROM term_store.text_in_lang til
        JOIN UNNEST($1::text[], $2::bigint[]) AS w(language, text_id)
          ON til.language = w.language AND til.text_id = w.text_id
        ORDER BY til.id
        FOR SHARE OF til
        "#,
    )
    .bind(&languages)
    .bind(&pair_text_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?
    .into_iter()
    .map(|(id, language, text_id)| ((language, text_id), id))
    .collect();

    // ── term_in_lang ──────────────────────────────────────────
    let mut wanted: BTreeMap<(i16, i64), &TermKey> = BTreeMap::new();
    for key in keys {
        let Some(text_id) = text_ids.get(&key.text) else {
            continue;
        };
        let Some(til_id) = text_in_lang_ids.get(&(key.language.clone(), *text_id)) else {
            continue;
        };
        wanted.insert((key.term_type.type_id(), *til_id), key);
    }
    let (type_ids, til_ids): (Vec<i16>, Vec<i64>) = wanted.keys().copied().unzip();

    sqlx::query(
        r#"
        INSERT INTO term_store.term_in_lang (type_id, text_in_lang_id)
        SELECT w.type_id, w.text_in_lang_id
        FROM UNNEST($1::smallint[], $2::bigint[]) AS w(type_id, text_in_lang_id)
        ORDER BY w.type_id, w.text_in_lang_id
        ON CONFLICT (type_id, text_in_lang_id) DO NOTHING
        "#,
    )
    .bind(&type_ids)
    .bind(&til_ids)
    .execute(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?;

    let rows = sqlx::query_as::<_, (i64, i16, i64)>(
        r#"
        SELECT t.id, t.type_id, t.text_in_lang_id
        FROM term_store.term_in_lang t
        JOIN UNNEST($1::smallint[], $2::bigint[]) AS w(type_id, text_in_lang_id)
          ON t.type_id = w.type_id AND t.text_in_lang_id = w.text_in_lang_id
        ORDER BY t.id
        FOR SHARE OF t
        "#,
    )
    .bind(&type_ids)
    .bind(&til_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, type_id, til_id)| {
            wanted
                .get(&(type_id, til_id))
                .map(|key| ((*key).clone(), TermInLangId(id)))
        })
        .collect())
}
