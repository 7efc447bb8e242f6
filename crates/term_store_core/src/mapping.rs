//! Link-table configuration supplied by the embedding system.
//!
//! Every entity kind stores its (entity numeric id, TermInLangId) rows in its
//! own table. All tables that share one TermInLangId space are listed in a
//! `LinkTableRegistry`; the cleaner re-checks every one of them before it
//! deletes an id, so a table missing from the registry is a data-loss hazard.

use serde::{Deserialize, Serialize};

use crate::entity_id::EntityKind;
use crate::error::TermStoreError;
use crate::ports::Result;

/// Table and column names of one entity kind's link table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkTableMapping {
    entity_kind: EntityKind,
    table_name: String,
    row_id_column: String,
    entity_id_column: String,
    term_in_lang_id_column: String,
}

impl LinkTableMapping {
    /// Names are interpolated into SQL, so only lower-case identifiers
    /// (optionally schema-qualified) are accepted.
    pub fn new(
        entity_kind: EntityKind,
        table_name: &str,
        row_id_column: &str,
        entity_id_column: &str,
        term_in_lang_id_column: &str,
    ) -> Result<Self> {
        validate_identifier(table_name, true)?;
        validate_identifier(row_id_column, false)?;
        validate_identifier(entity_id_column, false)?;
        validate_identifier(term_in_lang_id_column, false)?;
        Ok(Self {
            entity_kind,
            table_name: table_name.to_string(),
            row_id_column: row_id_column.to_string(),
            entity_id_column: entity_id_column.to_string(),
            term_in_lang_id_column: term_in_lang_id_column.to_string(),
        })
    }

    /// `term_store.item_terms` as created by the bundled migrations.
    pub fn items() -> Self {
        Self {
            entity_kind: EntityKind::Item,
            table_name: "term_store.item_terms".into(),
            row_id_column: "id".into(),
            entity_id_column: "item_id".into(),
            term_in_lang_id_column: "term_in_lang_id".into(),
        }
    }

    /// `term_store.property_terms` as created by the bundled migrations.
    pub fn properties() -> Self {
        Self {
            entity_kind: EntityKind::Property,
            table_name: "term_store.property_terms".into(),
            row_id_column: "id".into(),
            entity_id_column: "property_id".into(),
            term_in_lang_id_column: "term_in_lang_id".into(),
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity_kind
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn row_id_column(&self) -> &str {
        &self.row_id_column
    }

    pub fn entity_id_column(&self) -> &str {
        &self.entity_id_column
    }

    pub fn term_in_lang_id_column(&self) -> &str {
        &self.term_in_lang_id_column
    }
}

fn validate_identifier(name: &str, allow_schema: bool) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid_parts = match parts.len() {
        1 => true,
        2 => allow_schema,
        _ => false,
    };
    let valid = valid_parts
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(TermStoreError::InvalidInput(format!(
            "invalid SQL identifier in link table mapping: {name:?}"
        )))
    }
}

/// All link tables sharing one TermInLangId space, at most one per entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTableRegistry {
    tables: Vec<LinkTableMapping>,
}

impl LinkTableRegistry {
    pub fn new(tables: Vec<LinkTableMapping>) -> Result<Self> {
        if tables.is_empty() {
            return Err(TermStoreError::InvalidInput(
                "link table registry needs at least one table".into(),
            ));
        }
        for (i, table) in tables.iter().enumerate() {
            for other in &tables[i + 1..] {
                if table.entity_kind == other.entity_kind {
                    return Err(TermStoreError::InvalidInput(format!(
                        "entity kind {} registered twice",
                        table.entity_kind
                    )));
                }
                if table.table_name == other.table_name {
                    return Err(TermStoreError::InvalidInput(format!(
                        "link table {} registered twice",
                        table.table_name
                    )));
                }
            }
        }
        Ok(Self { tables })
    }

    /// Item and property tables from the bundled migrations.
    pub fn standard() -> Self {
        Self {
            tables: vec![LinkTableMapping::items(), LinkTableMapping::properties()],
        }
    }

    pub fn tables(&self) -> &[LinkTableMapping] {
        &self.tables
    }

    pub fn for_kind(&self, kind: EntityKind) -> Option<&LinkTableMapping> {
        self.tables.iter().find(|t| t.entity_kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_schema_qualified_tables() {
        let mapping = LinkTableMapping::new(
            EntityKind::Item,
            "terms.wbt_item_terms",
            "wbit_id",
            "wbit_item_id",
            "wbit_term_in_lang_id",
        )
        .unwrap();
        assert_eq!(mapping.table_name(), "terms.wbt_item_terms");
        assert_eq!(mapping.entity_id_column(), "wbit_item_id");
    }

    #[test]
    fn rejects_identifiers_that_would_inject_sql() {
        for bad in ["items; DROP TABLE x", "Items", "a.b.c", "1table", "", "items\""] {
            let err = LinkTableMapping::new(EntityKind::Item, bad, "id", "item_id", "til_id");
            assert!(err.is_err(), "{bad:?} must be rejected");
        }
        let err = LinkTableMapping::new(EntityKind::Item, "items", "id", "s.item_id", "til_id");
        assert!(err.is_err(), "columns cannot be schema-qualified");
    }

    #[test]
    fn registry_rejects_empty_and_duplicates() {
        assert!(LinkTableRegistry::new(vec![]).is_err());
        assert!(LinkTableRegistry::new(vec![LinkTableMapping::items(), LinkTableMapping::items()]).is_err());

        let same_table = LinkTableMapping::new(
            EntityKind::Property,
            "term_store.item_terms",
            "id",
            "property_id",
            "term_in_lang_id",
        )
        .unwrap();
        assert!(LinkTableRegistry::new(vec![LinkTableMapping::items(), same_table]).is_err());
    }

    #[test]
    fn standard_registry_covers_items_and_properties() {
        let registry = LinkTableRegistry::standard();
        assert_eq!(registry.tables().len(), 2);
        assert_eq!(
            registry.for_kind(EntityKind::Property).map(|t| t.table_name()),
            Some("term_store.property_terms")
        );
    }
}
