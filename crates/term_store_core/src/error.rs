use thiserror::Error;

use crate::entity_id::EntityIdKind;
use crate::term::TermType;

#[derive(Debug, Error)]
pub enum TermStoreError {
    #[error("foreign entity id not supported here: {0}")]
    ForeignEntityId(String),

    #[error("pseudo-entity id cannot be stored: {0}")]
    PseudoEntityNotStorable(String),

    #[error("entity {entity_id} has an unsupported kind, expected {expected}")]
    UnsupportedEntityKind { entity_id: String, expected: String },

    #[error("lookup for {expected} ids was handed {entity_id}")]
    UnexpectedEntityKind {
        entity_id: String,
        expected: EntityIdKind,
    },

    #[error("no pseudo term lookup registered for type {pseudo_type} (entity {entity_id})")]
    NoPseudoTermLookup {
        entity_id: String,
        pseudo_type: String,
    },

    #[error("{source_name} cannot serve {term_type} terms")]
    UnsupportedTermType {
        term_type: TermType,
        source_name: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("term lookup failed for {entity_id}: {message}")]
    TermLookup { entity_id: String, message: String },

    #[error("storage: {0}")]
    Storage(#[from] anyhow::Error),
}

impl TermStoreError {
    /// Transient infrastructure failures may be retried by the caller or job runner.
    /// Everything else signals a caller or routing bug and is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::ForeignEntityId(_)
                | Self::PseudoEntityNotStorable(_)
                | Self::UnsupportedEntityKind { .. }
                | Self::UnexpectedEntityKind { .. }
                | Self::NoPseudoTermLookup { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── is_retryable: exhaustive variant coverage ─────────────────

    #[test]
    fn storage_is_retryable() {
        let err = TermStoreError::Storage(anyhow::anyhow!("deadlock detected"));
        assert!(err.is_retryable());
        assert!(!err.is_integrity_violation());
    }

    #[test]
    fn integrity_errors_are_not_retryable() {
        let errors = vec![
            TermStoreError::ForeignEntityId("wd:Q1".into()),
            TermStoreError::PseudoEntityNotStorable("E1".into()),
            TermStoreError::UnsupportedEntityKind {
                entity_id: "P1".into(),
                expected: "item".into(),
            },
            TermStoreError::UnexpectedEntityKind {
                entity_id: "https://wikidata.org/entity/P31".into(),
                expected: EntityIdKind::Standard,
            },
            TermStoreError::NoPseudoTermLookup {
                entity_id: "E1".into(),
                pseudo_type: "entity-schema".into(),
            },
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err} must not be retryable");
            assert!(err.is_integrity_violation(), "{err} is an integrity violation");
        }
    }

    #[test]
    fn lookup_and_input_errors_are_final_but_not_integrity() {
        let err = TermStoreError::InvalidInput("bad".into());
        assert!(!err.is_retryable());
        assert!(!err.is_integrity_violation());

        let err = TermStoreError::UnsupportedTermType {
            term_type: TermType::Alias,
            source_name: "federated properties".into(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_integrity_violation());
    }

    // ── Display ──────────────────────────────────────────────────

    #[test]
    fn display_unexpected_entity_kind_names_id_and_kind() {
        let e = TermStoreError::UnexpectedEntityKind {
            entity_id: "https://wikidata.org/entity/P31".into(),
            expected: EntityIdKind::Standard,
        };
        assert_eq!(
            e.to_string(),
            "lookup for standard ids was handed https://wikidata.org/entity/P31"
        );
    }

    #[test]
    fn display_no_pseudo_term_lookup() {
        let e = TermStoreError::NoPseudoTermLookup {
            entity_id: "E7".into(),
            pseudo_type: "entity-schema".into(),
        };
        assert_eq!(
            e.to_string(),
            "no pseudo term lookup registered for type entity-schema (entity E7)"
        );
    }

    #[test]
    fn display_unsupported_term_type() {
        let e = TermStoreError::UnsupportedTermType {
            term_type: TermType::Alias,
            source_name: "federated properties".into(),
        };
        assert_eq!(e.to_string(), "federated properties cannot serve alias terms");
    }

    #[test]
    fn display_storage() {
        let e = TermStoreError::Storage(anyhow::anyhow!("connection reset"));
        assert_eq!(e.to_string(), "storage: connection reset");
    }
}
