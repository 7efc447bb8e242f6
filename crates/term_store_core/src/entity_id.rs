//! Entity identifiers as a closed set of routing kinds.
//!
//! Standard ids are stored and resolved by this engine. Federated property ids
//! live in a remote source. Pseudo-entity ids look like entities from the outside
//! but are served by per-type lookups registered by the embedding system.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TermStoreError;
use crate::ports::Result;

// ── EntityKind ────────────────────────────────────────────────

/// Kind of a standard entity; each kind has its own link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Property,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Property => "property",
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            Self::Item => 'Q',
            Self::Property => 'P',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'Q' => Some(Self::Item),
            'P' => Some(Self::Property),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Id variants ───────────────────────────────────────────────

/// An item or property id of this repository, or of a foreign one when
/// `repository` is set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StandardEntityId {
    pub kind: EntityKind,
    pub numeric_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl StandardEntityId {
    pub fn is_foreign(&self) -> bool {
        self.repository.is_some()
    }
}

impl fmt::Display for StandardEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(repository) = &self.repository {
            write!(f, "{repository}:")?;
        }
        write!(f, "{}{}", self.kind.prefix(), self.numeric_id)
    }
}

/// A property of a remote repository, addressed by its concept URI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FederatedPropertyId {
    pub concept_base_uri: String,
    pub remote_id: String,
}

impl fmt::Display for FederatedPropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.concept_base_uri, self.remote_id)
    }
}

/// An id that behaves like an entity id but is not stored by this engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PseudoEntityId {
    pub pseudo_type: String,
    pub serialization: String,
}

impl fmt::Display for PseudoEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialization)
    }
}

/// Routing discriminator of an `EntityId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityIdKind {
    Standard,
    FederatedProperty,
    Pseudo,
}

impl EntityIdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::FederatedProperty => "federated property",
            Self::Pseudo => "pseudo-entity",
        }
    }
}

impl fmt::Display for EntityIdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "id_type", rename_all = "snake_case")]
pub enum EntityId {
    Standard(StandardEntityId),
    FederatedProperty(FederatedPropertyId),
    Pseudo(PseudoEntityId),
}

impl EntityId {
    pub fn item(numeric_id: u32) -> Self {
        Self::Standard(StandardEntityId {
            kind: EntityKind::Item,
            numeric_id,
            repository: None,
        })
    }

    pub fn property(numeric_id: u32) -> Self {
        Self::Standard(StandardEntityId {
            kind: EntityKind::Property,
            numeric_id,
            repository: None,
        })
    }

    pub fn federated_property(
        concept_base_uri: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self::FederatedProperty(FederatedPropertyId {
            concept_base_uri: concept_base_uri.into(),
            remote_id: remote_id.into(),
        })
    }

    pub fn pseudo(pseudo_type: impl Into<String>, serialization: impl Into<String>) -> Self {
        Self::Pseudo(PseudoEntityId {
            pseudo_type: pseudo_type.into(),
            serialization: serialization.into(),
        })
    }

    pub fn kind(&self) -> EntityIdKind {
        match self {
            Self::Standard(_) => EntityIdKind::Standard,
            Self::FederatedProperty(_) => EntityIdKind::FederatedProperty,
            Self::Pseudo(_) => EntityIdKind::Pseudo,
        }
    }

    pub fn serialization(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard(id) => fmt::Display::fmt(id, f),
            Self::FederatedProperty(id) => fmt::Display::fmt(id, f),
            Self::Pseudo(id) => fmt::Display::fmt(id, f),
        }
    }
}

// ── EntityIdParser ────────────────────────────────────────────

const STANDARD_ID_PATTERN: &str = r"^(?:([a-z0-9_-]+):)?([QP])([1-9]\d{0,9})$";
const FEDERATED_PROPERTY_PATTERN: &str = r"^(https?://\S+/)(P[1-9]\d{0,9})$";

/// Parses id serializations into `EntityId`s.
///
/// Pseudo-entity patterns are tried first, in registration order; the first
/// match decides the pseudo type. Federated concept URIs come next, then
/// standard ids.
pub struct EntityIdParser {
    standard: Regex,
    federated: Regex,
    pseudo_patterns: Vec<(Regex, String)>,
}

impl EntityIdParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            standard: compile(STANDARD_ID_PATTERN)?,
            federated: compile(FEDERATED_PROPERTY_PATTERN)?,
            pseudo_patterns: Vec::new(),
        })
    }

    /// Register a pseudo-entity id pattern, e.g. `^E[1-9]\d{0,9}$` for entity schemas.
    pub fn with_pseudo_type(mut self, pattern: &str, pseudo_type: impl Into<String>) -> Result<Self> {
        self.pseudo_patterns.push((compile(pattern)?, pseudo_type.into()));
        Ok(self)
    }

    pub fn parse(&self, serialization: &str) -> Result<EntityId> {
        for (pattern, pseudo_type) in &self.pseudo_patterns {
            if pattern.is_match(serialization) {
                return Ok(EntityId::pseudo(pseudo_type.as_str(), serialization));
            }
        }

        if let Some(caps) = self.federated.captures(serialization) {
            return Ok(EntityId::federated_property(&caps[1], &caps[2]));
        }

        let caps = self
            .standard
            .captures(serialization)
            .ok_or_else(|| TermStoreError::InvalidInput(format!("not an entity id: {serialization:?}")))?;

        let kind = caps[2]
            .chars()
            .next()
            .and_then(EntityKind::from_prefix)
            .ok_or_else(|| TermStoreError::InvalidInput(format!("unknown entity prefix in {serialization:?}")))?;
        let numeric_id: u32 = caps[3].parse().map_err(|_| {
            TermStoreError::InvalidInput(format!("numeric id out of range in {serialization:?}"))
        })?;

        Ok(EntityId::Standard(StandardEntityId {
            kind,
            numeric_id,
            repository: caps.get(1).map(|m| m.as_str().to_string()),
        }))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| TermStoreError::InvalidInput(format!("bad id pattern {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> EntityIdParser {
        EntityIdParser::new()
            .unwrap()
            .with_pseudo_type(r"^E[1-9]\d{0,9}$", "entity-schema")
            .unwrap()
    }

    #[test]
    fn parses_standard_ids() {
        let parser = parser();
        assert_eq!(parser.parse("Q42").unwrap(), EntityId::item(42));
        assert_eq!(parser.parse("P31").unwrap(), EntityId::property(31));
    }

    #[test]
    fn parses_foreign_ids_with_repository_prefix() {
        let id = parser().parse("wd:Q1").unwrap();
        match &id {
            EntityId::Standard(std_id) => {
                assert!(std_id.is_foreign());
                assert_eq!(std_id.repository.as_deref(), Some("wd"));
            }
            other => panic!("expected standard id, got {other:?}"),
        }
        assert_eq!(id.to_string(), "wd:Q1");
    }

    #[test]
    fn parses_federated_property_uris() {
        let id = parser().parse("https://www.wikidata.org/entity/P31").unwrap();
        assert_eq!(id.kind(), EntityIdKind::FederatedProperty);
        assert_eq!(
            id,
            EntityId::federated_property("https://www.wikidata.org/entity/", "P31")
        );
        assert_eq!(id.to_string(), "https://www.wikidata.org/entity/P31");
    }

    #[test]
    fn pseudo_patterns_take_precedence() {
        let id = parser().parse("E12").unwrap();
        assert_eq!(id, EntityId::pseudo("entity-schema", "E12"));
        assert_eq!(id.kind(), EntityIdKind::Pseudo);
    }

    #[test]
    fn rejects_malformed_ids() {
        let parser = parser();
        for bad in ["", "Q0", "Q", "X1", "q1", "Q99999999999", "E0"] {
            let err = parser.parse(bad).unwrap_err();
            assert!(matches!(err, TermStoreError::InvalidInput(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn rejects_numeric_overflow() {
        // 10 digits fits the pattern but not u32
        let err = parser().parse("Q9999999999").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
