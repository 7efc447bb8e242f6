//! Routes each entity id to the fallback lookup for its kind.

use async_trait::async_trait;
use std::sync::Arc;

use crate::entity_id::EntityId;
use crate::fallback::FallbackLabelDescriptionLookup;
use crate::ports::Result;
use crate::term::TermFallback;

/// Standard ids go to the (usually cached) database lookup. Federated
/// properties have no local revision to key a cache on and go to their own
/// lookup. Pseudo-entities go to the per-type registry.
pub struct DispatchingFallbackLabelDescriptionLookup {
    standard: Arc<dyn FallbackLabelDescriptionLookup>,
    federated_properties: Arc<dyn FallbackLabelDescriptionLookup>,
    pseudo_entities: Arc<dyn FallbackLabelDescriptionLookup>,
}

impl DispatchingFallbackLabelDescriptionLookup {
    pub fn new(
        standard: Arc<dyn FallbackLabelDescriptionLookup>,
        federated_properties: Arc<dyn FallbackLabelDescriptionLookup>,
        pseudo_entities: Arc<dyn FallbackLabelDescriptionLookup>,
    ) -> Self {
        Self {
            standard,
            federated_properties,
            pseudo_entities,
        }
    }

    pub fn get_lookup(&self, entity_id: &EntityId) -> &dyn FallbackLabelDescriptionLookup {
        match entity_id {
            EntityId::Standard(_) => self.standard.as_ref(),
            EntityId::FederatedProperty(_) => self.federated_properties.as_ref(),
            EntityId::Pseudo(_) => self.pseudo_entities.as_ref(),
        }
    }
}

#[async_trait]
impl FallbackLabelDescriptionLookup for DispatchingFallbackLabelDescriptionLookup {
    async fn get_label(&self, entity_id: &EntityId) -> Result<Option<TermFallback>> {
        self.get_lookup(entity_id).get_label(entity_id).await
    }

    async fn get_description(&self, entity_id: &EntityId) -> Result<Option<TermFallback>> {
        self.get_lookup(entity_id).get_description(entity_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every request with its own name as the label.
    struct Named(&'static str);

    #[async_trait]
    impl FallbackLabelDescriptionLookup for Named {
        async fn get_label(&self, _entity_id: &EntityId) -> Result<Option<TermFallback>> {
            Ok(Some(TermFallback::new("en", self.0, "en", None)))
        }

        async fn get_description(&self, _entity_id: &EntityId) -> Result<Option<TermFallback>> {
            Ok(None)
        }
    }

    fn facade() -> DispatchingFallbackLabelDescriptionLookup {
        DispatchingFallbackLabelDescriptionLookup::new(
            Arc::new(Named("standard")),
            Arc::new(Named("federated")),
            Arc::new(Named("pseudo")),
        )
    }

    async fn routed_to(entity_id: EntityId) -> String {
        facade().get_label(&entity_id).await.unwrap().unwrap().text
    }

    #[tokio::test]
    async fn routes_by_id_kind() {
        assert_eq!(routed_to(EntityId::item(1)).await, "standard");
        assert_eq!(routed_to(EntityId::property(1)).await, "standard");
        assert_eq!(
            routed_to(EntityId::federated_property("https://wikidata.org/entity/", "P31")).await,
            "federated"
        );
        assert_eq!(routed_to(EntityId::pseudo("entity-schema", "E1")).await, "pseudo");
    }

    #[tokio::test]
    async fn descriptions_are_routed_too() {
        assert_eq!(facade().get_description(&EntityId::item(1)).await.unwrap(), None);
    }
}
