use std::{collections::HashSet, sync::Arc};

use crate::traits::{CatalogError, CatalogLookup};

/// A fixed in-memory card catalog.
#[derive(Clone, Default)]
pub struct StaticCatalog {
    cards: Arc<HashSet<String>>,
    allow_all: bool,
}

impl StaticCatalog {
    pub fn with_cards(cards: &[&str]) -> Self {
        let cards = cards.iter().map(|c| c.to_string()).collect();
        Self { cards: Arc::new(cards), allow_all: false }
    }

    pub fn allow_all() -> Self {
        Self { cards: Arc::new(HashSet::new()), allow_all: true }
    }
}

impl CatalogLookup for StaticCatalog {
    async fn card_exists(&self, card_id: &str) -> Result<bool, CatalogError> {
        Ok(self.allow_all || self.cards.contains(card_id))
    }
}
