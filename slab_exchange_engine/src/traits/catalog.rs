use thiserror::Error;

/// Read-only access to the card catalog. Orders are only admitted for cards the catalog knows about;
/// catalog ingestion itself lives outside the engine.
#[allow(async_fn_in_trait)]
pub trait CatalogLookup: Clone + Send + Sync {
    async fn card_exists(&self, card_id: &str) -> Result<bool, CatalogError>;
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("The card catalog is unavailable: {0}")]
    Unavailable(String),
}
