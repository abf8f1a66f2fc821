use crate::{bounded, fetch_latest, lock, outcome_error, StoreError};
use shopflow_backend_http::CatalogBackend;
use shopflow_coordinator::{CoordinatorConfig, Outcome, RequestCoordinator};
use shopflow_model::ReviewSummary;
use std::collections::HashMap;
use std::sync::Mutex;

/// Reviews per SKU, refetched after every accepted submission.
pub struct ReviewPanel<B> {
    backend: B,
    coordinator: RequestCoordinator,
    summaries: Mutex<HashMap<String, ReviewSummary>>,
}

impl<B: CatalogBackend> ReviewPanel<B> {
    pub fn new(backend: B, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            coordinator: RequestCoordinator::new(config),
            summaries: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Last loaded summary for `sku`.
    pub fn summary(&self, sku: &str) -> Option<ReviewSummary> {
        lock(&self.summaries).get(sku).cloned()
    }

    /// Fetch reviews for `sku`.
    ///
    /// Resolves to `None` when a newer load of the same SKU was issued
    /// meanwhile; that load's result is the one cached.
    pub async fn load(&self, sku: &str) -> Result<Option<ReviewSummary>, StoreError> {
        let mut loaded = None;

        fetch_latest(
            &self.coordinator,
            &format!("reviews:{sku}"),
            &self.summaries,
            || self.backend.reviews(sku),
            |summaries, outcome| {
                loaded = match outcome {
                    Outcome::Ready(summary) => {
                        summaries.insert(sku.to_string(), summary.clone());
                        Some(Ok(summary))
                    }
                    other => outcome_error(&other).map(Err),
                };
            },
        )
        .await;

        loaded.transpose()
    }

    /// Post a review and return the refreshed summary.
    ///
    /// The rating is required and must be 1 to 5; an invalid submission
    /// never reaches the server. The summary is `None` when a newer load of
    /// the same SKU overtook the refetch.
    pub async fn submit(
        &self,
        sku: &str,
        rating: Option<u8>,
        comment: &str,
    ) -> Result<Option<ReviewSummary>, StoreError> {
        if sku.trim().is_empty() {
            return Err(StoreError::Validation("sku is required".into()));
        }
        let rating = rating.ok_or_else(|| StoreError::Validation("rating is required".into()))?;
        if !(1..=5).contains(&rating) {
            return Err(StoreError::Validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }

        bounded(
            self.coordinator.config().request_timeout,
            self.backend.submit_review(sku, rating, comment.trim()),
        )
        .await?;
        tracing::info!(sku, rating, "Review submitted");

        self.load(sku).await
    }
}
