use crate::{fetch_latest, lock, outcome_error, ListStatus, StoreError};
use serde::Serialize;
use shopflow_backend_http::{BackendError, CatalogBackend};
use shopflow_coordinator::{CoordinatorConfig, Outcome, RequestCoordinator};
use shopflow_mapper::sort_products;
use shopflow_model::{FilterCriteria, FilterEdit, Product};
use std::sync::Mutex;

const PRODUCTS_KEY: &str = "products";

/// The product list as currently rendered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductListView {
    pub status: ListStatus,
    pub products: Vec<Product>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Criteria `products` were fetched with
    pub filters: FilterCriteria,
}

/// Filter and sort criteria plus the product list they select.
///
/// Every edit schedules a refetch through the coordinator; edits that land
/// inside the debounce window collapse into one request carrying the final
/// criteria.
pub struct FilterStateStore<B> {
    backend: B,
    coordinator: RequestCoordinator,
    filters: Mutex<FilterCriteria>,
    view: Mutex<ProductListView>,
}

impl<B: CatalogBackend> FilterStateStore<B> {
    pub fn new(backend: B, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            coordinator: RequestCoordinator::new(config),
            filters: Mutex::new(FilterCriteria::default()),
            view: Mutex::new(ProductListView::default()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn current_filters(&self) -> FilterCriteria {
        lock(&self.filters).clone()
    }

    pub fn view(&self) -> ProductListView {
        lock(&self.view).clone()
    }

    /// Apply one edit and refetch.
    ///
    /// An edit that would leave the criteria inconsistent is rejected and
    /// the previous criteria are kept.
    pub async fn set_filter(&self, edit: FilterEdit) -> Result<(), StoreError> {
        {
            let mut filters = lock(&self.filters);
            let next = filters.apply(edit);
            next.validate()?;
            tracing::debug!(filters = ?next, "Filters edited");
            *filters = next;
        }
        self.refresh().await;
        Ok(())
    }

    /// Replace every criterion at once and refetch.
    pub async fn set_filters(&self, filters: FilterCriteria) -> Result<(), StoreError> {
        filters.validate()?;
        *lock(&self.filters) = filters;
        self.refresh().await;
        Ok(())
    }

    /// Back to the unfiltered catalog.
    pub async fn clear_filters(&self) -> Result<(), StoreError> {
        self.set_filter(FilterEdit::ClearAll).await
    }

    /// Refetch with whatever the criteria are once the debounce settles.
    ///
    /// Returns whether this call's response was the one rendered.
    pub async fn refresh(&self) -> bool {
        lock(&self.view).status = ListStatus::Loading;

        fetch_latest(
            &self.coordinator,
            PRODUCTS_KEY,
            &self.view,
            || {
                let filters = self.current_filters();
                async move {
                    let products = self.backend.list_products(&filters).await?;
                    Ok::<_, BackendError>((filters, products))
                }
            },
            |view, outcome| match outcome {
                Outcome::Ready((filters, mut products)) => {
                    sort_products(&mut products, filters.sort);
                    *view = ProductListView {
                        status: ListStatus::Ready,
                        products,
                        error: None,
                        filters,
                    };
                }
                other => {
                    if let Some(err) = outcome_error(&other) {
                        tracing::warn!(error = %err, "Product list fetch failed");
                        view.status = ListStatus::Error;
                        view.error = Some(err.to_string());
                    }
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog, FakeCatalog};
    use shopflow_model::SortKey;
    use std::time::Duration;
    use tokio::time::sleep;

    fn store(fake: FakeCatalog) -> FilterStateStore<FakeCatalog> {
        FilterStateStore::new(
            fake,
            CoordinatorConfig::default().with_debounce(Duration::from_millis(300)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_quick_edits_fetch_once_with_final_state() {
        let store = store(FakeCatalog::with_products(catalog()));
        let edit = |edit: FilterEdit, delay: u64| {
            let store = &store;
            async move {
                sleep(Duration::from_millis(delay)).await;
                store.set_filter(edit).await
            }
        };

        let (a, b, c) = tokio::join!(
            edit(FilterEdit::Category(Some("home".into())), 0),
            edit(FilterEdit::MaxPrice(Some(50.0)), 100),
            edit(FilterEdit::Sort(SortKey::Price), 200),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let calls = store.backend().list_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].category.as_deref(), Some("home"));
        assert_eq!(calls[0].max_price, Some(50.0));
        assert_eq!(calls[0].sort, SortKey::Price);

        let view = store.view();
        assert_eq!(view.status, ListStatus::Ready);
        let prices: Vec<_> = view.products.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![Some(12.0), Some(40.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_filters_fetches_whole_catalog() {
        let store = store(FakeCatalog::with_products(catalog()));
        store
            .set_filter(FilterEdit::Category(Some("garden".into())))
            .await
            .unwrap();
        assert_eq!(store.view().products.len(), 1);

        store.clear_filters().await.unwrap();
        let view = store.view();
        assert!(view.filters.is_unfiltered());
        assert_eq!(view.products.len(), catalog().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverted_range_rejected_without_fetch() {
        let store = store(FakeCatalog::with_products(catalog()));
        store
            .set_filter(FilterEdit::MaxPrice(Some(20.0)))
            .await
            .unwrap();

        let err = store
            .set_filter(FilterEdit::MinPrice(Some(30.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.current_filters().min_price, None);
        assert_eq!(store.backend().list_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_sets_error_state() {
        let fake = FakeCatalog::with_products(catalog());
        fake.fail_next_lists(true);
        let store = store(fake);

        assert!(store.refresh().await);
        let view = store.view();
        assert_eq!(view.status, ListStatus::Error);
        assert!(view.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_sort_is_stable_across_refetches() {
        let store = store(FakeCatalog::with_products(catalog()));
        store.refresh().await;
        let first: Vec<_> = store.view().products.into_iter().map(|p| p.id).collect();
        store.refresh().await;
        let second: Vec<_> = store.view().products.into_iter().map(|p| p.id).collect();
        assert_eq!(first, second);
    }
}
