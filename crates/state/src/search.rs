use crate::{fetch_latest, lock, outcome_error, ListStatus, StoreError};
use serde::Serialize;
use shopflow_backend_http::CatalogBackend;
use shopflow_coordinator::{CoordinatorConfig, Outcome, RequestCoordinator};
use shopflow_mapper::sort_products;
use shopflow_model::{Product, SearchQuery};
use std::sync::Mutex;

const SEARCH_KEY: &str = "search";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchView {
    pub query: SearchQuery,
    pub status: ListStatus,
    pub results: Vec<Product>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// As-you-type product search.
pub struct SearchBox<B> {
    backend: B,
    coordinator: RequestCoordinator,
    view: Mutex<SearchView>,
}

impl<B: CatalogBackend> SearchBox<B> {
    pub fn new(backend: B, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            coordinator: RequestCoordinator::new(config),
            view: Mutex::new(SearchView::default()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn view(&self) -> SearchView {
        lock(&self.view).clone()
    }

    /// Feed the current input. Resolves once this input settles or is
    /// replaced by a newer one, and returns the rendered view.
    pub async fn input(&self, query: SearchQuery) -> SearchView {
        if let Err(err) = query.filters.validate() {
            self.coordinator.invalidate(SEARCH_KEY);
            let mut view = lock(&self.view);
            view.status = ListStatus::Error;
            view.error = Some(StoreError::from(err).to_string());
            return view.clone();
        }

        if !query.is_actionable(self.coordinator.config().min_query_len) {
            self.coordinator.invalidate(SEARCH_KEY);
            *lock(&self.view) = SearchView {
                query,
                ..Default::default()
            };
            return self.view();
        }

        {
            let mut view = lock(&self.view);
            view.query = query.clone();
            view.status = ListStatus::Loading;
        }

        fetch_latest(
            &self.coordinator,
            SEARCH_KEY,
            &self.view,
            || self.backend.search(&query),
            |view, outcome| match outcome {
                Outcome::Ready(mut results) => {
                    sort_products(&mut results, query.filters.sort);
                    *view = SearchView {
                        query: query.clone(),
                        status: ListStatus::Ready,
                        results,
                        error: None,
                    };
                }
                other => {
                    if let Some(err) = outcome_error(&other) {
                        tracing::warn!(error = %err, "Search failed");
                        view.status = ListStatus::Error;
                        view.error = Some(err.to_string());
                    }
                }
            },
        )
        .await;

        self.view()
    }
}
