//! Session state stores for storefront views.
//!
//! - `FilterStateStore`: filter/sort criteria and the product list they select
//! - `SearchBox`: as-you-type text search
//! - `CartWishlistStateStore`: optimistic cart and wishlist edits reconciled
//!   against the server
//! - `ReviewPanel`: reviews for one SKU
//!
//! All state lives in memory for the session only.

mod filters;
mod lists;
mod reviews;
mod search;
#[cfg(test)]
mod testing;

pub use filters::{FilterStateStore, ProductListView};
pub use lists::{CartWishlistStateStore, ListKind, ListsView};
pub use reviews::ReviewPanel;
pub use search::{SearchBox, SearchView};

use serde::Serialize;
use shopflow_backend_http::BackendError;
use shopflow_coordinator::{Outcome, RequestCoordinator};
use shopflow_model::ModelError;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Fetch status of a list-like view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStatus {
    /// Nothing requested yet
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn outcome_error<T>(outcome: &Outcome<T, BackendError>) -> Option<StoreError> {
    match outcome {
        Outcome::Failed(err) => Some(StoreError::Backend(err.clone())),
        Outcome::TimedOut(after) => Some(StoreError::TimedOut(*after)),
        _ => None,
    }
}

/// Await a one-off command under `timeout`.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    request: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::TimedOut(timeout)),
    }
}

/// Run the latest request for `key` and apply its outcome to `state`.
///
/// The outcome is applied under the state lock, and only if no newer request
/// for `key` was issued meanwhile. Returns whether it was applied.
pub(crate) async fn fetch_latest<S, T, F, Fut>(
    coordinator: &RequestCoordinator,
    key: &str,
    state: &Mutex<S>,
    factory: F,
    apply: impl FnOnce(&mut S, Outcome<T, BackendError>),
) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let ticket = coordinator.issue(key);
    if !coordinator.settle(&ticket).await {
        return false;
    }

    let outcome = coordinator.dispatch(&ticket, factory).await;
    if outcome.is_superseded() {
        return false;
    }

    let mut guard = lock(state);
    if !coordinator.is_current(&ticket) {
        return false;
    }
    apply(&mut guard, outcome);
    true
}
