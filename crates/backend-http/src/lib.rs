//! Commerce API backend.
//!
//! Provides the backend traits the orchestration layer is written against
//! and their reqwest implementation. Keeping the traits separate from the
//! HTTP client lets the stores and the aggregator run against in-memory
//! fakes in tests.

mod auth;

pub use auth::{AuthSession, NewAccount, TwoFactorSetup};

use serde_json::{json, Value};
use shopflow_mapper::{
    normalize_all, normalize_cart, normalize_history, normalize_reviews, MapError, Origin,
};
use shopflow_model::{
    CartItem, FilterCriteria, HistoryAction, HistoryEvent, NewProduct, Product, ProductId,
    RecommendationRequest, ReviewSummary, SearchQuery,
};
use shopflow_query::{
    ApiRequest, CatalogDialect, ProviderDialect, QueryDialect, QueryError, SearchDialect,
};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors from backend operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not authenticated: {0}")]
    Auth(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Backend not available")]
    Unavailable,
}

impl From<MapError> for BackendError {
    fn from(err: MapError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<QueryError> for BackendError {
    fn from(err: QueryError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Catalog, search and review endpoints.
pub trait CatalogBackend {
    /// Text search (`/search` or `/search/fulltext`, per the query mode).
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<Product>, BackendError>> + Send;

    /// Filtered product listing.
    fn list_products(
        &self,
        filters: &FilterCriteria,
    ) -> impl Future<Output = Result<Vec<Product>, BackendError>> + Send;

    fn create_product(
        &self,
        product: &NewProduct,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn reviews(&self, sku: &str)
        -> impl Future<Output = Result<ReviewSummary, BackendError>> + Send;

    fn submit_review(
        &self,
        sku: &str,
        rating: u8,
        comment: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Recommendation provider endpoints.
pub trait RecommendationBackend {
    fn recommend(
        &self,
        request: &RecommendationRequest,
    ) -> impl Future<Output = Result<Vec<Product>, BackendError>> + Send;
}

/// Cart, checkout and history (wishlist) endpoints.
pub trait ListBackend {
    fn cart(&self, user_id: &str)
        -> impl Future<Output = Result<Vec<CartItem>, BackendError>> + Send;

    fn add_to_cart(
        &self,
        user_id: &str,
        product: &ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn remove_from_cart(
        &self,
        user_id: &str,
        product: &ProductId,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Place an order for the whole cart.
    fn checkout(&self, user_id: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Browsing history, newest first.
    fn history(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<HistoryEvent>, BackendError>> + Send;

    fn record(
        &self,
        user_id: &str,
        action: HistoryAction,
        product: &ProductId,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Commerce API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the API
    pub base_url: String,
    /// Transport timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    pub const URL_VAR: &'static str = "SHOPFLOW_API_URL";
    pub const TIMEOUT_VAR: &'static str = "SHOPFLOW_TIMEOUT_SECS";

    /// Defaults overridden by `SHOPFLOW_API_URL` and `SHOPFLOW_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, BackendError> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(Self::URL_VAR) {
            config.base_url = url;
        }
        if let Ok(raw) = std::env::var(Self::TIMEOUT_VAR) {
            config.timeout_secs = raw.trim().parse().map_err(|_| {
                BackendError::Config(format!(
                    "{} must be a whole number, got `{raw}`",
                    Self::TIMEOUT_VAR
                ))
            })?;
        }
        Ok(config)
    }
}

/// Map a non-2xx response to an error. 401 and 403 are auth failures.
fn status_error(status: u16, body: String) -> BackendError {
    if matches!(status, 401 | 403) {
        let reason = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("HTTP {status}"));
        return BackendError::Auth(reason);
    }
    BackendError::Status { status, body }
}

/// Only an explicit `"status": "success"` confirms an order.
fn checkout_result(json: &Value) -> Result<(), BackendError> {
    match json.get("status").and_then(Value::as_str) {
        Some("success") => Ok(()),
        _ => Err(BackendError::Rejected(
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("checkout was not confirmed")
                .to_string(),
        )),
    }
}

/// reqwest implementation of every backend trait.
pub struct HttpBackend {
    base: reqwest::Url,
    client: reqwest::Client,
    session: AuthSession,
}

impl HttpBackend {
    /// Create a backend for `config`.
    pub fn new(config: ApiConfig) -> Result<Self, BackendError> {
        let base = reqwest::Url::parse(&config.base_url)
            .map_err(|e| BackendError::Config(format!("bad base url `{}`: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Config(format!(
                "base url `{}` cannot have paths",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self {
            base,
            client,
            session: AuthSession::default(),
        })
    }

    /// The bearer credential used by authenticated endpoints.
    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    fn url<S: AsRef<str>>(&self, segments: &[S]) -> Result<reqwest::Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Config("base url cannot have paths".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn read(&self, response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), body))
    }

    pub(crate) async fn get(&self, request: &ApiRequest) -> Result<Value, BackendError> {
        let url = self.url(&request.segments)?;
        tracing::debug!(request = %request, "GET");

        let mut builder = self.client.get(url).query(&request.params);
        if let Some(token) = self.session.bearer() {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        self.read(response).await
    }

    pub(crate) async fn post<S: AsRef<str>>(
        &self,
        segments: &[S],
        body: &Value,
        bearer: Option<&str>,
    ) -> Result<Value, BackendError> {
        let url = self.url(segments)?;
        tracing::debug!(path = %url.path(), "POST");

        let mut builder = self.client.post(url).json(body);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        self.read(response).await
    }

    /// Check the API answers at all.
    pub async fn health_check(&self) -> Result<(), BackendError> {
        match self.get(&ApiRequest::new(["recommend", "manual"])).await {
            Ok(_) => Ok(()),
            Err(BackendError::Connection(_)) | Err(BackendError::Timeout) => {
                Err(BackendError::Unavailable)
            }
            Err(err) => Err(err),
        }
    }

    pub fn name(&self) -> &'static str {
        "http"
    }
}

impl CatalogBackend for HttpBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, BackendError> {
        let request = SearchDialect::default().translate(query)?;
        let json = self.get(&request).await?;
        Ok(normalize_all(&json, Origin::Search(query.mode))?)
    }

    async fn list_products(&self, filters: &FilterCriteria) -> Result<Vec<Product>, BackendError> {
        let request = CatalogDialect.translate(filters)?;
        let json = self.get(&request).await?;
        Ok(normalize_all(&json, Origin::Catalog)?)
    }

    async fn create_product(&self, product: &NewProduct) -> Result<(), BackendError> {
        product
            .validate()
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        let body = serde_json::to_value(product).map_err(|e| BackendError::Parse(e.to_string()))?;
        self.post(&["products"], &body, None).await?;
        Ok(())
    }

    async fn reviews(&self, sku: &str) -> Result<ReviewSummary, BackendError> {
        let json = self.get(&ApiRequest::new(["products", sku, "reviews"])).await?;
        Ok(normalize_reviews(&json)?)
    }

    async fn submit_review(
        &self,
        sku: &str,
        rating: u8,
        comment: &str,
    ) -> Result<(), BackendError> {
        let body = json!({ "rating": rating, "comment": comment });
        self.post(&["products", sku, "reviews"], &body, None).await?;
        Ok(())
    }
}

impl RecommendationBackend for HttpBackend {
    async fn recommend(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<Product>, BackendError> {
        let api = ProviderDialect.translate(request)?;
        let json = self.get(&api).await?;
        Ok(normalize_all(&json, Origin::Provider(request.kind()))?)
    }
}

impl ListBackend for HttpBackend {
    async fn cart(&self, user_id: &str) -> Result<Vec<CartItem>, BackendError> {
        let json = self.get(&ApiRequest::new(["cart", user_id])).await?;
        Ok(normalize_cart(&json)?)
    }

    async fn add_to_cart(
        &self,
        user_id: &str,
        product: &ProductId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        let body = json!({
            "user_id": user_id,
            "product_id": product.as_str(),
            "quantity": quantity,
        });
        self.post(&["cart", "add"], &body, None).await?;
        Ok(())
    }

    async fn remove_from_cart(
        &self,
        user_id: &str,
        product: &ProductId,
    ) -> Result<(), BackendError> {
        let body = json!({ "user_id": user_id, "product_id": product.as_str() });
        self.post(&["cart", "remove"], &body, None).await?;
        Ok(())
    }

    async fn checkout(&self, user_id: &str) -> Result<(), BackendError> {
        let json = self
            .post(&["checkout"], &json!({ "user_id": user_id }), None)
            .await?;
        checkout_result(&json)
    }

    async fn history(&self, user_id: &str) -> Result<Vec<HistoryEvent>, BackendError> {
        let json = self.get(&ApiRequest::new(["history", user_id])).await?;
        Ok(normalize_history(&json)?)
    }

    async fn record(
        &self,
        user_id: &str,
        action: HistoryAction,
        product: &ProductId,
    ) -> Result<(), BackendError> {
        let segments: Vec<&str> = action.endpoint().split('/').collect();
        let body = json!({ "user_id": user_id, "product_id": product.as_str() });
        self.post(&segments, &body, None).await?;
        Ok(())
    }
}
