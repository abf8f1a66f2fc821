//! In-memory backends for store tests.

use shopflow_backend_http::{BackendError, CatalogBackend, ListBackend};
use shopflow_model::{
    CartItem, FilterCriteria, HistoryAction, HistoryEvent, NewProduct, Product, ProductId, Review,
    ReviewSummary, SearchQuery,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

fn product(id: &str, name: &str, category: &str, brand: &str, price: f64) -> Product {
    Product {
        category: category.to_string(),
        brand: Some(brand.to_string()),
        ..Product::new(ProductId::id(id), name).with_price(price)
    }
}

pub(crate) fn catalog() -> Vec<Product> {
    vec![
        product("p1", "Desk Lamp", "home", "acme", 40.0),
        product("p2", "Floor Lamp", "home", "lumen", 80.0),
        product("p3", "Candle", "home", "acme", 12.0),
        product("p4", "Garden Hose", "garden", "green", 25.0),
    ]
}

fn matches(product: &Product, filters: &FilterCriteria) -> bool {
    filters.category.as_ref().map_or(true, |c| &product.category == c)
        && filters
            .brand
            .as_ref()
            .map_or(true, |b| product.brand.as_ref() == Some(b))
        && filters
            .min_price
            .map_or(true, |min| product.price.is_some_and(|p| p >= min))
        && filters
            .max_price
            .map_or(true, |max| product.price.is_some_and(|p| p <= max))
}

/// Catalog and review endpoints over a fixed product list.
#[derive(Default)]
pub(crate) struct FakeCatalog {
    products: Vec<Product>,
    latency: Duration,
    list_calls: Mutex<Vec<FilterCriteria>>,
    search_calls: Mutex<Vec<String>>,
    reviews: Mutex<HashMap<String, Vec<Review>>>,
    review_posts: AtomicUsize,
    fail_lists: AtomicBool,
    fail_posts: AtomicBool,
}

impl FakeCatalog {
    pub(crate) fn with_products(products: Vec<Product>) -> Self {
        Self {
            products,
            latency: Duration::from_millis(20),
            ..Default::default()
        }
    }

    pub(crate) fn with_review(self, sku: &str, rating: u8, comment: &str) -> Self {
        self.reviews
            .lock()
            .unwrap()
            .entry(sku.to_string())
            .or_default()
            .push(Review {
                rating,
                comment: comment.to_string(),
                date: None,
            });
        self
    }

    pub(crate) fn fail_next_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn list_calls(&self) -> Vec<FilterCriteria> {
        self.list_calls.lock().unwrap().clone()
    }

    pub(crate) fn search_calls(&self) -> Vec<String> {
        self.search_calls.lock().unwrap().clone()
    }

    pub(crate) fn review_posts(&self) -> usize {
        self.review_posts.load(Ordering::SeqCst)
    }
}

impl CatalogBackend for FakeCatalog {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Product>, BackendError> {
        self.search_calls.lock().unwrap().push(query.text.clone());
        sleep(self.latency).await;
        let needle = query.text.trim().to_lowercase();
        Ok(self
            .products
            .iter()
            .rev()
            .filter(|p| p.name.to_lowercase().contains(&needle) && matches(p, &query.filters))
            .cloned()
            .collect())
    }

    async fn list_products(&self, filters: &FilterCriteria) -> Result<Vec<Product>, BackendError> {
        self.list_calls.lock().unwrap().push(filters.clone());
        sleep(self.latency).await;
        if self.fail_lists.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Connection("connection refused".into()));
        }
        Ok(self
            .products
            .iter()
            .rev()
            .filter(|p| matches(p, filters))
            .cloned()
            .collect())
    }

    async fn create_product(&self, _product: &NewProduct) -> Result<(), BackendError> {
        Ok(())
    }

    async fn reviews(&self, sku: &str) -> Result<ReviewSummary, BackendError> {
        sleep(self.latency).await;
        let reviews = self
            .reviews
            .lock()
            .unwrap()
            .get(sku)
            .cloned()
            .unwrap_or_default();
        let average_rating = (!reviews.is_empty()).then(|| {
            reviews.iter().map(|r| f64::from(r.rating)).sum::<f64>() / reviews.len() as f64
        });
        Ok(ReviewSummary {
            reviews,
            average_rating,
        })
    }

    async fn submit_review(
        &self,
        sku: &str,
        rating: u8,
        comment: &str,
    ) -> Result<(), BackendError> {
        self.review_posts.fetch_add(1, Ordering::SeqCst);
        sleep(self.latency).await;
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                body: "Failed to add review".into(),
            });
        }
        self.reviews
            .lock()
            .unwrap()
            .entry(sku.to_string())
            .or_default()
            .push(Review {
                rating,
                comment: comment.to_string(),
                date: None,
            });
        Ok(())
    }
}

/// Server-side cart and history for a single user.
#[derive(Default)]
pub(crate) struct FakeLists {
    latency: Duration,
    cart: Mutex<Vec<CartItem>>,
    history: Mutex<Vec<HistoryEvent>>,
    calls: AtomicUsize,
    fail_adds: AtomicBool,
    fail_checkout: AtomicBool,
}

impl FakeLists {
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub(crate) fn with_line(self, id: &str, quantity: u32) -> Self {
        self.cart
            .lock()
            .unwrap()
            .push(CartItem::new(ProductId::id(id), quantity).unwrap());
        self
    }

    pub(crate) fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn server_cart(&self) -> Vec<CartItem> {
        self.cart.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.latency).await;
    }
}

impl ListBackend for FakeLists {
    async fn cart(&self, _user_id: &str) -> Result<Vec<CartItem>, BackendError> {
        self.round_trip().await;
        Ok(self.server_cart())
    }

    async fn add_to_cart(
        &self,
        _user_id: &str,
        product: &ProductId,
        quantity: u32,
    ) -> Result<(), BackendError> {
        self.round_trip().await;
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                body: "Failed to add to cart".into(),
            });
        }
        let mut cart = self.cart.lock().unwrap();
        match cart.iter_mut().find(|line| &line.product == product) {
            Some(line) => line.quantity += quantity,
            None => cart.push(CartItem::new(product.clone(), quantity).unwrap()),
        }
        Ok(())
    }

    async fn remove_from_cart(
        &self,
        _user_id: &str,
        product: &ProductId,
    ) -> Result<(), BackendError> {
        self.round_trip().await;
        self.cart
            .lock()
            .unwrap()
            .retain(|line| &line.product != product);
        Ok(())
    }

    async fn checkout(&self, _user_id: &str) -> Result<(), BackendError> {
        self.round_trip().await;
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("payment declined".into()));
        }
        self.cart.lock().unwrap().clear();
        Ok(())
    }

    async fn history(&self, _user_id: &str) -> Result<Vec<HistoryEvent>, BackendError> {
        self.round_trip().await;
        Ok(self.history.lock().unwrap().clone())
    }

    async fn record(
        &self,
        _user_id: &str,
        action: HistoryAction,
        product: &ProductId,
    ) -> Result<(), BackendError> {
        self.round_trip().await;
        self.history.lock().unwrap().insert(
            0,
            HistoryEvent {
                action,
                product: product.clone(),
                timestamp: None,
            },
        );
        Ok(())
    }
}
