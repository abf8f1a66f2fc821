//! Payload normalization for storefront views.
//!
//! Provides pure functions that turn heterogeneous backend JSON into the
//! canonical model:
//! - Product records from every provider (`normalize`, `normalize_all`)
//! - Cart rows, history events and review summaries
//! - Defensive numeric parsing
//! - Client-side ordering of fetched pages

use serde_json::Value;
use shopflow_model::{
    CartItem, HistoryAction, HistoryEvent, Product, ProductId, ProviderKind, Ranking,
    RankingField, Review, ReviewSummary, SearchMode, SortKey, WishlistItem,
};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("expected a JSON {expected}, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("record has no id, product_id or sku")]
    MissingId,
}

/// Where a payload came from; decides which ranking field is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Provider(ProviderKind),
    Search(SearchMode),
    /// Plain catalog listing (`/products`)
    Catalog,
}

impl Origin {
    pub fn ranking_field(&self) -> Option<RankingField> {
        match self {
            Self::Provider(kind) => kind.ranking_field(),
            Self::Search(SearchMode::Fulltext) => Some(RankingField::Score),
            Self::Search(SearchMode::Catalog) | Self::Catalog => None,
        }
    }
}

/// Parse a JSON value as a finite number.
///
/// Accepts numbers and numeric strings. Anything else, including NaN,
/// infinities, booleans and empty strings, is unavailable.
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse a price: a finite, non-negative number.
pub fn parse_price(value: &Value) -> Option<f64> {
    parse_number(value).filter(|p| *p >= 0.0)
}

fn text(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object(value: &Value) -> Result<&serde_json::Map<String, Value>, MapError> {
    value.as_object().ok_or(MapError::UnexpectedShape {
        expected: "object",
        found: kind_of(value),
    })
}

fn as_array(value: &Value) -> Result<&Vec<Value>, MapError> {
    value.as_array().ok_or(MapError::UnexpectedShape {
        expected: "array",
        found: kind_of(value),
    })
}

fn product_id(obj: &serde_json::Map<String, Value>) -> Option<ProductId> {
    text(obj, "id")
        .or_else(|| text(obj, "product_id"))
        .map(ProductId::Id)
        .or_else(|| text(obj, "sku").map(ProductId::Sku))
}

/// Normalize one raw product payload.
pub fn normalize(raw: &Value, origin: Origin) -> Result<Product, MapError> {
    let obj = as_object(raw)?;
    let id = product_id(obj).ok_or(MapError::MissingId)?;

    let ranking = match origin.ranking_field() {
        Some(RankingField::Score) => obj
            .get("score")
            .and_then(parse_number)
            .map_or(Ranking::Unranked, Ranking::Scored),
        Some(RankingField::Weight) => obj
            .get("weight")
            .and_then(parse_number)
            .map_or(Ranking::Unranked, Ranking::Boosted),
        None => Ranking::Unranked,
    };

    let rating = obj
        .get("rating")
        .or_else(|| obj.get("average_rating"))
        .and_then(parse_number);

    Ok(Product {
        sku: match &id {
            ProductId::Sku(_) => None,
            ProductId::Id(_) => text(obj, "sku"),
        },
        id,
        name: text(obj, "name").unwrap_or_default(),
        category: text(obj, "category").unwrap_or_default(),
        brand: text(obj, "brand"),
        price: obj.get("price").and_then(parse_price),
        description: text(obj, "description"),
        rating,
        ranking,
    })
}

/// Normalize an array payload, dropping records without an identity.
pub fn normalize_all(raw: &Value, origin: Origin) -> Result<Vec<Product>, MapError> {
    let items = as_array(raw)?;
    let mut products = Vec::with_capacity(items.len());

    for item in items {
        match normalize(item, origin) {
            Ok(product) => products.push(product),
            Err(err) => tracing::warn!(?origin, error = %err, "Dropping unmappable record"),
        }
    }

    Ok(products)
}

/// Normalize `GET /cart/{user}` rows.
///
/// A row whose quantity is missing or malformed is still a cart member;
/// it is kept with quantity 1.
pub fn normalize_cart(raw: &Value) -> Result<Vec<CartItem>, MapError> {
    let rows = as_array(raw)?;
    let mut items: Vec<CartItem> = Vec::with_capacity(rows.len());

    for row in rows {
        let obj = as_object(row)?;
        let Some(product) = product_id(obj) else {
            tracing::warn!("Dropping cart row without product id");
            continue;
        };

        let quantity = obj
            .get("quantity")
            .and_then(parse_number)
            .filter(|q| *q >= 1.0 && q.fract() == 0.0 && *q <= f64::from(u32::MAX))
            .map(|q| q as u32)
            .unwrap_or_else(|| {
                tracing::warn!(product = %product, "Malformed cart quantity, assuming 1");
                1
            });

        let item = CartItem {
            product,
            quantity,
            name: text(obj, "name"),
            price: obj.get("price").and_then(parse_price),
        };

        // One line per product.
        match items.iter_mut().find(|existing| existing.product == item.product) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => items.push(item),
        }
    }

    Ok(items)
}

/// Normalize `GET /history/{user}` rows, skipping unknown actions.
pub fn normalize_history(raw: &Value) -> Result<Vec<HistoryEvent>, MapError> {
    let rows = as_array(raw)?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let obj = row.as_object()?;
            let action = obj
                .get("action")
                .and_then(Value::as_str)
                .and_then(HistoryAction::parse)?;
            let product = product_id(obj)?;
            Some(HistoryEvent {
                action,
                product,
                timestamp: text(obj, "time").or_else(|| text(obj, "timestamp")),
            })
        })
        .collect())
}

/// Derive wishlist membership from history listed newest first.
pub fn replay_wishlist(events: &[HistoryEvent]) -> Vec<WishlistItem> {
    let mut wishlist: Vec<WishlistItem> = Vec::new();

    for event in events.iter().rev() {
        match event.action {
            HistoryAction::WishlistAdd => {
                if !wishlist.iter().any(|w| w.product == event.product) {
                    wishlist.push(WishlistItem {
                        product: event.product.clone(),
                    });
                }
            }
            HistoryAction::WishlistRemove => wishlist.retain(|w| w.product != event.product),
            _ => {}
        }
    }

    wishlist
}

/// Normalize `GET /products/{sku}/reviews`.
///
/// With no reviews the average is absent rather than 0. When the server
/// average is unusable it is recomputed from the reviews themselves.
pub fn normalize_reviews(raw: &Value) -> Result<ReviewSummary, MapError> {
    let obj = as_object(raw)?;
    let reviews: Vec<Review> = match obj.get("reviews") {
        Some(list) => as_array(list)?
            .iter()
            .filter_map(|r| {
                let r = r.as_object()?;
                let rating = r
                    .get("rating")
                    .and_then(parse_number)
                    .filter(|v| (1.0..=5.0).contains(v))?;
                Some(Review {
                    rating: rating.round() as u8,
                    comment: text(r, "comment").unwrap_or_default(),
                    date: text(r, "date"),
                })
            })
            .collect(),
        None => Vec::new(),
    };

    let average_rating = if reviews.is_empty() {
        None
    } else {
        obj.get("average_rating")
            .and_then(parse_number)
            .filter(|avg| *avg > 0.0)
            .or_else(|| {
                let total: f64 = reviews.iter().map(|r| f64::from(r.rating)).sum();
                Some(total / reviews.len() as f64)
            })
    };

    Ok(ReviewSummary {
        reviews,
        average_rating,
    })
}

/// Compare two optional values so that present values sort before absent ones.
fn present_first(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.total_cmp(&a),
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order a fetched page client-side.
///
/// The sort is stable and idempotent, so applying it to a page the server
/// already ordered the same way leaves it unchanged.
pub fn sort_products(products: &mut [Product], key: SortKey) {
    match key {
        SortKey::Name => {
            products.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        }
        SortKey::Price => products.sort_by(|a, b| present_first(a.price, b.price, false)),
        SortKey::Rating => products.sort_by(|a, b| present_first(a.rating, b.rating, true)),
        SortKey::Score => {
            products.sort_by(|a, b| present_first(a.ranking.score(), b.ranking.score(), true))
        }
    }
}
