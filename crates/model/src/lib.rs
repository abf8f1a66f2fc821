//! Core domain model for the shopflow storefront client.
//!
//! This crate defines the types shared by every layer of the client:
//! - `Product`: The canonical product record every provider is mapped into
//! - `Ranking`: Provider-specific ranking signal (score vs. manual weight)
//! - `FilterCriteria` / `SearchQuery`: What the user asked the catalog for
//! - `RecommendationRequest`: Declarative descriptor for one provider section
//! - `CartItem`, `WishlistItem`, `HistoryEvent`, `Review`: User list state

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minimum number of characters before a text query reaches the network.
pub const MIN_QUERY_LEN: usize = 2;

/// Validation failures raised before any request is issued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("min price {min} is greater than max price {max}")]
    InvertedPriceRange { min: f64, max: f64 },

    #[error("price must be a finite, non-negative number: {0}")]
    InvalidPrice(f64),

    #[error("quantity must be at least 1")]
    ZeroQuantity,

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Identity of a product as reported by its provider.
///
/// Recommendation and cart endpoints key products by `id`, the catalog and
/// review endpoints by `sku`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProductId {
    Id(String),
    Sku(String),
}

impl ProductId {
    pub fn id(value: impl Into<String>) -> Self {
        Self::Id(value.into())
    }

    pub fn sku(value: impl Into<String>) -> Self {
        Self::Sku(value.into())
    }

    /// The raw identifier, regardless of which key it came from.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Id(value) | Self::Sku(value) => value,
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ranking signal attached to a product by the provider that returned it.
///
/// A product carries at most one of these, decided by its origin, so a
/// score from one provider never shows up next to a weight from another.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Ranking {
    /// The provider does not rank its results
    #[default]
    Unranked,
    /// Relevance or similarity score computed by the remote API
    Scored(f64),
    /// Manual boost weight set by an administrator
    Boosted(f64),
}

impl Ranking {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Scored(score) => Some(*score),
            _ => None,
        }
    }

    pub fn weight(&self) -> Option<f64> {
        match self {
            Self::Boosted(weight) => Some(*weight),
            _ => None,
        }
    }
}

/// Which payload field, if any, carries a provider's ranking signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingField {
    Score,
    Weight,
}

/// A normalized product record.
///
/// Immutable once fetched. Optional fields stay `None` when the provider
/// omitted them or sent something unparseable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Provider identity (`id`, `product_id` or `sku`)
    pub id: ProductId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Catalog category
    #[serde(default)]
    pub category: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    /// Unit price; `None` when the payload had no usable number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Catalog SKU when the provider sent both an id and a sku
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Average review rating, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,

    #[serde(default)]
    pub ranking: Ranking,
}

impl Product {
    /// Create a minimal record for testing.
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: String::new(),
            brand: None,
            price: None,
            description: None,
            sku: None,
            rating: None,
            ranking: Ranking::Unranked,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_ranking(mut self, ranking: Ranking) -> Self {
        self.ranking = ranking;
        self
    }
}

/// Sort order requested for a product list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Name,
    Price,
    Rating,
    Score,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::Rating => "rating",
            Self::Score => "score",
        }
    }
}

impl From<&str> for SortKey {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "price" => Self::Price,
            "rating" => Self::Rating,
            "score" => Self::Score,
            _ => Self::Name,
        }
    }
}

/// Composable filter and sort criteria for product lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,

    #[serde(default)]
    pub sort: SortKey,
}

/// A single field edit applied to `FilterCriteria`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEdit {
    Category(Option<String>),
    Brand(Option<String>),
    MinPrice(Option<f64>),
    MaxPrice(Option<f64>),
    Sort(SortKey),
    /// Reset every criterion back to the unfiltered catalog
    ClearAll,
}

impl FilterCriteria {
    /// Return a copy of these criteria with `edit` applied.
    ///
    /// Blank text values clear the field.
    pub fn apply(&self, edit: FilterEdit) -> Self {
        let mut next = self.clone();
        match edit {
            FilterEdit::Category(value) => next.category = non_blank(value),
            FilterEdit::Brand(value) => next.brand = non_blank(value),
            FilterEdit::MinPrice(value) => next.min_price = value,
            FilterEdit::MaxPrice(value) => next.max_price = value,
            FilterEdit::Sort(key) => next.sort = key,
            FilterEdit::ClearAll => next = Self::default(),
        }
        next
    }

    /// Check the criteria are internally consistent.
    pub fn validate(&self) -> Result<(), ModelError> {
        for price in [self.min_price, self.max_price].into_iter().flatten() {
            if !price.is_finite() || price < 0.0 {
                return Err(ModelError::InvalidPrice(price));
            }
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(ModelError::InvertedPriceRange { min, max });
            }
        }
        Ok(())
    }

    /// True when no criterion narrows the result set.
    pub fn is_unfiltered(&self) -> bool {
        self.category.is_none()
            && self.brand.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Which search endpoint a text query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Attribute search over name, category and brand
    #[default]
    Catalog,
    /// Full-text index search; results carry a relevance score
    Fulltext,
}

/// A text query plus the filters it is narrowed by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,

    #[serde(default)]
    pub filters: FilterCriteria,

    #[serde(default)]
    pub mode: SearchMode,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: FilterCriteria) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the trimmed text is long enough to be sent.
    pub fn is_actionable(&self, min_len: usize) -> bool {
        self.text.trim().chars().count() >= min_len
    }
}

/// Recommendation provider kinds, one rendered section each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    CfUser,
    CfItem,
    HistorySimple,
    HistoryAdvanced,
    ItemSimilar,
    Seasonal,
    Manual,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        Self::CfUser,
        Self::CfItem,
        Self::HistorySimple,
        Self::HistoryAdvanced,
        Self::ItemSimilar,
        Self::Seasonal,
        Self::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CfUser => "cf_user",
            Self::CfItem => "cf_item",
            Self::HistorySimple => "history_simple",
            Self::HistoryAdvanced => "history_advanced",
            Self::ItemSimilar => "item_similar",
            Self::Seasonal => "seasonal",
            Self::Manual => "manual",
        }
    }

    /// Human-readable section title.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CfUser => "Users Like You",
            Self::CfItem => "Similar Shoppers' Picks",
            Self::HistorySimple => "Based On Your History",
            Self::HistoryAdvanced => "Advanced Recommendations",
            Self::ItemSimilar => "Similar Items",
            Self::Seasonal => "Seasonal / Promo",
            Self::Manual => "Admin Boosted",
        }
    }

    /// The payload field this provider ranks its results with.
    pub fn ranking_field(&self) -> Option<RankingField> {
        match self {
            Self::CfUser | Self::CfItem | Self::HistorySimple | Self::HistoryAdvanced => {
                Some(RankingField::Score)
            }
            Self::Manual => Some(RankingField::Weight),
            Self::ItemSimilar | Self::Seasonal => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::Validation(format!("unknown provider kind `{s}`")))
    }
}

/// Declarative descriptor for one recommendation provider call.
///
/// Each variant carries exactly the parameters its endpoint takes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecommendationRequest {
    CfUser {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    CfItem {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    HistorySimple {
        user_id: String,
    },
    HistoryAdvanced {
        user_id: String,
    },
    ItemSimilar {
        product_id: String,
    },
    Seasonal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        season: Option<String>,
    },
    Manual,
}

impl RecommendationRequest {
    /// Build the descriptor for `kind` around a subject.
    ///
    /// The subject is a user id for CF and history providers, a product id
    /// for `item_similar` and a season name for `seasonal`. `manual` ignores it.
    pub fn for_kind(kind: ProviderKind, subject: impl Into<String>, limit: Option<u32>) -> Self {
        let subject = subject.into();
        match kind {
            ProviderKind::CfUser => Self::CfUser {
                user_id: subject,
                limit,
            },
            ProviderKind::CfItem => Self::CfItem {
                user_id: subject,
                limit,
            },
            ProviderKind::HistorySimple => Self::HistorySimple { user_id: subject },
            ProviderKind::HistoryAdvanced => Self::HistoryAdvanced { user_id: subject },
            ProviderKind::ItemSimilar => Self::ItemSimilar {
                product_id: subject,
            },
            ProviderKind::Seasonal => Self::Seasonal {
                season: Some(subject).filter(|s| !s.trim().is_empty()),
            },
            ProviderKind::Manual => Self::Manual,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::CfUser { .. } => ProviderKind::CfUser,
            Self::CfItem { .. } => ProviderKind::CfItem,
            Self::HistorySimple { .. } => ProviderKind::HistorySimple,
            Self::HistoryAdvanced { .. } => ProviderKind::HistoryAdvanced,
            Self::ItemSimilar { .. } => ProviderKind::ItemSimilar,
            Self::Seasonal { .. } => ProviderKind::Seasonal,
            Self::Manual => ProviderKind::Manual,
        }
    }

    /// The user or product this request is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::CfUser { user_id, .. }
            | Self::CfItem { user_id, .. }
            | Self::HistorySimple { user_id }
            | Self::HistoryAdvanced { user_id } => Some(user_id),
            Self::ItemSimilar { product_id } => Some(product_id),
            Self::Seasonal { season } => season.as_deref(),
            Self::Manual => None,
        }
    }
}

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product: ProductId,

    /// Always at least 1
    pub quantity: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl CartItem {
    pub fn new(product: ProductId, quantity: u32) -> Result<Self, ModelError> {
        if quantity == 0 {
            return Err(ModelError::ZeroQuantity);
        }
        Ok(Self {
            product,
            quantity,
            name: None,
            price: None,
        })
    }

    /// Line total when the unit price is known.
    pub fn subtotal(&self) -> Option<f64> {
        self.price.map(|price| price * f64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WishlistItem {
    pub product: ProductId,
}

/// User actions recorded in the browsing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    View,
    Like,
    WishlistAdd,
    WishlistRemove,
    Purchase,
    Return,
}

impl HistoryAction {
    /// Path segment of the endpoint that records this action.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Like => "like",
            Self::WishlistAdd => "wishlist/add",
            Self::WishlistRemove => "wishlist/remove",
            Self::Purchase => "purchase",
            Self::Return => "return",
        }
    }

    /// Parse either the snake_case name or the server's relationship name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "VIEW" | "VIEWED" => Some(Self::View),
            "LIKE" | "LIKED" => Some(Self::Like),
            "WISHLIST_ADD" | "WISHLISTED" => Some(Self::WishlistAdd),
            "WISHLIST_REMOVE" | "UNWISHLISTED" => Some(Self::WishlistRemove),
            "PURCHASE" | "PURCHASED" => Some(Self::Purchase),
            "RETURN" | "RETURNED" => Some(Self::Return),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub action: HistoryAction,
    pub product: ProductId,

    /// Server timestamp (ISO format), absent for relationship-only actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A single product review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub rating: u8,

    #[serde(default)]
    pub comment: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Reviews for one SKU plus their average.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub reviews: Vec<Review>,

    /// `None` when there are no reviews yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

/// A product to create in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub price: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.sku.trim().is_empty() {
            return Err(ModelError::Validation("sku is required".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ModelError::Validation("name is required".into()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ModelError::InvalidPrice(self.price));
        }
        Ok(())
    }
}

/// Result of the first login step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials accepted; bearer token issued
    Authenticated { access_token: String },
    /// Second factor required; submit the code together with this token
    TwoFactor { pending_token: String },
}

/// Account details returned by the profile endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub privacy: Option<String>,
}
