//! Query translation for the commerce API.
//!
//! Converts abstract model types into endpoint paths and query parameters:
//! - `SearchQuery` → `/search` or `/search/fulltext`
//! - `FilterCriteria` → `/products`
//! - `RecommendationRequest` → the provider's recommendation endpoint

use shopflow_model::{
    FilterCriteria, ModelError, ProviderKind, RecommendationRequest, SearchMode, SearchQuery,
    SortKey, MIN_QUERY_LEN,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("Empty query text")]
    EmptyQuery,
    #[error("Query text shorter than {min} characters")]
    TooShort { min: usize },
    #[error("Inconsistent filters: {0}")]
    InvalidFilters(#[from] ModelError),
    #[error("Provider {0} needs a subject id")]
    MissingSubject(ProviderKind),
}

/// A GET request against the API, relative to its base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Unencoded path segments
    pub segments: Vec<String>,
    /// Query parameters, only those that are set
    pub params: Vec<(&'static str, String)>,
}

impl ApiRequest {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &'static str, value: impl ToString) -> Self {
        self.params.push((key, value.to_string()));
        self
    }

    pub fn param_opt<T: ToString>(self, key: &'static str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

/// Trait for translating a model value into an API request.
pub trait QueryDialect<Q: ?Sized> {
    /// The output type (usually `ApiRequest`)
    type Output;

    /// Translate `query` into this dialect
    fn translate(&self, query: &Q) -> Result<Self::Output, QueryError>;
}

/// Sort keys the server understands for a given endpoint.
///
/// Keys it does not understand are applied client-side only.
fn server_sort(key: SortKey, supported: &[SortKey]) -> Option<&'static str> {
    supported.contains(&key).then(|| key.as_str())
}

fn check_text(query: &SearchQuery, min_len: usize) -> Result<String, QueryError> {
    let text = query.text.trim();
    if text.is_empty() {
        return Err(QueryError::EmptyQuery);
    }
    if !query.is_actionable(min_len) {
        return Err(QueryError::TooShort { min: min_len });
    }
    Ok(text.to_string())
}

/// Dialect for the two text search endpoints.
#[derive(Debug, Clone)]
pub struct SearchDialect {
    pub min_query_len: usize,
}

impl Default for SearchDialect {
    fn default() -> Self {
        Self {
            min_query_len: MIN_QUERY_LEN,
        }
    }
}

impl QueryDialect<SearchQuery> for SearchDialect {
    type Output = ApiRequest;

    fn translate(&self, query: &SearchQuery) -> Result<ApiRequest, QueryError> {
        let text = check_text(query, self.min_query_len)?;
        let filters = &query.filters;
        filters.validate()?;

        let sortable = [SortKey::Name, SortKey::Price, SortKey::Rating];
        let request = match query.mode {
            SearchMode::Catalog => ApiRequest::new(["search"])
                .param("q", text)
                .param_opt("category", filters.category.as_deref())
                .param_opt("brand", filters.brand.as_deref()),
            SearchMode::Fulltext => ApiRequest::new(["search", "fulltext"]).param("q", text),
        };

        Ok(request
            .param_opt("min_price", filters.min_price)
            .param_opt("max_price", filters.max_price)
            .param_opt("sort_by", server_sort(filters.sort, &sortable)))
    }
}

/// Dialect for the `/products` listing.
#[derive(Debug, Default)]
pub struct CatalogDialect;

impl QueryDialect<FilterCriteria> for CatalogDialect {
    type Output = ApiRequest;

    fn translate(&self, filters: &FilterCriteria) -> Result<ApiRequest, QueryError> {
        filters.validate()?;

        // Cleared filters must still list the whole catalog.
        Ok(ApiRequest::new(["products"])
            .param_opt("category", filters.category.as_deref())
            .param_opt("min_price", filters.min_price)
            .param_opt("max_price", filters.max_price)
            .param_opt("sort", server_sort(filters.sort, &[SortKey::Name, SortKey::Price])))
    }
}

/// Dialect mapping provider descriptors to recommendation endpoints.
#[derive(Debug, Default)]
pub struct ProviderDialect;

fn subject(kind: ProviderKind, value: &str) -> Result<String, QueryError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QueryError::MissingSubject(kind));
    }
    Ok(value.to_string())
}

impl QueryDialect<RecommendationRequest> for ProviderDialect {
    type Output = ApiRequest;

    fn translate(&self, request: &RecommendationRequest) -> Result<ApiRequest, QueryError> {
        let kind = request.kind();
        let api = match request {
            RecommendationRequest::CfUser { user_id, limit } => {
                ApiRequest::new(["cf", "recommend", subject(kind, user_id)?.as_str()])
                    .param("algo", "user_based")
                    .param_opt("limit", *limit)
            }
            RecommendationRequest::CfItem { user_id, limit } => {
                ApiRequest::new(["cf", "recommend", subject(kind, user_id)?.as_str()])
                    .param("algo", "item_based")
                    .param_opt("limit", *limit)
            }
            RecommendationRequest::HistorySimple { user_id } => {
                ApiRequest::new(["recommend".to_string(), subject(kind, user_id)?])
            }
            RecommendationRequest::HistoryAdvanced { user_id } => {
                ApiRequest::new(["recommend_advanced".to_string(), subject(kind, user_id)?])
            }
            RecommendationRequest::ItemSimilar { product_id } => {
                ApiRequest::new(["recommend", "item", subject(kind, product_id)?.as_str()])
            }
            RecommendationRequest::Seasonal { season } => {
                ApiRequest::new(["recommend", "seasonal"]).param_opt("season", season.as_deref())
            }
            RecommendationRequest::Manual => ApiRequest::new(["recommend", "manual"]),
        };
        Ok(api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopflow_model::FilterEdit;

    #[test]
    fn test_search_basic() {
        let query = SearchQuery::new("lamp");
        let req = SearchDialect::default().translate(&query).unwrap();
        assert_eq!(req.to_string(), "/search?q=lamp&sort_by=name");
    }

    #[test]
    fn test_search_with_filters() {
        let filters = FilterCriteria::default()
            .apply(FilterEdit::Category(Some("home".into())))
            .apply(FilterEdit::MinPrice(Some(10.0)))
            .apply(FilterEdit::MaxPrice(Some(25.5)))
            .apply(FilterEdit::Sort(SortKey::Price));
        let query = SearchQuery::new(" desk ").with_filters(filters);
        let req = SearchDialect::default().translate(&query).unwrap();

        assert_eq!(req.get("q"), Some("desk"));
        assert_eq!(req.get("category"), Some("home"));
        assert_eq!(req.get("brand"), None);
        assert_eq!(req.get("min_price"), Some("10"));
        assert_eq!(req.get("max_price"), Some("25.5"));
        assert_eq!(req.get("sort_by"), Some("price"));
    }

    #[test]
    fn test_fulltext_omits_category() {
        let filters = FilterCriteria::default().apply(FilterEdit::Category(Some("home".into())));
        let query = SearchQuery::new("oak table")
            .with_filters(filters)
            .with_mode(SearchMode::Fulltext);
        let req = SearchDialect::default().translate(&query).unwrap();
        assert_eq!(req.segments, vec!["search", "fulltext"]);
        assert_eq!(req.get("category"), None);
    }

    #[test]
    fn test_score_sort_is_client_side_only() {
        let filters = FilterCriteria::default().apply(FilterEdit::Sort(SortKey::Score));
        let query = SearchQuery::new("lamp").with_filters(filters);
        let req = SearchDialect::default().translate(&query).unwrap();
        assert_eq!(req.get("sort_by"), None);
    }

    #[test]
    fn test_short_and_empty_queries() {
        let dialect = SearchDialect::default();
        assert_eq!(
            dialect.translate(&SearchQuery::new("   ")),
            Err(QueryError::EmptyQuery)
        );
        assert_eq!(
            dialect.translate(&SearchQuery::new("a")),
            Err(QueryError::TooShort { min: 2 })
        );
    }

    #[test]
    fn test_inverted_range_rejected() {
        let filters = FilterCriteria::default()
            .apply(FilterEdit::MinPrice(Some(50.0)))
            .apply(FilterEdit::MaxPrice(Some(5.0)));
        assert!(matches!(
            CatalogDialect.translate(&filters),
            Err(QueryError::InvalidFilters(_))
        ));
    }

    #[test]
    fn test_cleared_catalog_has_no_filters() {
        let req = CatalogDialect.translate(&FilterCriteria::default()).unwrap();
        assert_eq!(req.to_string(), "/products?sort=name");
    }

    #[test]
    fn test_provider_paths() {
        let dialect = ProviderDialect;
        let cases = [
            (
                RecommendationRequest::for_kind(ProviderKind::CfUser, "u1", Some(10)),
                "/cf/recommend/u1?algo=user_based&limit=10",
            ),
            (
                RecommendationRequest::for_kind(ProviderKind::CfItem, "u1", None),
                "/cf/recommend/u1?algo=item_based",
            ),
            (
                RecommendationRequest::for_kind(ProviderKind::HistorySimple, "u1", None),
                "/recommend/u1",
            ),
            (
                RecommendationRequest::for_kind(ProviderKind::HistoryAdvanced, "u1", None),
                "/recommend_advanced/u1",
            ),
            (
                RecommendationRequest::for_kind(ProviderKind::ItemSimilar, "p7", None),
                "/recommend/item/p7",
            ),
            (
                RecommendationRequest::for_kind(ProviderKind::Seasonal, "winter", None),
                "/recommend/seasonal?season=winter",
            ),
            (RecommendationRequest::Manual, "/recommend/manual"),
        ];
        for (request, expected) in cases {
            assert_eq!(dialect.translate(&request).unwrap().to_string(), expected);
        }
    }

    #[test]
    fn test_provider_requires_subject() {
        let request = RecommendationRequest::for_kind(ProviderKind::HistorySimple, " ", None);
        assert_eq!(
            ProviderDialect.translate(&request),
            Err(QueryError::MissingSubject(ProviderKind::HistorySimple))
        );
    }
}
