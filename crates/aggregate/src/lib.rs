//! Recommendation fan-out and per-section state.
//!
//! A page of recommendations is described by a list of provider descriptors.
//! `RecommendationAggregator::aggregate` sends all of them at once and
//! settles every one independently: a failing or slow provider only marks
//! its own section as failed. Sections are never deduplicated against each
//! other.

use futures::future::join_all;
use serde::Serialize;
use shopflow_backend_http::RecommendationBackend;
use shopflow_coordinator::{CoordinatorConfig, Outcome, RequestCoordinator, Ticket};
use shopflow_model::{Product, ProviderKind, RecommendationRequest};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Render state of one provider section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub status: SectionStatus,
    pub items: Vec<Product>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The descriptor this section was last fetched for
    pub request: RecommendationRequest,
}

impl Section {
    fn loading(request: RecommendationRequest) -> Self {
        Self {
            status: SectionStatus::Loading,
            items: Vec::new(),
            error: None,
            request,
        }
    }
}

pub type Sections = BTreeMap<ProviderKind, Section>;

fn section_key(kind: ProviderKind) -> String {
    format!("recommend:{kind}")
}

/// Fans out to recommendation providers and tracks one section per kind.
pub struct RecommendationAggregator<B> {
    backend: B,
    coordinator: RequestCoordinator,
    sections: Mutex<Sections>,
}

impl<B: RecommendationBackend> RecommendationAggregator<B> {
    pub fn new(backend: B, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            coordinator: RequestCoordinator::new(config),
            sections: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Snapshot of every section.
    pub fn sections(&self) -> Sections {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn section(&self, kind: ProviderKind) -> Option<Section> {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    /// Fetch every requested section concurrently and return the settled view.
    ///
    /// Each requested section is reset to `Loading` with no items before any
    /// request goes out. Sections that are no longer requested are dropped.
    /// If a kind appears more than once, the last descriptor wins.
    pub async fn aggregate(&self, requests: &[RecommendationRequest]) -> Sections {
        let tickets: Vec<(Ticket, &RecommendationRequest)> = {
            let mut sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);

            let dropped: Vec<ProviderKind> = sections
                .keys()
                .filter(|kind| !requests.iter().any(|r| r.kind() == **kind))
                .copied()
                .collect();
            for kind in dropped {
                sections.remove(&kind);
                self.coordinator.invalidate(&section_key(kind));
            }

            requests
                .iter()
                .map(|request| {
                    sections.insert(request.kind(), Section::loading(request.clone()));
                    (self.coordinator.issue(&section_key(request.kind())), request)
                })
                .collect()
        };

        tracing::debug!(providers = tickets.len(), "Fanning out recommendation requests");

        join_all(
            tickets
                .iter()
                .map(|(ticket, request)| self.fetch_section(ticket, request)),
        )
        .await;

        self.sections()
    }

    async fn fetch_section(&self, ticket: &Ticket, request: &RecommendationRequest) {
        if !self.coordinator.settle(ticket).await {
            return;
        }

        let kind = request.kind();
        let outcome = self
            .coordinator
            .dispatch(ticket, || self.backend.recommend(request))
            .await;

        let (status, items, error) = match outcome {
            Outcome::Ready(items) => (SectionStatus::Ready, items, None),
            Outcome::Failed(err) => {
                tracing::warn!(provider = %kind, error = %err, "Provider failed");
                (SectionStatus::Error, Vec::new(), Some(err.to_string()))
            }
            Outcome::TimedOut(after) => {
                tracing::warn!(provider = %kind, ?after, "Provider timed out");
                (
                    SectionStatus::Error,
                    Vec::new(),
                    Some(format!("timed out after {after:?}")),
                )
            }
            Outcome::Empty => (SectionStatus::Ready, Vec::new(), None),
            Outcome::Superseded => return,
        };

        let mut sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the lock so a newer fetch's Loading state is never overwritten.
        if !self.coordinator.is_current(ticket) {
            return;
        }
        sections.insert(
            kind,
            Section {
                status,
                items,
                error,
                request: request.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopflow_backend_http::BackendError;
    use shopflow_model::ProductId;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Returns one product named after the request subject, per provider.
    #[derive(Default)]
    struct FakeRecommender {
        failing: Vec<ProviderKind>,
        delays: HashMap<String, Duration>,
        shared: Vec<Product>,
        calls: AtomicUsize,
    }

    impl RecommendationBackend for FakeRecommender {
        async fn recommend(
            &self,
            request: &RecommendationRequest,
        ) -> Result<Vec<Product>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let subject = request.subject().unwrap_or("none").to_string();
            if let Some(delay) = self.delays.get(&subject) {
                sleep(*delay).await;
            }
            if self.failing.contains(&request.kind()) {
                return Err(BackendError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            let mut items = vec![Product::new(
                ProductId::id(format!("{}-{subject}", request.kind())),
                subject,
            )];
            items.extend(self.shared.iter().cloned());
            Ok(items)
        }
    }

    fn page(user: &str) -> Vec<RecommendationRequest> {
        vec![
            RecommendationRequest::for_kind(ProviderKind::CfUser, user, Some(10)),
            RecommendationRequest::for_kind(ProviderKind::Seasonal, "winter", None),
            RecommendationRequest::Manual,
        ]
    }

    fn aggregator(fake: FakeRecommender) -> RecommendationAggregator<FakeRecommender> {
        RecommendationAggregator::new(fake, CoordinatorConfig::immediate())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_provider_is_isolated() {
        let agg = aggregator(FakeRecommender {
            failing: vec![ProviderKind::CfUser],
            ..Default::default()
        });

        let sections = agg.aggregate(&page("u1")).await;

        let cf = &sections[&ProviderKind::CfUser];
        assert_eq!(cf.status, SectionStatus::Error);
        assert!(cf.items.is_empty());
        assert!(cf.error.as_deref().unwrap().contains("500"));

        for kind in [ProviderKind::Seasonal, ProviderKind::Manual] {
            assert_eq!(sections[&kind].status, SectionStatus::Ready);
            assert_eq!(sections[&kind].items.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_alone() {
        let fake = FakeRecommender {
            delays: HashMap::from([("winter".to_string(), Duration::from_secs(60))]),
            ..Default::default()
        };
        let agg = RecommendationAggregator::new(
            fake,
            CoordinatorConfig::immediate().with_timeout(Duration::from_secs(5)),
        );

        let sections = agg.aggregate(&page("u1")).await;
        assert_eq!(sections[&ProviderKind::Seasonal].status, SectionStatus::Error);
        assert_eq!(sections[&ProviderKind::CfUser].status, SectionStatus::Ready);
        assert_eq!(sections[&ProviderKind::Manual].status, SectionStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sections_are_not_deduplicated() {
        let shared = Product::new(ProductId::id("bestseller"), "Bestseller");
        let agg = aggregator(FakeRecommender {
            shared: vec![shared.clone()],
            ..Default::default()
        });

        let sections = agg.aggregate(&page("u1")).await;
        for section in sections.values() {
            assert!(section.items.contains(&shared));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_subject_wins_over_slow_stale_fetch() {
        let agg = aggregator(FakeRecommender {
            delays: HashMap::from([("u1".to_string(), Duration::from_millis(500))]),
            ..Default::default()
        });

        let page_u1 = page("u1");
        let first = agg.aggregate(&page_u1);
        let second = async {
            sleep(Duration::from_millis(100)).await;
            agg.aggregate(&page("u2")).await
        };
        let (_, latest) = tokio::join!(first, second);

        let cf = &latest[&ProviderKind::CfUser];
        assert_eq!(cf.items[0].name, "u2");

        // The u1 response arrived last but must not have replaced u2.
        let settled = agg.section(ProviderKind::CfUser).unwrap();
        assert_eq!(settled.items[0].name, "u2");
        assert_eq!(settled.request.subject(), Some("u2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_clears_previous_items_while_loading() {
        let agg = aggregator(FakeRecommender {
            delays: HashMap::from([("u2".to_string(), Duration::from_millis(300))]),
            ..Default::default()
        });
        agg.aggregate(&page("u1")).await;
        assert_eq!(
            agg.section(ProviderKind::CfUser).unwrap().status,
            SectionStatus::Ready
        );

        let page_u2 = page("u2");
        let refetch = agg.aggregate(&page_u2);
        let observe = async {
            sleep(Duration::from_millis(100)).await;
            agg.section(ProviderKind::CfUser).unwrap()
        };
        let (done, mid) = tokio::join!(refetch, observe);

        assert_eq!(mid.status, SectionStatus::Loading);
        assert!(mid.items.is_empty());
        assert_eq!(done[&ProviderKind::CfUser].items[0].name, "u2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sections_are_removed() {
        let agg = aggregator(FakeRecommender::default());
        agg.aggregate(&page("u1")).await;

        let only_manual = agg.aggregate(&[RecommendationRequest::Manual]).await;
        assert_eq!(only_manual.len(), 1);
        assert!(only_manual.contains_key(&ProviderKind::Manual));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_subject_edits_fetch_once() {
        let agg = RecommendationAggregator::new(
            FakeRecommender::default(),
            CoordinatorConfig::default().with_debounce(Duration::from_millis(300)),
        );
        let single = |user: &'static str, delay: u64| {
            let agg = &agg;
            async move {
                sleep(Duration::from_millis(delay)).await;
                agg.aggregate(&[RecommendationRequest::for_kind(
                    ProviderKind::HistorySimple,
                    user,
                    None,
                )])
                .await
            }
        };

        let (_, _, last) = tokio::join!(single("u", 0), single("us", 50), single("use", 100));
        assert_eq!(agg.backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(last[&ProviderKind::HistorySimple].items[0].name, "use");
    }
}
