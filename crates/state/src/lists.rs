use crate::{bounded, fetch_latest, lock, outcome_error, StoreError};
use serde::Serialize;
use shopflow_backend_http::{BackendError, ListBackend};
use shopflow_coordinator::{CoordinatorConfig, Outcome, RequestCoordinator};
use shopflow_mapper::replay_wishlist;
use shopflow_model::{CartItem, HistoryAction, ProductId, WishlistItem};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Cart,
    Wishlist,
}

impl ListKind {
    fn key(self) -> &'static str {
        match self {
            Self::Cart => "cart",
            Self::Wishlist => "wishlist",
        }
    }
}

/// Locally rendered cart and wishlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListsView {
    pub cart: Vec<CartItem>,
    pub wishlist: Vec<WishlistItem>,
    /// Last command or refetch failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
enum Edit {
    AddLine(CartItem),
    RemoveLine(ProductId),
    Wish(ProductId),
    Unwish(ProductId),
}

impl Edit {
    fn list(&self) -> ListKind {
        match self {
            Self::AddLine(_) | Self::RemoveLine(_) => ListKind::Cart,
            Self::Wish(_) | Self::Unwish(_) => ListKind::Wishlist,
        }
    }
}

/// What an optimistic edit replaced, for rollback.
enum Previous {
    Line(Option<CartItem>),
    Listed(bool),
}

#[derive(Default)]
struct Lists {
    view: ListsView,
    pending_cart: usize,
    pending_wishlist: usize,
}

impl Lists {
    fn pending(&mut self, list: ListKind) -> &mut usize {
        match list {
            ListKind::Cart => &mut self.pending_cart,
            ListKind::Wishlist => &mut self.pending_wishlist,
        }
    }

    fn listed(&self, product: &ProductId) -> bool {
        self.view.wishlist.iter().any(|w| &w.product == product)
    }

    fn apply(&mut self, edit: &Edit) -> Result<Previous, StoreError> {
        let cart = &mut self.view.cart;
        let previous = match edit {
            Edit::AddLine(item) => {
                let previous = cart.iter().find(|l| l.product == item.product).cloned();
                match cart.iter_mut().find(|l| l.product == item.product) {
                    Some(line) => {
                        line.quantity =
                            line.quantity.checked_add(item.quantity).ok_or_else(|| {
                                StoreError::Validation(format!(
                                    "quantity for {} would exceed {}",
                                    item.product.as_str(),
                                    u32::MAX
                                ))
                            })?;
                    }
                    None => cart.push(item.clone()),
                }
                Previous::Line(previous)
            }
            Edit::RemoveLine(product) => {
                let previous = cart
                    .iter()
                    .position(|l| &l.product == product)
                    .map(|at| cart.remove(at));
                Previous::Line(previous)
            }
            Edit::Wish(product) => {
                let listed = self.listed(product);
                if !listed {
                    self.view.wishlist.push(WishlistItem {
                        product: product.clone(),
                    });
                }
                Previous::Listed(listed)
            }
            Edit::Unwish(product) => {
                let listed = self.listed(product);
                self.view.wishlist.retain(|w| &w.product != product);
                Previous::Listed(listed)
            }
        };
        Ok(previous)
    }

    /// Revert `edit` without disturbing edits applied after it.
    fn undo(&mut self, edit: &Edit, previous: Previous) {
        let cart = &mut self.view.cart;
        match (edit, previous) {
            (Edit::AddLine(item), _) => {
                if let Some(line) = cart.iter_mut().find(|l| l.product == item.product) {
                    line.quantity = line.quantity.saturating_sub(item.quantity);
                }
                cart.retain(|l| l.quantity > 0);
            }
            (Edit::RemoveLine(product), Previous::Line(Some(line))) => {
                if !cart.iter().any(|l| &l.product == product) {
                    cart.push(line);
                }
            }
            (Edit::Wish(product), Previous::Listed(false)) => {
                self.view.wishlist.retain(|w| &w.product != product);
            }
            (Edit::Unwish(product), Previous::Listed(true)) => {
                if !self.listed(product) {
                    self.view.wishlist.push(WishlistItem {
                        product: product.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    /// Store a refetched list unless newer edits are still outstanding.
    fn accept<T>(
        &mut self,
        list: ListKind,
        outcome: Outcome<T, BackendError>,
        store: impl FnOnce(&mut ListsView, T),
    ) -> Result<(), StoreError> {
        match outcome {
            Outcome::Ready(items) => {
                if *self.pending(list) == 0 {
                    store(&mut self.view, items);
                }
                Ok(())
            }
            other => match outcome_error(&other) {
                Some(err) => {
                    self.view.error = Some(err.to_string());
                    Err(err)
                }
                None => Ok(()),
            },
        }
    }
}

/// Cart and wishlist with optimistic edits.
///
/// Edits show up locally at once. Commands for the same list reach the
/// server one at a time in the order they were made, and once the last
/// outstanding command for a list settles the list is refetched and the
/// server's answer replaces the local copy. A failed command rolls its own
/// edit back.
pub struct CartWishlistStateStore<B> {
    backend: B,
    user_id: String,
    coordinator: RequestCoordinator,
    lists: Mutex<Lists>,
    cart_turns: tokio::sync::Mutex<()>,
    wishlist_turns: tokio::sync::Mutex<()>,
}

impl<B: ListBackend> CartWishlistStateStore<B> {
    pub fn new(backend: B, user_id: impl Into<String>) -> Self {
        Self::with_config(backend, user_id, CoordinatorConfig::immediate())
    }

    pub fn with_config(backend: B, user_id: impl Into<String>, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            coordinator: RequestCoordinator::new(config),
            lists: Mutex::new(Lists::default()),
            cart_turns: tokio::sync::Mutex::new(()),
            wishlist_turns: tokio::sync::Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn view(&self) -> ListsView {
        lock(&self.lists).view.clone()
    }

    pub fn cart(&self) -> Vec<CartItem> {
        lock(&self.lists).view.cart.clone()
    }

    pub fn wishlist(&self) -> Vec<WishlistItem> {
        lock(&self.lists).view.wishlist.clone()
    }

    /// Fetch both lists from the server.
    pub async fn load(&self) -> Result<(), StoreError> {
        let (cart, wishlist) = tokio::join!(
            self.reconcile(ListKind::Cart),
            self.reconcile(ListKind::Wishlist)
        );
        cart.and(wishlist)
    }

    /// Add a product. Cart quantity defaults to 1 and accumulates onto an
    /// existing line; the wishlist ignores quantity and never duplicates.
    pub async fn add_item(
        &self,
        list: ListKind,
        product: ProductId,
        quantity: Option<u32>,
    ) -> Result<(), StoreError> {
        let edit = match list {
            ListKind::Cart => Edit::AddLine(CartItem::new(product, quantity.unwrap_or(1))?),
            ListKind::Wishlist => Edit::Wish(product),
        };
        self.submit(edit).await
    }

    pub async fn remove_item(&self, list: ListKind, product: &ProductId) -> Result<(), StoreError> {
        let edit = match list {
            ListKind::Cart => Edit::RemoveLine(product.clone()),
            ListKind::Wishlist => Edit::Unwish(product.clone()),
        };
        self.submit(edit).await
    }

    /// Place an order for the cart.
    ///
    /// The local cart is only cleared once the server confirms the order;
    /// on failure it is left as it was.
    pub async fn checkout(&self) -> Result<(), StoreError> {
        {
            let mut lists = lock(&self.lists);
            if lists.view.cart.is_empty() && lists.pending_cart == 0 {
                return Err(StoreError::Validation("cart is empty".into()));
            }
            lists.pending_cart += 1;
            lists.view.error = None;
        }

        let result = {
            let _turn = self.cart_turns.lock().await;
            bounded(self.timeout(), self.backend.checkout(&self.user_id)).await
        };

        match &result {
            Ok(()) => {
                tracing::info!(user = %self.user_id, "Order placed");
                lock(&self.lists).view.cart.clear();
            }
            Err(err) => {
                tracing::warn!(user = %self.user_id, error = %err, "Checkout failed; cart kept");
                lock(&self.lists).view.error = Some(err.to_string());
            }
        }

        self.finish(ListKind::Cart).await;
        result
    }

    fn timeout(&self) -> std::time::Duration {
        self.coordinator.config().request_timeout
    }

    async fn submit(&self, edit: Edit) -> Result<(), StoreError> {
        let list = edit.list();
        let previous = {
            let mut lists = lock(&self.lists);
            let previous = lists.apply(&edit)?;
            *lists.pending(list) += 1;
            lists.view.error = None;
            previous
        };
        tracing::debug!(?edit, "Applied optimistic edit");

        let result = self.send(&edit).await;
        if let Err(err) = &result {
            tracing::warn!(?edit, error = %err, "Edit rejected; rolling back");
            let mut lists = lock(&self.lists);
            lists.undo(&edit, previous);
            lists.view.error = Some(err.to_string());
        }

        self.finish(list).await;
        result
    }

    async fn send(&self, edit: &Edit) -> Result<(), StoreError> {
        let turns = match edit.list() {
            ListKind::Cart => &self.cart_turns,
            ListKind::Wishlist => &self.wishlist_turns,
        };
        let _turn = turns.lock().await;

        let user = self.user_id.as_str();
        let request = async {
            match edit {
                Edit::AddLine(item) => {
                    self.backend
                        .add_to_cart(user, &item.product, item.quantity)
                        .await
                }
                Edit::RemoveLine(product) => self.backend.remove_from_cart(user, product).await,
                Edit::Wish(product) => {
                    self.backend
                        .record(user, HistoryAction::WishlistAdd, product)
                        .await
                }
                Edit::Unwish(product) => {
                    self.backend
                        .record(user, HistoryAction::WishlistRemove, product)
                        .await
                }
            }
        };
        bounded(self.timeout(), request).await
    }

    /// Mark one command for `list` settled; refetch once none are left.
    async fn finish(&self, list: ListKind) {
        let idle = {
            let mut lists = lock(&self.lists);
            let pending = lists.pending(list);
            *pending = pending.saturating_sub(1);
            *pending == 0
        };
        if idle {
            if let Err(err) = self.reconcile(list).await {
                tracing::warn!(?list, error = %err, "Refetch failed; keeping local state");
            }
        }
    }

    async fn reconcile(&self, list: ListKind) -> Result<(), StoreError> {
        let user = self.user_id.as_str();
        let mut result = Ok(());

        match list {
            ListKind::Cart => {
                fetch_latest(
                    &self.coordinator,
                    list.key(),
                    &self.lists,
                    || self.backend.cart(user),
                    |lists, outcome| {
                        result = lists.accept(list, outcome, |view, items| view.cart = items)
                    },
                )
                .await;
            }
            ListKind::Wishlist => {
                fetch_latest(
                    &self.coordinator,
                    list.key(),
                    &self.lists,
                    || async move {
                        let events = self.backend.history(user).await?;
                        Ok::<_, BackendError>(replay_wishlist(&events))
                    },
                    |lists, outcome| {
                        result = lists.accept(list, outcome, |view, items| view.wishlist = items)
                    },
                )
                .await;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLists;
    use std::time::Duration;
    use tokio::time::sleep;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn store(fake: FakeLists) -> CartWishlistStateStore<FakeLists> {
        CartWishlistStateStore::new(fake, "u1")
    }

    fn ids(cart: &[CartItem]) -> Vec<&str> {
        cart.iter().map(|l| l.product.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_then_immediate_remove_converges_without_product() {
        let p1 = ProductId::id("P1");
        let store = store(FakeLists::with_latency(ms(100)));

        let (added, removed) = tokio::join!(
            store.add_item(ListKind::Cart, p1.clone(), Some(1)),
            async {
                sleep(ms(10)).await;
                store.remove_item(ListKind::Cart, &p1).await
            }
        );

        assert!(added.is_ok());
        assert!(removed.is_ok());
        assert!(store.cart().is_empty());
        assert!(store.backend().server_cart().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_is_visible_before_server_confirms() {
        let store = store(FakeLists::with_latency(ms(100)));

        let (added, during) = tokio::join!(
            store.add_item(ListKind::Cart, ProductId::id("P1"), Some(2)),
            async {
                sleep(ms(10)).await;
                store.cart()
            }
        );

        assert!(added.is_ok());
        assert_eq!(ids(&during), vec!["P1"]);
        assert_eq!(store.cart()[0].quantity, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_add_rolls_back() {
        let fake = FakeLists::with_latency(ms(50)).with_line("P0", 1);
        fake.fail_adds(true);
        let store = store(fake);
        store.load().await.unwrap();

        let err = store
            .add_item(ListKind::Cart, ProductId::id("P1"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Backend(BackendError::Status { status: 500, .. })));
        assert_eq!(ids(&store.cart()), vec!["P0"]);
        assert!(store.view().error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_adopts_server_state() {
        // Another session already put P9 in the cart.
        let store = store(FakeLists::with_latency(ms(20)).with_line("P9", 3));

        store
            .add_item(ListKind::Cart, ProductId::id("P1"), None)
            .await
            .unwrap();

        let cart = store.cart();
        assert_eq!(ids(&cart), vec!["P9", "P1"]);
        assert_eq!(cart[0].quantity, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_add_accumulates_quantity_on_one_line() {
        let store = store(FakeLists::with_latency(ms(20)));
        let p1 = ProductId::id("P1");

        store.add_item(ListKind::Cart, p1.clone(), Some(1)).await.unwrap();
        store.add_item(ListKind::Cart, p1, Some(2)).await.unwrap();

        let cart = store.cart();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].quantity, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_quantity_rejected_without_network() {
        let store = store(FakeLists::default());
        let err = store
            .add_item(ListKind::Cart, ProductId::id("P1"), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.backend().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quantity_overflow_rejected_before_apply() {
        let store = store(FakeLists::default().with_line("P1", 1));
        store.load().await.unwrap();
        let calls = store.backend().calls();

        let err = store
            .add_item(ListKind::Cart, ProductId::id("P1"), Some(u32::MAX))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.cart()[0].quantity, 1);
        assert_eq!(store.backend().calls(), calls);
        assert_eq!(store.backend().server_cart()[0].quantity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_clears_only_after_confirmation() {
        let store = store(FakeLists::with_latency(ms(100)).with_line("P1", 2));
        store.load().await.unwrap();

        let (placed, during) = tokio::join!(store.checkout(), async {
            sleep(ms(50)).await;
            store.cart()
        });

        assert!(placed.is_ok());
        assert_eq!(ids(&during), vec!["P1"]);
        assert!(store.cart().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_failure_keeps_cart() {
        let fake = FakeLists::with_latency(ms(20)).with_line("P1", 2);
        fake.fail_checkout(true);
        let store = store(fake);
        store.load().await.unwrap();

        let err = store.checkout().await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(BackendError::Rejected(_))));
        assert_eq!(ids(&store.cart()), vec!["P1"]);
        assert!(store.view().error.unwrap().contains("payment declined"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_of_empty_cart_is_rejected() {
        let store = store(FakeLists::default());
        store.load().await.unwrap();
        let calls = store.backend().calls();

        let err = store.checkout().await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.backend().calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wishlist_never_duplicates() {
        let store = store(FakeLists::with_latency(ms(20)));
        let p1 = ProductId::id("P1");

        store.add_item(ListKind::Wishlist, p1.clone(), None).await.unwrap();
        store.add_item(ListKind::Wishlist, p1.clone(), None).await.unwrap();
        assert_eq!(store.wishlist(), vec![WishlistItem { product: p1.clone() }]);

        store.remove_item(ListKind::Wishlist, &p1).await.unwrap();
        assert!(store.wishlist().is_empty());
    }
}
