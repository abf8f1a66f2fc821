//! Per-key request coordination.
//!
//! Every logical query (the search box, the product list, one recommendation
//! section) gets a key. For each key the coordinator keeps a monotonic
//! sequence number and a cancellation token:
//! - a new schedule cancels the previous one while it is still debouncing
//! - a response is only handed back if it belongs to the latest issued
//!   request for its key; anything older is reported as `Superseded`
//! - every request runs under an explicit timeout
//!
//! There is no transport-level cancellation: a request already on the wire
//! runs to completion and its response is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiescence period before a scheduled request is sent
    pub debounce: Duration,
    /// Upper bound on a single request
    pub request_timeout: Duration,
    /// Minimum text length for `schedule_text`
    pub min_query_len: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            request_timeout: Duration::from_secs(10),
            min_query_len: shopflow_model::MIN_QUERY_LEN,
        }
    }
}

impl CoordinatorConfig {
    /// No debounce; used where each call is an explicit user action.
    pub fn immediate() -> Self {
        Self {
            debounce: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// How a scheduled request settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    /// Latest request for its key; apply it
    Ready(T),
    /// Latest request for its key failed
    Failed(E),
    /// Latest request for its key exceeded the timeout
    TimedOut(Duration),
    /// Input below the trigger threshold; nothing was sent
    Empty,
    /// A newer request for the same key exists; discard
    Superseded,
}

impl<T, E> Outcome<T, E> {
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}

struct Slot {
    seq: u64,
    cancel: CancellationToken,
}

/// Identifies one issued request.
#[derive(Debug, Clone)]
pub struct Ticket {
    key: String,
    seq: u64,
    cancel: CancellationToken,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Debounces and suppresses stale responses per query key.
pub struct RequestCoordinator {
    config: CoordinatorConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RequestCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Issue the next sequence number for `key`, cancelling the previous one.
    pub fn issue(&self, key: &str) -> Ticket {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            seq: 0,
            cancel: CancellationToken::new(),
        });
        slot.cancel.cancel();
        slot.seq += 1;
        slot.cancel = CancellationToken::new();

        Ticket {
            key: key.to_string(),
            seq: slot.seq,
            cancel: slot.cancel.clone(),
        }
    }

    /// Whether `ticket` is still the latest request for its key.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.latest(&ticket.key) == ticket.seq
    }

    /// Latest issued sequence number for `key` (0 if never issued).
    pub fn latest(&self, key: &str) -> u64 {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |slot| slot.seq)
    }

    /// Make every outstanding request for `key` stale.
    pub fn invalidate(&self, key: &str) {
        let ticket = self.issue(key);
        tracing::debug!(key, seq = ticket.seq, "Invalidated outstanding requests");
    }

    /// Schedule a request for `key` after the debounce period.
    ///
    /// If another schedule for the same key arrives while this one is still
    /// waiting, `factory` is never called.
    pub async fn schedule<T, E, F, Fut>(&self, key: &str, factory: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self.issue(key);
        if !self.settle(&ticket).await {
            return Outcome::Superseded;
        }
        self.dispatch(&ticket, factory).await
    }

    /// Wait out the debounce period for `ticket`.
    ///
    /// Returns false as soon as a newer request for the same key is issued.
    pub async fn settle(&self, ticket: &Ticket) -> bool {
        if self.config.debounce.is_zero() {
            return self.is_current(ticket);
        }
        tokio::select! {
            _ = ticket.cancel.cancelled() => {
                tracing::debug!(
                    key = %ticket.key,
                    seq = ticket.seq,
                    "Coalesced into a newer request"
                );
                false
            }
            _ = tokio::time::sleep(self.config.debounce) => true,
        }
    }

    /// Like `schedule`, gated on `text` reaching the minimum query length.
    ///
    /// Below the threshold this resolves to `Empty` without touching the
    /// network, and any request still in flight for `key` becomes stale.
    pub async fn schedule_text<T, E, F, Fut>(
        &self,
        key: &str,
        text: &str,
        factory: F,
    ) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if text.trim().chars().count() < self.config.min_query_len {
            self.invalidate(key);
            return Outcome::Empty;
        }
        self.schedule(key, factory).await
    }

    /// Run `factory` now under the timeout and check the ticket afterwards.
    pub async fn dispatch<T, E, F, Fut>(&self, ticket: &Ticket, factory: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_current(ticket) {
            return Outcome::Superseded;
        }

        tracing::debug!(key = %ticket.key, seq = ticket.seq, "Issuing request");
        let result = tokio::time::timeout(self.config.request_timeout, factory()).await;

        if !self.is_current(ticket) {
            tracing::debug!(key = %ticket.key, seq = ticket.seq, "Suppressed stale response");
            return Outcome::Superseded;
        }

        match result {
            Ok(Ok(value)) => Outcome::Ready(value),
            Ok(Err(err)) => Outcome::Failed(err),
            Err(_) => {
                tracing::warn!(
                    key = %ticket.key,
                    timeout = ?self.config.request_timeout,
                    "Request timed out"
                );
                Outcome::TimedOut(self.config.request_timeout)
            }
        }
    }
}

impl Default for RequestCoordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}
