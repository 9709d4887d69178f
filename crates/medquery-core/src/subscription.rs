// ── Subscription controller (read side) ──
//
// A live, self-refreshing view of one query key. Each subscription
// registers a refresh callback with the KeyRegistry and re-fetches on
// every invalidation; state is published through a `watch` channel so UI
// consumers can render snapshots or await changes.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, trace, warn};

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::registry::{KeyRegistry, RegistrationToken, panic_reason};

// ── Fetcher ─────────────────────────────────────────────────────────

/// Asynchronous read operation behind a subscription.
///
/// The engine may call it any number of times for the same key. The key is
/// passed so one fetcher can derive request parameters from it; fetchers
/// that don't need it ignore the argument.
pub trait Fetcher<T>: Send + Sync + 'static {
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<T, QueryError>>;
}

impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn(&QueryKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
{
    fn fetch(&self, key: &QueryKey) -> BoxFuture<'static, Result<T, QueryError>> {
        self(key).boxed()
    }
}

// ── QueryState ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum QueryStatus {
    /// No fetch has resolved for the current key yet.
    Pending,
    /// The most recent applied fetch succeeded.
    Ready,
    /// The most recent applied fetch failed; `data` may still hold an
    /// earlier payload.
    Failed,
}

/// Snapshot of a subscription's observable state.
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    /// Latest successful payload. Survives later failures and key changes.
    pub data: Option<Arc<T>>,
    /// Latest failure, cleared by the next success.
    pub error: Option<Arc<QueryError>>,
    /// True while a fetch issued for the current key is outstanding.
    pub is_fetching: bool,
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        self.is_fetching && self.data.is_none()
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            is_fetching: false,
        }
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_fetching: self.is_fetching,
        }
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// One consumer's live interest in one query key.
///
/// Registers under its key on creation, fetches immediately, re-fetches
/// on every matching invalidation, and unregisters when dropped.
pub struct Subscription<T> {
    inner: Arc<SubscriptionInner<T>>,
    receiver: watch::Receiver<QueryState<T>>,
}

struct SubscriptionInner<T> {
    registry: KeyRegistry,
    runtime: Handle,
    state: watch::Sender<QueryState<T>>,
    control: Mutex<Control<T>>,
}

/// Bookkeeping behind the published state.
struct Control<T> {
    key: QueryKey,
    fetcher: Arc<dyn Fetcher<T>>,
    token: Option<RegistrationToken>,
    /// Bumped on every activation and deactivation. Results issued under
    /// an older generation are dropped.
    generation: u64,
    next_seq: u64,
    /// Highest sequence number whose result has been applied.
    applied_seq: u64,
    /// Outstanding fetches of the current generation.
    in_flight: usize,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    seq: u64,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    /// Register under `key` and start the first fetch.
    ///
    /// Fails with [`QueryError::NoRuntime`] outside a tokio runtime.
    pub fn new<F>(registry: &KeyRegistry, key: QueryKey, fetcher: F) -> Result<Self, QueryError>
    where
        F: Fetcher<T>,
    {
        let runtime = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let (state, receiver) = watch::channel(QueryState::default());

        let inner = Arc::new(SubscriptionInner {
            registry: registry.clone(),
            runtime,
            state,
            control: Mutex::new(Control {
                key,
                fetcher: Arc::new(fetcher),
                token: None,
                generation: 0,
                next_seq: 1,
                applied_seq: 0,
                in_flight: 0,
            }),
        });
        inner.activate();

        Ok(Self { inner, receiver })
    }

    /// Re-run the fetch now. Same effect as an invalidation of this key.
    pub fn refetch(&self) {
        self.inner.start_fetch();
    }

    /// Switch to a new key. A structurally equal key is a no-op.
    ///
    /// Returns `true` if the subscription moved: the old registration is
    /// removed before the new one is added, and a fetch starts.
    pub fn set_key(&mut self, key: QueryKey) -> bool {
        let old = {
            let ctl = self.inner.control();
            if ctl.key == key {
                return false;
            }
            ctl.key.clone()
        };

        debug!(from = %old, to = %key, "query key changed");
        self.inner.deactivate();
        self.inner.control().key = key;
        self.inner.activate();
        true
    }

    /// Replace the fetcher and switch to `key`.
    ///
    /// With an unchanged key the new fetcher is used from the next refresh
    /// on, without fetching now.
    pub fn set_query<F>(&mut self, key: QueryKey, fetcher: F) -> bool
    where
        F: Fetcher<T>,
    {
        self.inner.control().fetcher = Arc::new(fetcher);
        self.set_key(key)
    }
}

impl<T> Subscription<T> {
    pub fn key(&self) -> QueryKey {
        self.inner.control().key.clone()
    }

    /// Current state snapshot (cheap: `Arc` clones).
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.state.borrow().status
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.state.borrow().data.clone()
    }

    pub fn error(&self) -> Option<Arc<QueryError>> {
        self.inner.state.borrow().error.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.state.borrow().is_fetching
    }

    /// A fresh receiver for state changes.
    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    /// Wait for the next state change, returning the new snapshot.
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until no fetch for the current key is outstanding.
    pub async fn settled(&self) -> QueryState<T> {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|s| !s.is_fetching).await {
            Ok(state) => (*state).clone(),
            Err(_) => self.state(),
        }
    }
}

impl<T: Send + Sync + 'static> Subscription<T> {
    /// Convert into a `Stream` of state snapshots for `StreamExt` combinators.
    ///
    /// The stream keeps the subscription registered until it is dropped.
    pub fn into_stream(self) -> SubscriptionStream<T> {
        let inner = WatchStream::new(self.inner.state.subscribe());
        SubscriptionStream {
            _subscription: self,
            inner,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.inner.deactivate();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Release `control` before borrowing state; fetch paths lock in
        // that order.
        let key = self.inner.control().key.clone();
        let state = self.inner.state.borrow();
        f.debug_struct("Subscription")
            .field("key", &key)
            .field("status", &state.status)
            .field("is_fetching", &state.is_fetching)
            .finish_non_exhaustive()
    }
}

/// `Stream` adapter over a subscription's state channel.
pub struct SubscriptionStream<T> {
    _subscription: Subscription<T>,
    inner: WatchStream<QueryState<T>>,
}

impl<T: Send + Sync + 'static> futures_core::Stream for SubscriptionStream<T> {
    type Item = QueryState<T>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── Inner lifecycle ─────────────────────────────────────────────────

impl<T> SubscriptionInner<T> {
    fn control(&self) -> MutexGuard<'_, Control<T>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unregister and invalidate every outstanding fetch.
    fn deactivate(&self) {
        let token = {
            let mut ctl = self.control();
            ctl.generation += 1;
            ctl.in_flight = 0;
            ctl.token.take()
        };
        if let Some(token) = token {
            self.registry.unregister(&token);
        }
    }
}

impl<T: Send + Sync + 'static> SubscriptionInner<T> {
    /// Register under the current key and start a fetch.
    fn activate(self: &Arc<Self>) {
        {
            let mut ctl = self.control();
            ctl.generation += 1;
            ctl.in_flight = 0;

            // The registry only ever sees a weak reference.
            let weak = Arc::downgrade(self);
            let token = self.registry.register(ctl.key.clone(), move || {
                if let Some(inner) = weak.upgrade() {
                    inner.start_fetch();
                }
            });
            ctl.token = Some(token);

            self.state.send_modify(|s| {
                s.status = QueryStatus::Pending;
                s.is_fetching = false;
            });
        }
        self.start_fetch();
    }

    fn start_fetch(self: &Arc<Self>) {
        let (ticket, key, fetcher) = {
            let mut ctl = self.control();
            let seq = ctl.next_seq;
            ctl.next_seq += 1;
            ctl.in_flight += 1;
            self.state.send_modify(|s| s.is_fetching = true);
            let ticket = Ticket {
                generation: ctl.generation,
                seq,
            };
            (ticket, ctl.key.clone(), Arc::clone(&ctl.fetcher))
        };
        trace!(key = %key, seq = ticket.seq, "fetch started");

        let weak: Weak<Self> = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let outcome = AssertUnwindSafe(async { fetcher.fetch(&key).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let reason = panic_reason(payload.as_ref());
                    error!(key = %key, %reason, "fetcher panicked");
                    Err(QueryError::Internal(format!("fetcher panicked: {reason}")))
                });
            match weak.upgrade() {
                Some(inner) => inner.finish_fetch(ticket, &key, outcome),
                None => trace!(key = %key, "subscription gone before fetch resolved"),
            }
        });
    }

    fn finish_fetch(&self, ticket: Ticket, key: &QueryKey, outcome: Result<T, QueryError>) {
        let mut ctl = self.control();
        if ticket.generation != ctl.generation {
            trace!(key = %key, seq = ticket.seq, "dropping result from inactive generation");
            return;
        }

        ctl.in_flight = ctl.in_flight.saturating_sub(1);
        let fresh = ticket.seq > ctl.applied_seq;
        if fresh {
            ctl.applied_seq = ticket.seq;
        } else {
            trace!(
                key = %key,
                seq = ticket.seq,
                applied = ctl.applied_seq,
                "dropping out-of-order result"
            );
        }
        let fetching = ctl.in_flight > 0;

        if let (true, Err(err)) = (fresh, &outcome) {
            warn!(key = %key, error = %err, "fetch failed");
        }

        self.state.send_modify(|s| {
            if fresh {
                match outcome {
                    Ok(data) => {
                        s.data = Some(Arc::new(data));
                        s.error = None;
                        s.status = QueryStatus::Ready;
                    }
                    Err(err) => {
                        s.error = Some(Arc::new(err));
                        s.status = QueryStatus::Failed;
                    }
                }
            }
            s.is_fetching = fetching;
        });
    }
}
