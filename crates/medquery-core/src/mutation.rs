// ── Mutation controller (write side) ──
//
// Runs a single write operation, tracks a shared pending flag, and runs
// completion callbacks: controller-level first, then the per-call ones.
// Invalidation is just a controller-level success callback; the registry
// never learns about resource types.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::registry::KeyRegistry;

// ── Mutator ─────────────────────────────────────────────────────────

/// Asynchronous write operation. Invoked exactly once per invocation.
pub trait Mutator<I, R>: Send + Sync + 'static {
    fn mutate(&self, input: I) -> BoxFuture<'static, Result<R, QueryError>>;
}

impl<I, R, F, Fut> Mutator<I, R> for F
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, QueryError>> + Send + 'static,
{
    fn mutate(&self, input: I) -> BoxFuture<'static, Result<R, QueryError>> {
        self(input).boxed()
    }
}

pub type SuccessCallback<I, R> = Arc<dyn Fn(&R, &I) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&QueryError) + Send + Sync>;

// ── Per-call callbacks ──────────────────────────────────────────────

/// Callbacks for one invocation, run after the controller-level ones.
pub struct MutationCallbacks<I, R> {
    on_success: Option<SuccessCallback<I, R>>,
    on_error: Option<ErrorCallback>,
}

impl<I, R> MutationCallbacks<I, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl Fn(&R, &I) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl<I, R> Default for MutationCallbacks<I, R> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
        }
    }
}

// ── MutationController ──────────────────────────────────────────────

/// Executes one kind of write and reports its outcome.
///
/// Cheaply cloneable; clones share the pending flag. The flag is a single
/// bool per controller, not a counter: when invocations overlap it drops
/// to `false` as soon as any one of them finishes.
pub struct MutationController<I, R> {
    mutator: Arc<dyn Mutator<I, R>>,
    on_success: Vec<SuccessCallback<I, R>>,
    on_error: Vec<ErrorCallback>,
    pending: Arc<watch::Sender<bool>>,
}

impl<I, R> MutationController<I, R>
where
    I: Clone + Send + 'static,
    R: Send + 'static,
{
    pub fn new(mutator: impl Mutator<I, R>) -> Self {
        let (pending, _) = watch::channel(false);
        Self {
            mutator: Arc::new(mutator),
            on_success: Vec::new(),
            on_error: Vec::new(),
            pending: Arc::new(pending),
        }
    }

    /// Add a controller-level success callback. Callbacks run in the order
    /// they were added.
    pub fn on_success(mut self, f: impl Fn(&R, &I) + Send + Sync + 'static) -> Self {
        self.on_success.push(Arc::new(f));
        self
    }

    /// Add a controller-level error callback.
    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error.push(Arc::new(f));
        self
    }

    /// On success, invalidate the key patterns computed from the outcome.
    ///
    /// All patterns go through one [`KeyRegistry::invalidate_all`] call, so
    /// a subscription matched by several of them refreshes once.
    pub fn invalidates<P>(self, registry: &KeyRegistry, patterns: P) -> Self
    where
        P: Fn(&R, &I) -> Vec<QueryKey> + Send + Sync + 'static,
    {
        let registry = registry.clone();
        self.on_success(move |result, input| {
            let keys = patterns(result, input);
            let refreshed = registry.invalidate_all(&keys);
            debug!(patterns = keys.len(), refreshed, "mutation invalidated queries");
        })
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.borrow()
    }

    /// Receiver for pending-flag changes.
    pub fn pending(&self) -> watch::Receiver<bool> {
        self.pending.subscribe()
    }

    /// Run the mutation and report only through callbacks.
    ///
    /// Never fails: the error goes to the `on_error` callbacks and nowhere
    /// else.
    pub async fn invoke(&self, input: I, callbacks: MutationCallbacks<I, R>) {
        // Failure has already been delivered to callbacks.
        let _ = self.run(input, &callbacks).await;
    }

    /// Fire-and-forget [`invoke`](Self::invoke) from synchronous code.
    pub fn spawn(
        &self,
        input: I,
        callbacks: MutationCallbacks<I, R>,
    ) -> Result<JoinHandle<()>, QueryError> {
        let runtime = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let this = self.clone();
        Ok(runtime.spawn(async move { this.invoke(input, callbacks).await }))
    }

    /// Run the mutation and hand the outcome back to the caller.
    ///
    /// Controller-level callbacks have already run by the time this returns.
    pub async fn invoke_and_wait(&self, input: I) -> Result<R, QueryError> {
        self.run(input, &MutationCallbacks::default()).await
    }

    async fn run(&self, input: I, per_call: &MutationCallbacks<I, R>) -> Result<R, QueryError> {
        self.pending.send_replace(true);
        let _pending = PendingGuard(&self.pending);
        let outcome = self.mutator.mutate(input.clone()).await;

        match &outcome {
            Ok(result) => {
                for cb in &self.on_success {
                    cb(result, &input);
                }
                if let Some(cb) = &per_call.on_success {
                    cb(result, &input);
                }
            }
            Err(err) => {
                warn!(error = %err, "mutation failed");
                for cb in &self.on_error {
                    cb(err);
                }
                if let Some(cb) = &per_call.on_error {
                    cb(err);
                }
            }
        }

        outcome
    }
}

/// Clears the pending flag however `run` exits, including a panicking
/// callback.
struct PendingGuard<'a>(&'a watch::Sender<bool>);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl<I, R> Clone for MutationController<I, R> {
    fn clone(&self) -> Self {
        Self {
            mutator: Arc::clone(&self.mutator),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<I, R> fmt::Debug for MutationController<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationController")
            .field("pending", &*self.pending.borrow())
            .field("on_success", &self.on_success.len())
            .field("on_error", &self.on_error.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::query_key;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn always_fails(_: String) -> impl Future<Output = Result<u32, QueryError>> {
        async { Err(QueryError::api(422, "allergen is required")) }
    }

    fn echo_len(input: String) -> impl Future<Output = Result<u32, QueryError>> {
        async move { Ok(u32::try_from(input.len()).unwrap_or(u32::MAX)) }
    }

    #[tokio::test]
    async fn success_runs_controller_then_per_call_callbacks() {
        let events = log();
        let (a, b) = (Arc::clone(&events), Arc::clone(&events));
        let controller = MutationController::new(echo_len)
            .on_success(move |r: &u32, i: &String| push(&a, format!("controller {i} {r}")));

        let callbacks =
            MutationCallbacks::new().on_success(move |r: &u32, i: &String| push(&b, format!("call {i} {r}")));
        controller.invoke("peanut".into(), callbacks).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["controller peanut 6".to_owned(), "call peanut 6".to_owned()]
        );
        assert!(!controller.is_pending());
    }

    #[tokio::test]
    async fn invoke_swallows_failure_but_reports_it() {
        let events = log();
        let (a, b) = (Arc::clone(&events), Arc::clone(&events));
        let controller = MutationController::new(always_fails)
            .on_error(move |e| push(&a, format!("controller {}", e.status().unwrap())));

        let callbacks = MutationCallbacks::new().on_error(move |_| push(&b, "call"));
        controller.invoke("x".into(), callbacks).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec!["controller 422".to_owned(), "call".to_owned()]
        );
        assert!(!controller.is_pending());
    }

    #[tokio::test]
    async fn invoke_and_wait_propagates_failure_after_controller_callback() {
        let events = log();
        let a = Arc::clone(&events);
        let controller =
            MutationController::new(always_fails).on_error(move |_| push(&a, "controller"));

        let err = controller.invoke_and_wait("x".into()).await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(*events.lock().unwrap(), vec!["controller".to_owned()]);
    }

    #[tokio::test]
    async fn invoke_and_wait_returns_result() {
        let controller = MutationController::new(echo_len);
        assert_eq!(controller.invoke_and_wait("abc".into()).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_flag_tracks_invocation() {
        let controller = MutationController::new(|input: u64| async move {
            tokio::time::sleep(Duration::from_millis(input)).await;
            Ok::<_, QueryError>(input)
        });
        assert!(!controller.is_pending());

        let handle = controller.spawn(50, MutationCallbacks::new()).unwrap();
        tokio::task::yield_now().await;
        assert!(controller.is_pending());

        handle.await.unwrap();
        assert!(!controller.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_invocations_share_one_flag() {
        let controller = MutationController::new(|input: u64| async move {
            tokio::time::sleep(Duration::from_millis(input)).await;
            Ok::<_, QueryError>(input)
        });

        let fast = controller.spawn(10, MutationCallbacks::new()).unwrap();
        let slow = controller.spawn(100, MutationCallbacks::new()).unwrap();
        fast.await.unwrap();
        // The slow write is still outstanding, yet the flag already dropped.
        assert!(!controller.is_pending());
        slow.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_callback_still_clears_pending() {
        let controller = MutationController::new(echo_len)
            .on_success(|_: &u32, _: &String| panic!("toast renderer crashed"));

        let handle = controller
            .spawn("abc".into(), MutationCallbacks::new())
            .unwrap();
        assert!(handle.await.unwrap_err().is_panic());
        assert!(!controller.is_pending());
    }

    #[tokio::test]
    async fn invalidates_refreshes_matching_registrations() {
        let registry = KeyRegistry::new();
        let hits = log();
        let h = Arc::clone(&hits);
        registry.register(query_key!["allergies", "detail", "a2"], move || {
            push(&h, "detail");
        });

        let controller = MutationController::new(|id: String| async move {
            Ok::<_, QueryError>(id)
        })
        .invalidates(&registry, |_, id: &String| {
            vec![
                query_key!["allergies"],
                query_key!["allergies", "detail", id.as_str()],
            ]
        });

        controller.invoke_and_wait("a2".into()).await.unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["detail".to_owned()]);
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let controller = MutationController::new(echo_len);
        assert!(matches!(
            controller.spawn("x".into(), MutationCallbacks::new()),
            Err(QueryError::NoRuntime)
        ));
    }
}
