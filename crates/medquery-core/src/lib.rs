//! Reactive query cache and invalidation engine for patient-record screens.
//!
//! Screens read server data through subscriptions keyed by structured query
//! keys. Writes invalidate key prefixes, and every matching subscription
//! refetches in the background.
//!
//! - **[`KeyRegistry`]**: shared directory mapping each [`QueryKey`] to the
//!   refresh callbacks of the subscriptions using it.
//!   [`invalidate`](KeyRegistry::invalidate) fires every callback whose key
//!   starts with a pattern. Injected, not global; clones share state.
//!
//! - **[`Subscription<T>`]**: read side. Fetches on activation, moves its
//!   registration when the key changes, refetches on invalidation, and
//!   publishes [`QueryState`] through a `tokio::sync::watch` channel.
//!   Late results for an old key or a superseded fetch are discarded.
//!
//! - **[`MutationController<I, R>`]**: write side. Runs one write, tracks a
//!   pending flag, and runs success/error callbacks.
//!   [`invalidates`](MutationController::invalidates) wires it to the
//!   registry.
//!
//! - **Resource families** ([`resource`]): `[root]`, `[root, "list", params]`
//!   and `[root, "detail", id]` keys for each patient record type.
//!
//! ```
//! use medquery_core::{KeyRegistry, query_key};
//!
//! let registry = KeyRegistry::new();
//! let token = registry.register(query_key!["allergies", "detail", "a1"], || {});
//! assert_eq!(registry.invalidate(&query_key!["allergies"]), 1);
//! assert!(registry.unregister(&token));
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod mutation;
pub mod registry;
pub mod resource;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::QueryDefaults;
pub use error::QueryError;
pub use key::{KeyPart, QueryKey};
pub use mutation::{MutationCallbacks, MutationController, Mutator};
pub use registry::{KeyRegistry, RefreshCallback, RegistrationToken};
pub use resource::{
    ListParams, ResourceKeys, ResourceKind, Sort, SortDirection, WriteOp, invalidation_patterns,
};
pub use subscription::{Fetcher, QueryState, QueryStatus, Subscription, SubscriptionStream};
