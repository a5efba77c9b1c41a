//! # Member Relay
//!
//! Middleware between an application's action pipeline and a member
//! directory provider.
//!
//! ## Core Concepts
//!
//! - **Registration**: requested member keys are diffed against the keys
//!   already registered, and only the delta reaches the provider
//! - **Relay**: one long-lived subscription to the provider's change stream,
//!   each snapshot dispatched back as a `StateChanged` action in order
//! - **Policies**: delta-based or full-replace registration, chosen by config
//!
//! ## Example
//!
//! ```ignore
//! use member_relay::{member_ids, Context, MembersAction, MembersMiddleware};
//!
//! let middleware = MembersMiddleware::new(provider);
//! middleware.receive_context(Context::with_output(move |action: MembersAction| {
//!     store.dispatch(action);
//! }))?;
//!
//! // Opens listeners for a, b, c
//! middleware.handle(MembersAction::Register(member_ids(["a", "b", "c"])));
//! // Closes a, opens d
//! middleware.handle(MembersAction::Register(member_ids(["b", "c", "d"])));
//! ```

pub mod codec;
pub mod diagnostics;
pub mod error;
pub mod middleware;
pub mod reconcile;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use codec::{decode_state, encode_state, Encoding};
pub use diagnostics::{DiagnosticEvent, Diagnostics, MemoryDiagnostics, TracingDiagnostics};
pub use error::{ProviderError, RelayError, Result};
pub use middleware::{
    ActionSink, Context, Lifecycle, MembersMiddleware, MembersProvider, MiddlewareConfig,
    StateReader,
};
pub use reconcile::{
    apply, diff, edit_distance, reconcile, Change, DeltaBased, FullReplace, Reconciliation,
    Registration, RegistrationDelta, RegistrationMode, RegistrationPolicy,
};
pub use subscriptions::{
    ChangeEmitter, ChangeStream, StreamItem, SubscriptionController, SubscriptionHandle,
    SubscriptionId, SubscriptionStatus,
};
pub use types::*;
