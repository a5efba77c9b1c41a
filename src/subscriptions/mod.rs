//! Subscription to a provider's change stream.
//!
//! A provider hands out a [`ChangeStream`]; the [`SubscriptionController`]
//! pumps it on a dedicated worker and forwards each snapshot to a callback.
//!
//! Guarantees:
//! - At most one live subscription per controller
//! - Values are forwarded in emission order, without coalescing
//! - A failure is forwarded once and ends the subscription
//!
//! # Example
//!
//! ```ignore
//! let controller = SubscriptionController::new();
//! let (emitter, stream) = ChangeStream::bounded(64);
//!
//! let handle = controller.attach(
//!     stream,
//!     |state| println!("members: {}", state.len()),
//!     |err| eprintln!("stream failed: {}", err),
//! )?;
//!
//! emitter.emit(MembersState::empty())?;
//! controller.detach();
//! assert_eq!(handle.status(), SubscriptionStatus::Canceled);
//! ```

mod controller;
mod types;

pub use controller::{SubscriptionController, DEFAULT_WORKER_NAME};
pub use types::{
    ChangeEmitter, ChangeStream, StreamItem, SubscriptionHandle, SubscriptionId,
    SubscriptionStatus,
};
