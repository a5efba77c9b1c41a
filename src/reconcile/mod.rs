//! Registration reconciliation.
//!
//! Pure diffing of registered member keys plus the policies deciding what the
//! provider is told on each registration request.

mod diff;
mod policy;

pub use diff::{apply, diff, edit_distance, reconcile, Change, Reconciliation, RegistrationDelta};
pub use policy::{DeltaBased, FullReplace, Registration, RegistrationMode, RegistrationPolicy};
