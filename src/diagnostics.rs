//! Diagnostics sink injected into the middleware.

use crate::error::ProviderError;
use crate::reconcile::RegistrationMode;
use crate::subscriptions::SubscriptionId;
use parking_lot::Mutex;

/// Something worth observing happened inside the middleware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// A context arrived and a relay subscription was established.
    ContextReceived { subscription: SubscriptionId },
    /// A registration request was handed to the provider.
    Registered {
        mode: RegistrationMode,
        requested: usize,
        inserted: usize,
        removed: usize,
    },
    /// An empty delta was not forwarded.
    RegistrationSkipped { requested: usize },
    /// An inbound action the middleware does not handle.
    ActionIgnored { action: &'static str },
    /// A snapshot was dispatched as a `StateChanged` action.
    SnapshotRelayed {
        subscription: SubscriptionId,
        members: usize,
    },
    /// The change stream failed; relay has stopped.
    StreamFailed {
        subscription: SubscriptionId,
        error: ProviderError,
    },
    /// A live subscription was released.
    SubscriptionReleased { subscription: SubscriptionId },
    /// The middleware returned to the unattached state.
    TornDown,
}

/// Receives diagnostic events.
pub trait Diagnostics: Send + Sync {
    fn record(&self, event: DiagnosticEvent);
}

/// Emits every event through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::ContextReceived { subscription } => {
                tracing::debug!(subscription = subscription.0, "receiving context");
            }
            DiagnosticEvent::Registered {
                mode,
                requested,
                inserted,
                removed,
            } => {
                tracing::debug!(?mode, requested, inserted, removed, "registering members");
            }
            DiagnosticEvent::RegistrationSkipped { requested } => {
                tracing::trace!(requested, "registration unchanged");
            }
            DiagnosticEvent::ActionIgnored { action } => {
                tracing::debug!(action, "not handling action");
            }
            DiagnosticEvent::SnapshotRelayed {
                subscription,
                members,
            } => {
                tracing::trace!(subscription = subscription.0, members, "state change relayed");
            }
            DiagnosticEvent::StreamFailed {
                subscription,
                error,
            } => {
                tracing::warn!(subscription = subscription.0, %error, "state change stream failed");
            }
            DiagnosticEvent::SubscriptionReleased { subscription } => {
                tracing::debug!(subscription = subscription.0, "subscription released");
            }
            DiagnosticEvent::TornDown => {
                tracing::debug!("middleware torn down");
            }
        }
    }
}

/// Keeps events in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().clone()
    }

    /// Count events matching a predicate.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&DiagnosticEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(*e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn record(&self, event: DiagnosticEvent) {
        self.events.lock().push(event);
    }
}
