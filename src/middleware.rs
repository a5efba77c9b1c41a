//! Members middleware tying registration and relay together.

use crate::diagnostics::{DiagnosticEvent, Diagnostics, TracingDiagnostics};
use crate::error::{RelayError, Result};
use crate::reconcile::{Registration, RegistrationMode, RegistrationPolicy};
use crate::subscriptions::{
    ChangeStream, SubscriptionController, SubscriptionHandle, DEFAULT_WORKER_NAME,
};
use crate::types::{MemberId, MembersAction, MembersState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Middleware configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// How registration requests reach the provider.
    pub registration_mode: RegistrationMode,

    /// Thread name prefix for relay workers.
    pub worker_name: String,

    /// Forward empty deltas to the provider.
    /// Default: true
    pub forward_empty_deltas: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            registration_mode: RegistrationMode::DeltaBased,
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            forward_empty_deltas: true,
        }
    }
}

impl MiddlewareConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RelayError::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_name.is_empty() {
            return Err(RelayError::InvalidConfig(
                "worker_name must not be empty".to_string(),
            ));
        }
        if self.worker_name.contains('\0') {
            return Err(RelayError::InvalidConfig(
                "worker_name must not contain NUL".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where outbound actions go.
pub trait ActionSink: Send + Sync {
    fn dispatch(&self, action: MembersAction);
}

impl<F> ActionSink for F
where
    F: Fn(MembersAction) + Send + Sync,
{
    fn dispatch(&self, action: MembersAction) {
        self(action)
    }
}

/// Read access to the externally held members state.
pub trait StateReader: Send + Sync {
    fn state(&self) -> Option<MembersState>;
}

impl<F> StateReader for F
where
    F: Fn() -> Option<MembersState> + Send + Sync,
{
    fn state(&self) -> Option<MembersState> {
        self()
    }
}

/// The external member directory.
pub trait MembersProvider: Send + Sync {
    /// Open/close listeners. Must not block on provider I/O.
    fn register(&self, registration: Registration);

    /// A fresh subscription to the provider's state changes.
    fn change_stream(&self) -> ChangeStream;
}

/// Application context handed to the middleware on attachment.
#[derive(Clone)]
pub struct Context {
    state: Arc<dyn StateReader>,
    output: Arc<dyn ActionSink>,
}

impl Context {
    pub fn new(state: impl StateReader + 'static, output: impl ActionSink + 'static) -> Self {
        Self {
            state: Arc::new(state),
            output: Arc::new(output),
        }
    }

    pub fn from_shared(state: Arc<dyn StateReader>, output: Arc<dyn ActionSink>) -> Self {
        Self { state, output }
    }

    /// A context with no external state, dispatching into `output`.
    pub fn with_output(output: impl ActionSink + 'static) -> Self {
        Self::new(|| -> Option<MembersState> { None }, output)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

/// Whether the relay path has a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Unattached,
    Attached,
}

/// Registers member keys with a provider and relays its state changes.
///
/// Two independent paths share one instance:
/// - Registration: inbound `Register` actions are reconciled against the
///   registered keys and handed to the provider.
/// - Relay: once a context is received, every snapshot from the provider's
///   change stream is dispatched as a `StateChanged` action.
pub struct MembersMiddleware {
    /// Middleware configuration.
    config: MiddlewareConfig,

    provider: Arc<dyn MembersProvider>,

    diagnostics: Arc<dyn Diagnostics>,

    /// Registration policy (and its key buffer). Held across the provider
    /// call so registrations reach the provider in order.
    policy: Mutex<Box<dyn RegistrationPolicy>>,

    /// Context from the last attachment.
    context: Mutex<Option<Context>>,

    /// Serializes attach and teardown. Never taken by the relay callbacks.
    transition: Mutex<()>,

    /// The relay subscription.
    relay: SubscriptionController,
}

impl MembersMiddleware {
    /// Create a middleware with default configuration.
    pub fn new(provider: Arc<dyn MembersProvider>) -> Self {
        Self::build(provider, MiddlewareConfig::default())
    }

    /// Create a middleware with a validated configuration.
    pub fn with_config(provider: Arc<dyn MembersProvider>, config: MiddlewareConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(provider, config))
    }

    fn build(provider: Arc<dyn MembersProvider>, config: MiddlewareConfig) -> Self {
        Self {
            policy: Mutex::new(config.registration_mode.policy()),
            relay: SubscriptionController::with_worker_name(config.worker_name.clone()),
            context: Mutex::new(None),
            transition: Mutex::new(()),
            diagnostics: Arc::new(TracingDiagnostics),
            provider,
            config,
        }
    }

    /// Replace the diagnostics sink.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    // --- Relay Path ---

    /// Attach to the application context and start relaying state changes.
    ///
    /// A second call releases the previous subscription before subscribing
    /// again, so there is never more than one relay stream. The sink may read
    /// the middleware while the previous subscription is being released.
    pub fn receive_context(&self, context: Context) -> Result<SubscriptionHandle> {
        let _transition = self.transition.lock();

        if let Some(previous) = self.relay.detach() {
            self.diagnostics
                .record(DiagnosticEvent::SubscriptionReleased { subscription: previous });
        }

        let output = Arc::clone(&context.output);
        let relay_diagnostics = Arc::clone(&self.diagnostics);
        let failure_diagnostics = Arc::clone(&self.diagnostics);

        let handle = self.relay.attach_keyed(
            self.provider.change_stream(),
            move |subscription, state: MembersState| {
                let members = state.len();
                output.dispatch(MembersAction::StateChanged(state));
                relay_diagnostics.record(DiagnosticEvent::SnapshotRelayed {
                    subscription,
                    members,
                });
            },
            move |subscription, error| {
                failure_diagnostics.record(DiagnosticEvent::StreamFailed {
                    subscription,
                    error,
                });
            },
        )?;

        *self.context.lock() = Some(context);
        self.diagnostics.record(DiagnosticEvent::ContextReceived {
            subscription: handle.id(),
        });
        Ok(handle)
    }

    /// Release the relay subscription and drop the context.
    ///
    /// No state change is dispatched after this returns. Registered keys are
    /// kept since the provider's listeners stay open.
    pub fn teardown(&self) {
        let _transition = self.transition.lock();
        if let Some(subscription) = self.relay.detach() {
            self.diagnostics
                .record(DiagnosticEvent::SubscriptionReleased { subscription });
        }
        let previous = self.context.lock().take();
        if previous.is_some() {
            self.diagnostics.record(DiagnosticEvent::TornDown);
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.context.lock().is_some() {
            Lifecycle::Attached
        } else {
            Lifecycle::Unattached
        }
    }

    /// The current relay subscription, live or not.
    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        self.relay.current()
    }

    /// Whether snapshots are currently being relayed.
    pub fn is_relaying(&self) -> bool {
        self.relay.is_active()
    }

    /// The application's current members state, read through the context.
    pub fn current_state(&self) -> Option<MembersState> {
        let reader = self
            .context
            .lock()
            .as_ref()
            .map(|context| Arc::clone(&context.state));
        reader.and_then(|reader| reader.state())
    }

    // --- Registration Path ---

    /// Handle an inbound action. Only `Register` is acted on.
    pub fn handle(&self, action: MembersAction) {
        match action {
            MembersAction::Register(ids) => self.register(ids),
            MembersAction::StateChanged(_) => {
                self.diagnostics.record(DiagnosticEvent::ActionIgnored {
                    action: "state_changed",
                });
            }
        }
    }

    /// Register interest in exactly `ids`.
    ///
    /// The provider call is fire-and-forget; the registered keys are updated
    /// regardless of what the provider does with it.
    pub fn register(&self, ids: Vec<MemberId>) {
        let requested = ids.len();
        let mut policy = self.policy.lock();
        let registration = policy.prepare(ids);

        if registration.is_noop() && !self.config.forward_empty_deltas {
            self.diagnostics
                .record(DiagnosticEvent::RegistrationSkipped { requested });
            return;
        }

        let (inserted, removed) = match &registration {
            Registration::Delta(delta) => (delta.insertions().count(), delta.removals().count()),
            Registration::Full(ids) => (ids.len(), 0),
        };
        self.diagnostics.record(DiagnosticEvent::Registered {
            mode: policy.mode(),
            requested,
            inserted,
            removed,
        });

        self.provider.register(registration);
    }

    /// Keys currently registered, or `None` under `FullReplace`.
    pub fn registered_ids(&self) -> Option<Vec<MemberId>> {
        self.policy.lock().registered().map(<[MemberId]>::to_vec)
    }
}
