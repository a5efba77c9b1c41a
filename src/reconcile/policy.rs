//! Registration policies: how a requested key list reaches the provider.

use super::diff::{reconcile, RegistrationDelta};
use crate::types::MemberId;
use serde::{Deserialize, Serialize};

/// What the provider is asked to do for one registration request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// Open/close listeners for the changed keys only.
    Delta(RegistrationDelta),
    /// Replace the provider's registrations with this full list.
    Full(Vec<MemberId>),
}

impl Registration {
    /// True when the provider has nothing to change.
    pub fn is_noop(&self) -> bool {
        match self {
            Registration::Delta(delta) => delta.is_empty(),
            Registration::Full(_) => false,
        }
    }
}

/// Which registration policy the middleware uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    /// Diff against the previously registered keys and send only the delta.
    #[default]
    DeltaBased,
    /// Send the full requested list every time and keep no buffer.
    FullReplace,
}

impl RegistrationMode {
    /// Instantiate the policy for this mode.
    pub fn policy(self) -> Box<dyn RegistrationPolicy> {
        match self {
            RegistrationMode::DeltaBased => Box::new(DeltaBased::new()),
            RegistrationMode::FullReplace => Box::new(FullReplace),
        }
    }
}

/// Turns a requested key list into a provider registration.
pub trait RegistrationPolicy: Send {
    fn mode(&self) -> RegistrationMode;

    /// Compute the registration for `requested` and fold it into any buffered
    /// state.
    fn prepare(&mut self, requested: Vec<MemberId>) -> Registration;

    /// Currently registered keys, if this policy tracks them.
    fn registered(&self) -> Option<&[MemberId]>;
}

/// Keeps the registered buffer and emits minimal deltas.
#[derive(Clone, Debug, Default)]
pub struct DeltaBased {
    buffer: Vec<MemberId>,
}

impl DeltaBased {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistrationPolicy for DeltaBased {
    fn mode(&self) -> RegistrationMode {
        RegistrationMode::DeltaBased
    }

    fn prepare(&mut self, requested: Vec<MemberId>) -> Registration {
        let result = reconcile(&self.buffer, &requested);
        if !result.delta.is_empty() {
            self.buffer = result.next;
        }
        Registration::Delta(result.delta)
    }

    fn registered(&self) -> Option<&[MemberId]> {
        Some(&self.buffer)
    }
}

/// Stateless: forwards the full list each time.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullReplace;

impl RegistrationPolicy for FullReplace {
    fn mode(&self) -> RegistrationMode {
        RegistrationMode::FullReplace
    }

    fn prepare(&mut self, requested: Vec<MemberId>) -> Registration {
        Registration::Full(requested)
    }

    fn registered(&self) -> Option<&[MemberId]> {
        None
    }
}
