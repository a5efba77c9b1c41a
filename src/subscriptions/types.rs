//! Change stream and subscription handle types.

use crate::error::{ProviderError, RelayError, Result};
use crate::types::MembersState;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

/// One item on a change stream: a snapshot, or the terminal failure.
pub type StreamItem = std::result::Result<MembersState, ProviderError>;

/// Receiving end of a provider's change stream.
///
/// The stream is possibly infinite. It ends when every emitter is dropped
/// (completion) or after a failure item.
#[derive(Debug)]
pub struct ChangeStream {
    receiver: Receiver<StreamItem>,
}

impl ChangeStream {
    /// Create a stream buffering at most `capacity` undelivered snapshots.
    /// Emitters block once the buffer is full.
    pub fn bounded(capacity: usize) -> (ChangeEmitter, ChangeStream) {
        let (sender, receiver) = bounded(capacity.max(1));
        (ChangeEmitter { sender }, ChangeStream { receiver })
    }

    /// Create a stream with an unbounded buffer.
    pub fn unbounded() -> (ChangeEmitter, ChangeStream) {
        let (sender, receiver) = unbounded();
        (ChangeEmitter { sender }, ChangeStream { receiver })
    }

    /// Wrap an existing receiver.
    pub fn from_receiver(receiver: Receiver<StreamItem>) -> Self {
        Self { receiver }
    }

    pub(crate) fn receiver(&self) -> &Receiver<StreamItem> {
        &self.receiver
    }
}

/// Sending end of a change stream, held by the provider.
#[derive(Clone, Debug)]
pub struct ChangeEmitter {
    sender: Sender<StreamItem>,
}

impl ChangeEmitter {
    /// Emit a snapshot. Fails once the subscriber is gone.
    pub fn emit(&self, state: MembersState) -> Result<()> {
        self.sender
            .send(Ok(state))
            .map_err(|_| RelayError::SubscriptionDropped)
    }

    /// Terminate the stream with a failure.
    pub fn fail(self, error: ProviderError) -> Result<()> {
        self.sender
            .send(Err(error))
            .map_err(|_| RelayError::SubscriptionDropped)
    }

    /// Finish the stream. Completion is observed once every clone is dropped.
    pub fn complete(self) {
        drop(self);
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Lifecycle of a single subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Forwarding values.
    Active,
    /// Released by detach or re-attachment.
    Canceled,
    /// The stream reported a failure.
    Failed,
    /// The provider ended the stream.
    Completed,
}

impl SubscriptionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SubscriptionStatus::Active,
            1 => SubscriptionStatus::Canceled,
            2 => SubscriptionStatus::Failed,
            _ => SubscriptionStatus::Completed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SubscriptionStatus::Active => 0,
            SubscriptionStatus::Canceled => 1,
            SubscriptionStatus::Failed => 2,
            SubscriptionStatus::Completed => 3,
        }
    }
}

/// State shared between a handle and its pump worker.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    pub(crate) id: SubscriptionId,
    status: AtomicU8,
    delivered: AtomicU64,
    /// Set by the pump before its first callback.
    worker_thread: OnceLock<ThreadId>,
}

impl SubscriptionShared {
    pub(crate) fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            status: AtomicU8::new(SubscriptionStatus::Active.as_u8()),
            delivered: AtomicU64::new(0),
            worker_thread: OnceLock::new(),
        }
    }

    pub(crate) fn enter_worker(&self) {
        let _ = self.worker_thread.set(thread::current().id());
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status() == SubscriptionStatus::Active
    }

    /// Move from `Active` to `to`. Returns false if already terminal.
    pub(crate) fn finish(&self, to: SubscriptionStatus) -> bool {
        self.status
            .compare_exchange(
                SubscriptionStatus::Active.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

struct HandleInner {
    shared: Arc<SubscriptionShared>,
    cancel_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a live (or released) subscription.
///
/// Clones share the same subscription. Dropping a handle does not cancel it;
/// the owning controller releases it on detach, re-attach or drop.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub(crate) fn new(shared: Arc<SubscriptionShared>, cancel_tx: Sender<()>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                shared,
                cancel_tx,
                worker: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn set_worker(&self, worker: JoinHandle<()>) {
        *self.inner.worker.lock() = Some(worker);
    }

    pub fn id(&self) -> SubscriptionId {
        self.inner.shared.id
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.inner.shared.status()
    }

    pub fn is_active(&self) -> bool {
        self.inner.shared.is_active()
    }

    /// Number of values forwarded so far.
    pub fn delivered(&self) -> u64 {
        self.inner.shared.delivered.load(Ordering::Relaxed)
    }

    /// Release the subscription.
    ///
    /// Once this returns no further value is forwarded, unless it is called
    /// from the subscription's own callback, in which case forwarding stops
    /// after that callback returns. Concurrent cancels on clones all wait for
    /// the worker to exit. Idempotent.
    pub fn cancel(&self) {
        self.inner.shared.finish(SubscriptionStatus::Canceled);
        let _ = self.inner.cancel_tx.try_send(());

        if self.inner.shared.on_worker_thread() {
            return;
        }

        // Held across the join so a second canceller blocks until the worker is gone.
        let mut worker = self.inner.worker.lock();
        if let Some(worker) = worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("delivered", &self.delivered())
            .finish()
    }
}
