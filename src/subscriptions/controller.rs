//! Single-subscription controller for a provider change stream.

use crate::error::{ProviderError, RelayError, Result};
use crate::types::MembersState;
use crossbeam_channel::{bounded, select, Receiver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use super::types::{
    ChangeStream, SubscriptionHandle, SubscriptionId, SubscriptionShared, SubscriptionStatus,
};

/// Default name prefix for pump worker threads.
pub const DEFAULT_WORKER_NAME: &str = "member-relay";

/// Owns at most one subscription to a change stream at any time.
///
/// Each subscription runs a pump worker that forwards values in the order the
/// stream yields them. No lock is held while a worker is joined, so callbacks
/// may query the controller while it is detaching or re-attaching.
pub struct SubscriptionController {
    /// The live (or most recently released) subscription.
    current: Mutex<Option<SubscriptionHandle>>,
    /// Serializes attaches.
    attaching: Mutex<()>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Thread name prefix for pump workers.
    worker_name: String,
}

impl SubscriptionController {
    /// Create a controller with the default worker name.
    pub fn new() -> Self {
        Self::with_worker_name(DEFAULT_WORKER_NAME)
    }

    /// Create a controller naming its workers `{name}-{id}`.
    pub fn with_worker_name(name: impl Into<String>) -> Self {
        Self {
            current: Mutex::new(None),
            attaching: Mutex::new(()),
            next_id: AtomicU64::new(1),
            worker_name: name.into(),
        }
    }

    /// Subscribe to `stream`, releasing any previous subscription first.
    ///
    /// `on_value` receives every snapshot in emission order. `on_failure` is
    /// called at most once, after which nothing more is forwarded. Completion
    /// of the stream calls neither.
    pub fn attach<V, F>(
        &self,
        stream: ChangeStream,
        mut on_value: V,
        on_failure: F,
    ) -> Result<SubscriptionHandle>
    where
        V: FnMut(MembersState) + Send + 'static,
        F: FnOnce(ProviderError) + Send + 'static,
    {
        self.attach_keyed(
            stream,
            move |_, state| on_value(state),
            move |_, error| on_failure(error),
        )
    }

    /// Like [`attach`](Self::attach), with the subscription id passed to
    /// both callbacks.
    pub fn attach_keyed<V, F>(
        &self,
        stream: ChangeStream,
        on_value: V,
        on_failure: F,
    ) -> Result<SubscriptionHandle>
    where
        V: FnMut(SubscriptionId, MembersState) + Send + 'static,
        F: FnOnce(SubscriptionId, ProviderError) + Send + 'static,
    {
        let _attaching = self.attaching.lock();

        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.cancel();
            tracing::debug!(subscription = previous.id().0, "released previous subscription");
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let shared = Arc::new(SubscriptionShared::new(id));
        let (cancel_tx, cancel_rx) = bounded(1);
        let handle = SubscriptionHandle::new(Arc::clone(&shared), cancel_tx);

        let worker = thread::Builder::new()
            .name(format!("{}-{}", self.worker_name, id.0))
            .spawn(move || pump(shared, stream, cancel_rx, on_value, on_failure))
            .map_err(|e| RelayError::WorkerSpawn(e.to_string()))?;
        handle.set_worker(worker);

        tracing::debug!(subscription = id.0, "attached change stream");
        *self.current.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Release the live subscription, if any. Idempotent.
    ///
    /// Returns the id of the subscription that was released.
    pub fn detach(&self) -> Option<SubscriptionId> {
        let previous = self.current.lock().take()?;
        let was_active = previous.is_active();
        previous.cancel();
        if was_active {
            tracing::debug!(subscription = previous.id().0, "detached change stream");
            Some(previous.id())
        } else {
            None
        }
    }

    /// The current subscription handle, live or not.
    pub fn current(&self) -> Option<SubscriptionHandle> {
        self.current.lock().clone()
    }

    /// Whether a subscription is currently forwarding.
    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map_or(false, SubscriptionHandle::is_active)
    }
}

impl Default for SubscriptionController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionController {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Worker loop: forward stream items until failure, completion or cancel.
fn pump<V, F>(
    shared: Arc<SubscriptionShared>,
    stream: ChangeStream,
    cancel_rx: Receiver<()>,
    mut on_value: V,
    on_failure: F,
) where
    V: FnMut(SubscriptionId, MembersState),
    F: FnOnce(SubscriptionId, ProviderError),
{
    shared.enter_worker();
    let id = shared.id;
    let receiver = stream.receiver();
    loop {
        select! {
            recv(receiver) -> item => match item {
                Ok(Ok(state)) => {
                    if !shared.is_active() {
                        break;
                    }
                    on_value(id, state);
                    shared.record_delivery();
                }
                Ok(Err(error)) => {
                    if shared.finish(SubscriptionStatus::Failed) {
                        on_failure(id, error);
                    }
                    break;
                }
                Err(_) => {
                    shared.finish(SubscriptionStatus::Completed);
                    break;
                }
            },
            recv(cancel_rx) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemberId, MemberSnapshot};
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn state_with(key: &str) -> MembersState {
        let member = MemberSnapshot::new(format!("{}@example.com", key), key, "Tester");
        vec![(MemberId::from(key), member)].into_iter().collect()
    }

    #[test]
    fn test_forwards_in_order() {
        let controller = SubscriptionController::new();
        let (emitter, stream) = ChangeStream::unbounded();
        let (tx, rx) = unbounded();

        controller
            .attach(stream, move |state| tx.send(state).unwrap(), |_| {})
            .unwrap();

        for key in ["a", "b", "c"] {
            emitter.emit(state_with(key)).unwrap();
        }

        for key in ["a", "b", "c"] {
            let state = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert!(state.get(key).is_some());
        }
    }

    #[test]
    fn test_failure_forwarded_once_and_stops() {
        let controller = SubscriptionController::new();
        let (emitter, stream) = ChangeStream::unbounded();
        let (value_tx, value_rx) = unbounded();
        let (fail_tx, fail_rx) = unbounded();

        let handle = controller
            .attach(
                stream,
                move |state| value_tx.send(state).unwrap(),
                move |err| fail_tx.send(err).unwrap(),
            )
            .unwrap();

        emitter.emit(state_with("a")).unwrap();
        emitter
            .clone()
            .fail(ProviderError::Decoding("bad payload".into()))
            .unwrap();
        let _ = emitter.emit(state_with("b"));

        assert!(value_rx.recv_timeout(Duration::from_secs(1)).is_ok());
        let err = fail_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(err, ProviderError::Decoding("bad payload".into()));

        assert!(value_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(fail_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(handle.status(), SubscriptionStatus::Failed);
        assert!(!controller.is_active());
    }

    #[test]
    fn test_reattach_cancels_previous() {
        let controller = SubscriptionController::new();
        let (first_emitter, first_stream) = ChangeStream::unbounded();
        let (second_emitter, second_stream) = ChangeStream::unbounded();
        let (tx, rx) = unbounded();

        let first_tx = tx.clone();
        let first = controller
            .attach(first_stream, move |s| first_tx.send((1, s)).unwrap(), |_| {})
            .unwrap();
        let second = controller
            .attach(second_stream, move |s| tx.send((2, s)).unwrap(), |_| {})
            .unwrap();

        assert_eq!(first.status(), SubscriptionStatus::Canceled);
        assert!(second.is_active());
        assert_ne!(first.id(), second.id());

        // The first stream's worker is gone, so its receiver was dropped.
        assert!(first_emitter.emit(state_with("late")).is_err());

        second_emitter.emit(state_with("b")).unwrap();
        let (source, _) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(source, 2);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let controller = SubscriptionController::new();
        assert_eq!(controller.detach(), None);

        let (_emitter, stream) = ChangeStream::unbounded();
        let handle = controller.attach(stream, |_| {}, |_| {}).unwrap();

        assert_eq!(controller.detach(), Some(handle.id()));
        assert_eq!(controller.detach(), None);
        assert_eq!(handle.status(), SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_completion_is_silent() {
        let controller = SubscriptionController::new();
        let (emitter, stream) = ChangeStream::unbounded();
        let (fail_tx, fail_rx) = unbounded();

        let handle = controller
            .attach(stream, |_| {}, move |err| fail_tx.send(err).unwrap())
            .unwrap();
        emitter.complete();

        assert!(fail_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(handle.status(), SubscriptionStatus::Completed);
    }

    #[test]
    fn test_cancel_from_callback_does_not_deadlock() {
        let controller = SubscriptionController::new();
        let (emitter, stream) = ChangeStream::unbounded();
        let (tx, rx) = unbounded();

        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let callback_slot = Arc::clone(&slot);

        let handle = controller
            .attach(
                stream,
                move |state| {
                    if let Some(handle) = callback_slot.lock().as_ref() {
                        handle.cancel();
                    }
                    tx.send(state).unwrap();
                },
                |_| {},
            )
            .unwrap();
        *slot.lock() = Some(handle.clone());

        emitter.emit(state_with("a")).unwrap();
        let _ = emitter.emit(state_with("b"));

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(handle.status(), SubscriptionStatus::Canceled);
    }

    #[test]
    fn test_concurrent_cancels_wait_for_worker() {
        let controller = SubscriptionController::new();
        let (emitter, stream) = ChangeStream::unbounded();
        let (entered_tx, entered_rx) = unbounded();
        let finished = Arc::new(AtomicBool::new(false));
        let callback_finished = Arc::clone(&finished);

        let handle = controller
            .attach(
                stream,
                move |_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(300));
                    callback_finished.store(true, Ordering::SeqCst);
                },
                |_| {},
            )
            .unwrap();

        emitter.emit(state_with("a")).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let clone = handle.clone();
        let other = thread::spawn(move || clone.cancel());
        thread::sleep(Duration::from_millis(50));

        controller.detach();
        assert!(finished.load(Ordering::SeqCst));
        other.join().unwrap();
    }

    #[test]
    fn test_self_cancel_while_another_thread_joins() {
        let controller = SubscriptionController::new();
        let (emitter, stream) = ChangeStream::unbounded();
        let (entered_tx, entered_rx) = unbounded();

        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let callback_slot = Arc::clone(&slot);

        let handle = controller
            .attach(
                stream,
                move |_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                    let own = callback_slot.lock().clone();
                    if let Some(own) = own {
                        own.cancel();
                    }
                },
                |_| {},
            )
            .unwrap();
        *slot.lock() = Some(handle.clone());

        emitter.emit(state_with("a")).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let (done_tx, done_rx) = unbounded();
        thread::spawn(move || {
            handle.cancel();
            done_tx.send(()).unwrap();
        });

        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(!controller.is_active());
    }

    #[test]
    fn test_callback_queries_controller_during_reattach() {
        let controller = Arc::new(SubscriptionController::new());
        let (emitter, stream) = ChangeStream::unbounded();
        let (entered_tx, entered_rx) = unbounded();
        let (seen_tx, seen_rx) = unbounded();
        let observer = Arc::downgrade(&controller);

        controller
            .attach(
                stream,
                move |_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                    if let Some(controller) = observer.upgrade() {
                        seen_tx.send(controller.current().map(|h| h.id())).unwrap();
                    }
                },
                |_| {},
            )
            .unwrap();

        emitter.emit(state_with("a")).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let (done_tx, done_rx) = unbounded();
        let reattaching = Arc::clone(&controller);
        thread::spawn(move || {
            let (_emitter, stream) = ChangeStream::unbounded();
            let handle = reattaching.attach(stream, |_| {}, |_| {}).unwrap();
            done_tx.send(handle.id()).unwrap();
        });

        let second = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(seen_rx.try_recv().is_ok());
        assert_eq!(controller.current().map(|h| h.id()), Some(second));
    }
}
