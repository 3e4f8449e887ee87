//! Queue ends for connection-oriented data
//!
//! The ACL and ISO paths each expose one [`DataQueueEnd`] to the layer above. Outbound flow is
//! pulled, not pushed: a client that has a packet ready registers a one-shot supplier, and the
//! engine consumes the registration when it is ready to take the packet. At most one supplier can
//! be registered at a time, which caps the client at a single outstanding outbound packet per
//! queue. Inbound packets are buffered here and drained by the client's dequeue handler; packets
//! that arrive while no handler is registered are kept and replayed once one is.
//!
//! Registration slots are guarded by assertions. Registering over a live registration is a bug in
//! the layer above, not a runtime condition to recover from.

use crate::engine::EngineMessage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::WeakUnboundedSender;

/// Which of the two data paths a queue end belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Acl,
    Iso,
}

type Supplier<B> = Box<dyn FnOnce() -> B + Send>;
type DequeueHandler = Box<dyn FnMut() + Send>;

struct QueueState<B, V> {
    supplier: Option<Supplier<B>>,
    dequeue: Option<DequeueHandler>,
    /// Bumped on unregister so a handler taken out for invocation is not restored stale
    dequeue_generation: u64,
    inbound: VecDeque<V>,
}

/// One end of a bidirectional data queue
///
/// Handles are cheap to clone and share the queue they were created from. A queue end does not
/// keep the engine alive by itself; once the engine is gone its registrations go nowhere.
pub struct DataQueueEnd<B, V> {
    state: Arc<Mutex<QueueState<B, V>>>,
    kind: QueueKind,
    tx: WeakUnboundedSender<EngineMessage>,
}

impl<B, V> Clone for DataQueueEnd<B, V> {
    fn clone(&self) -> Self {
        DataQueueEnd {
            state: self.state.clone(),
            kind: self.kind,
            tx: self.tx.clone(),
        }
    }
}

impl<B, V> DataQueueEnd<B, V> {
    pub(crate) fn new(kind: QueueKind, tx: WeakUnboundedSender<EngineMessage>) -> DataQueueEnd<B, V> {
        DataQueueEnd {
            state: Arc::new(Mutex::new(QueueState {
                supplier: None,
                dequeue: None,
                dequeue_generation: 0,
                inbound: VecDeque::new(),
            })),
            kind,
            tx,
        }
    }

    /// Offer one outbound packet
    ///
    /// The supplier is invoked at most once, when the engine pulls the packet, and the
    /// registration is consumed by that pull. Offer the next packet by registering again.
    ///
    /// # Panics
    /// Panics if a supplier is already registered.
    pub fn register_enqueue(&self, supplier: impl FnOnce() -> B + Send + 'static) {
        let mut state = self.state.lock().unwrap();

        assert!(
            state.supplier.is_none(),
            "an outbound packet supplier is already registered on the {:?} queue",
            self.kind,
        );

        state.supplier = Some(Box::new(supplier));

        drop(state);

        self.post(EngineMessage::PumpOutbound(self.kind));
    }

    /// Withdraw an offered packet
    ///
    /// A no-op when there is nothing to withdraw, which includes the supplier having already been
    /// consumed by the engine.
    pub fn unregister_enqueue(&self) {
        self.state.lock().unwrap().supplier = None;
    }

    /// Register the handler notified for inbound packets
    ///
    /// The handler is called once per inbound packet, including once per packet already buffered,
    /// and is expected to collect it with [`try_dequeue`](Self::try_dequeue).
    ///
    /// # Panics
    /// Panics if a dequeue handler is already registered.
    pub fn register_dequeue(&self, handler: impl FnMut() + Send + 'static) {
        let mut state = self.state.lock().unwrap();

        assert!(
            state.dequeue.is_none(),
            "a dequeue handler is already registered on the {:?} queue",
            self.kind,
        );

        state.dequeue = Some(Box::new(handler));

        drop(state);

        self.post(EngineMessage::PumpInbound(self.kind));
    }

    fn post(&self, message: EngineMessage) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(message);
        }
    }

    pub fn unregister_dequeue(&self) {
        let mut state = self.state.lock().unwrap();

        state.dequeue = None;
        state.dequeue_generation += 1;
    }

    /// Take the oldest buffered inbound packet
    pub fn try_dequeue(&self) -> Option<V> {
        self.state.lock().unwrap().inbound.pop_front()
    }

    /// Consume the outbound registration, if any
    pub(crate) fn take_supplier(&self) -> Option<Supplier<B>> {
        self.state.lock().unwrap().supplier.take()
    }

    /// Buffer an inbound packet
    pub(crate) fn push_inbound(&self, view: V) {
        self.state.lock().unwrap().inbound.push_back(view);
    }

    pub(crate) fn backlog(&self) -> usize {
        self.state.lock().unwrap().inbound.len()
    }

    /// Invoke the dequeue handler once, if one is registered
    ///
    /// The handler is taken out of its slot for the call so it can re-enter the queue end (every
    /// handler calls [`try_dequeue`](Self::try_dequeue), some unregister themselves). It is only
    /// put back if the registration was not disturbed during the call.
    pub(crate) fn notify_dequeue(&self) {
        let (mut handler, generation) = {
            let mut state = self.state.lock().unwrap();

            match state.dequeue.take() {
                Some(handler) => (handler, state.dequeue_generation),
                None => return,
            }
        };

        handler();

        let mut state = self.state.lock().unwrap();

        if state.dequeue_generation == generation && state.dequeue.is_none() {
            state.dequeue = Some(handler);
        }
    }

    /// Drop both registrations and the inbound backlog, part of engine shutdown
    pub(crate) fn reset_registrations(&self) {
        let mut state = self.state.lock().unwrap();

        state.supplier = None;
        state.dequeue = None;
        state.dequeue_generation += 1;
        state.inbound.clear();
    }
}
