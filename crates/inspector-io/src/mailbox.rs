//! The cross-thread message mailbox.
//!
//! Two FIFO queues live under a single mutex: `incoming` carries
//! frontend-originated work toward the runtime thread, `outgoing` carries
//! runtime-originated work toward the I/O thread. Each push records whether
//! the queue was empty beforehand; that flag is the sole wakeup trigger for
//! the peer thread. Consumers never pop under the lock: they swap the whole
//! queue into a thread-local buffer and drain it lock-free, so the lock hold
//! time stays O(1) regardless of backlog.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// Session identifier assigned by the transport. Monotonic within a bridge
/// lifetime; 0 is used for actions that address no particular session.
pub type SessionId = i32;

/// Actions drained on the runtime thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorAction {
    /// A frontend connected; attach a session and answer with `AcceptSession`.
    StartSession,
    /// A frontend connected and the server already accepted it out-of-band
    /// (wait-for-connect mode); attach without answering.
    StartSessionUnconditionally,
    /// Deliver a protocol message to the session.
    SendMessage,
    /// The frontend disconnected; drop the session.
    EndSession,
}

/// Actions drained on the I/O thread and applied to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    AcceptSession,
    DeclineSession,
    /// Deliver a protocol message to the frontend.
    SendMessage,
    /// Stop accepting new connections and shut the server down.
    Stop,
    /// Drop every live connection, then stop.
    Kill,
}

/// One queued message: action, addressed session, UTF-16 payload
/// (empty for actions that carry no body).
pub type Message<A> = (A, SessionId, Vec<u16>);

/// FIFO of pending messages for one direction.
pub type MessageQueue<A> = VecDeque<Message<A>>;

#[derive(Default)]
struct Queues {
    incoming: MessageQueue<InspectorAction>,
    outgoing: MessageQueue<TransportAction>,
}

/// The shared mailbox. Both threads append to both queues; the runtime
/// thread drains only `incoming`, the I/O thread drains only `outgoing`.
#[derive(Default)]
pub(crate) struct Mailbox {
    queues: Mutex<Queues>,
    /// Wakes a runtime thread parked in the wait-for-frontend pause.
    incoming_cond: Condvar,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends to the incoming queue. Returns true if the queue was empty,
    /// i.e. the runtime thread needs a wakeup.
    pub(crate) fn append_incoming(
        &self,
        action: InspectorAction,
        session_id: SessionId,
        message: Vec<u16>,
    ) -> bool {
        let mut queues = self.queues.lock();
        let trigger_pumping = queues.incoming.is_empty();
        queues.incoming.push_back((action, session_id, message));
        trigger_pumping
    }

    /// Appends to the outgoing queue. Returns true if the queue was empty,
    /// i.e. the I/O thread needs a wakeup.
    pub(crate) fn append_outgoing(
        &self,
        action: TransportAction,
        session_id: SessionId,
        message: Vec<u16>,
    ) -> bool {
        let mut queues = self.queues.lock();
        let trigger_pumping = queues.outgoing.is_empty();
        queues.outgoing.push_back((action, session_id, message));
        trigger_pumping
    }

    /// Swaps the incoming queue with `buffer` under the lock. O(1).
    pub(crate) fn swap_incoming(&self, buffer: &mut MessageQueue<InspectorAction>) {
        std::mem::swap(&mut self.queues.lock().incoming, buffer);
    }

    /// Swaps the outgoing queue with `buffer` under the lock. O(1).
    pub(crate) fn swap_outgoing(&self, buffer: &mut MessageQueue<TransportAction>) {
        std::mem::swap(&mut self.queues.lock().outgoing, buffer);
    }

    /// Wakes any runtime thread blocked in [`Mailbox::park_until_incoming`].
    pub(crate) fn broadcast_incoming(&self) {
        let _queues = self.queues.lock();
        self.incoming_cond.notify_all();
    }

    /// Blocks until the incoming queue may hold work. `drain_buffer_empty`
    /// reflects the runtime thread's local drain buffer: when either side
    /// still has messages the call returns immediately.
    pub(crate) fn park_until_incoming(&self, drain_buffer_empty: bool) {
        let mut queues = self.queues.lock();
        if drain_buffer_empty && queues.incoming.is_empty() {
            self.incoming_cond.wait(&mut queues);
        }
    }
}
