//! The runtime-side seams.
//!
//! The bridge moves bytes; the embedding runtime interprets them. Two
//! contracts cover that boundary: [`InspectorAgent`] is the component owning
//! per-session inspector state inside the runtime, and [`RuntimePlatform`]
//! exposes the scheduling primitives the bridge needs to get the runtime
//! thread's attention from the I/O thread.

/// The embedding runtime's inspector agent.
///
/// Lives on the runtime thread; the bridge only calls it from there.
pub trait InspectorAgent: Send + Sync {
    /// Opens a session. Messages the runtime produces for the frontend flow
    /// back through `delegate`; messages from the frontend are pushed into
    /// the returned handle.
    fn connect(&self, delegate: Box<dyn InspectorSessionDelegate>) -> Box<dyn InspectorSession>;

    /// The frontend asked the runtime to proceed with startup
    /// (wait-for-connect mode).
    fn resume_startup(&self);
}

/// One live inspector session inside the runtime agent.
///
/// Takes `&self`: while the runtime is paused for the debugger, dispatching
/// a message (say `Runtime.evaluate`) can re-enter the bridge and dispatch
/// further messages into the same session. Implementations that need
/// mutable state use interior mutability.
pub trait InspectorSession: Send + Sync {
    /// Dispatches an inbound protocol message, given as UTF-16 code units.
    fn dispatch(&self, message: &[u16]);
}

/// Per-session callback the agent uses to emit frontend-bound messages.
///
/// Owned by the agent for the session's lifetime; implemented by the bridge.
pub trait InspectorSessionDelegate: Send {
    fn send_message_to_frontend(&mut self, message: &[u16]);
}

/// Scheduling hooks into the embedding runtime.
///
/// A wakeup must reach the runtime thread whatever it is doing, so the
/// bridge fires all three channels for every empty-to-non-empty push of the
/// incoming queue:
///
/// - `post_task` lands when the thread is idle in its task loop,
/// - `request_interrupt` lands at the next safe point while script runs,
/// - `wake_event_loop` lands when the thread is parked in its event loop.
///
/// (A thread parked inside the bridge's own frontend-event wait is covered
/// separately by the mailbox's condition variable.) Each channel converges
/// on the same idempotent dispatch entry point; dropping any one of them
/// trades correctness for latency bugs that only show under load.
pub trait RuntimePlatform: Send + Sync {
    /// Posts `task` to the runtime thread's foreground task queue.
    fn post_task(&self, task: Box<dyn FnOnce() + Send>);

    /// Asks the script isolate to run `callback` at its next safe point.
    fn request_interrupt(&self, callback: Box<dyn FnOnce() + Send>);

    /// Pokes the runtime thread's event loop. The embedder arranges for a
    /// woken loop to call [`crate::InspectorIo::dispatch_messages`].
    fn wake_event_loop(&self);
}
