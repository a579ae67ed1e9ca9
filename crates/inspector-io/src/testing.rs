//! Testing infrastructure for the bridge.
//!
//! Provides mock implementations of the three external contracts so the
//! bridge can be exercised without sockets or a real scripting runtime:
//!
//! - [`MockTransport`]: records every action the I/O-side drain applies and
//!   exposes the bridge's [`SocketServerDelegate`] so tests can play the
//!   frontend.
//! - [`MockAgent`]: records connected sessions and the messages dispatched
//!   into them; replies through the captured session delegates.
//! - [`MockPlatform`]: captures the three-way wakeup so tests can act as
//!   the runtime thread's scheduler.
//!
//! # Example
//!
//! ```ignore
//! let state = MockTransportState::new();
//! io.start_with(MockTransport::factory(state.clone()))?;
//! state.with_delegate(|d| d.start_session(1, &target_id));
//! platform.run_tasks();
//! assert_eq!(state.actions()[0], MockTransportAction::AcceptSession(1));
//! ```

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::agent::{InspectorAgent, InspectorSession, InspectorSessionDelegate, RuntimePlatform};
use crate::mailbox::SessionId;
use crate::string16;
use crate::transport::{ServerHandle, SocketServerDelegate, Transport};

/// Action recorded by [`MockTransport`] for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockTransportAction {
    /// A session handshake was completed (whether driven by the drained
    /// `AcceptSession` action or by the delegate's out-of-band accept in
    /// wait-for-connect mode).
    AcceptSession(SessionId),
    /// A pending session was rejected.
    DeclineSession(SessionId),
    /// A message was delivered toward the frontend.
    Send {
        session_id: SessionId,
        message: String,
    },
    /// All live connections were dropped.
    TerminateConnections,
    /// The server stopped listening.
    Stop,
}

/// Shared state behind a [`MockTransport`].
///
/// Created by the test, handed to [`MockTransport::factory`], and retained
/// for assertions; the transport instance itself lives on the I/O thread.
pub struct MockTransportState {
    actions: Mutex<Vec<MockTransportAction>>,
    actions_cond: Condvar,
    delegate: Mutex<Option<Box<dyn SocketServerDelegate>>>,
    start_error: Mutex<Option<io::Error>>,
    requested: Mutex<Option<(String, u16)>>,
    bound_port: AtomicU16,
    stopped: AtomicBool,
    closed_notify: Notify,
}

impl MockTransportState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(Vec::new()),
            actions_cond: Condvar::new(),
            delegate: Mutex::new(None),
            start_error: Mutex::new(None),
            requested: Mutex::new(None),
            bound_port: AtomicU16::new(0),
            stopped: AtomicBool::new(false),
            closed_notify: Notify::new(),
        })
    }

    /// Makes the next `start()` fail with `error`, simulating a bind/listen
    /// failure.
    pub fn fail_next_start(&self, error: io::Error) {
        *self.start_error.lock() = Some(error);
    }

    /// All recorded actions so far.
    pub fn actions(&self) -> Vec<MockTransportAction> {
        self.actions.lock().clone()
    }

    /// Blocks until at least `count` actions were recorded, then returns
    /// them. Panics on timeout, meaning the I/O thread failed to drain.
    pub fn wait_for_actions(&self, count: usize, timeout: Duration) -> Vec<MockTransportAction> {
        let deadline = Instant::now() + timeout;
        let mut actions = self.actions.lock();
        while actions.len() < count {
            if self
                .actions_cond
                .wait_until(&mut actions, deadline)
                .timed_out()
            {
                panic!(
                    "timed out waiting for {count} transport actions, saw {:?}",
                    *actions
                );
            }
        }
        actions.clone()
    }

    /// Runs `operation` against the bridge's transport delegate, playing
    /// the role of the socket server reporting a connection event.
    pub fn with_delegate<R>(
        &self,
        operation: impl FnOnce(&mut dyn SocketServerDelegate) -> R,
    ) -> R {
        let mut delegate = self.delegate.lock();
        operation(
            delegate
                .as_mut()
                .expect("transport was never built; did start() run?")
                .as_mut(),
        )
    }

    /// Host and port the bridge asked the transport to bind.
    pub fn requested_endpoint(&self) -> Option<(String, u16)> {
        self.requested.lock().clone()
    }

    fn record(&self, action: MockTransportAction) {
        self.actions.lock().push(action);
        self.actions_cond.notify_all();
    }
}

/// Transport double that records actions instead of touching sockets.
pub struct MockTransport {
    state: Arc<MockTransportState>,
}

impl MockTransport {
    /// Port reported when the bridge asks for an ephemeral port (port 0).
    pub const EPHEMERAL_PORT: u16 = 49537;

    /// Builds a constructor closure for [`crate::InspectorIo::start_with`]
    /// that wires the transport to `state`.
    pub fn factory(
        state: Arc<MockTransportState>,
    ) -> impl FnOnce(Box<dyn SocketServerDelegate>, String, u16) -> MockTransport + Send + 'static
    {
        move |delegate, host, port| Self::attach(state, delegate, host, port)
    }

    fn attach(
        state: Arc<MockTransportState>,
        mut delegate: Box<dyn SocketServerDelegate>,
        host: String,
        port: u16,
    ) -> Self {
        *state.requested.lock() = Some((host, port));
        delegate.assign_server(Box::new(MockServerHandle {
            state: Arc::clone(&state),
        }));
        *state.delegate.lock() = Some(delegate);
        Self { state }
    }
}

impl Transport for MockTransport {
    fn new(delegate: Box<dyn SocketServerDelegate>, host: String, port: u16) -> Self {
        Self::attach(MockTransportState::new(), delegate, host, port)
    }

    fn start(&mut self) -> impl Future<Output = io::Result<()>> {
        let result = match self.state.start_error.lock().take() {
            Some(error) => Err(error),
            None => {
                let requested = self
                    .state
                    .requested
                    .lock()
                    .as_ref()
                    .map(|(_, port)| *port)
                    .unwrap_or(0);
                let bound = if requested == 0 {
                    Self::EPHEMERAL_PORT
                } else {
                    requested
                };
                self.state.bound_port.store(bound, Ordering::SeqCst);
                Ok(())
            }
        };
        async move { result }
    }

    fn port(&self) -> u16 {
        self.state.bound_port.load(Ordering::SeqCst)
    }

    fn accept_session(&mut self, session_id: SessionId) {
        self.state.record(MockTransportAction::AcceptSession(session_id));
    }

    fn decline_session(&mut self, session_id: SessionId) {
        self.state
            .record(MockTransportAction::DeclineSession(session_id));
    }

    fn send(&mut self, session_id: SessionId, message: String) {
        self.state.record(MockTransportAction::Send {
            session_id,
            message,
        });
    }

    fn terminate_connections(&mut self) {
        self.state.record(MockTransportAction::TerminateConnections);
    }

    fn stop(&mut self) {
        self.state.record(MockTransportAction::Stop);
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.closed_notify.notify_one();
    }

    fn closed(&mut self) -> impl Future<Output = ()> {
        let state = Arc::clone(&self.state);
        async move {
            while !state.stopped.load(Ordering::SeqCst) {
                state.closed_notify.notified().await;
            }
        }
    }
}

/// Back-channel the mock transport lends the bridge's delegate.
struct MockServerHandle {
    state: Arc<MockTransportState>,
}

impl ServerHandle for MockServerHandle {
    fn accept_session(&self, session_id: SessionId) {
        self.state.record(MockTransportAction::AcceptSession(session_id));
    }
}

type DispatchHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Runtime-agent double. Sessions record the messages dispatched into them;
/// replies flow back through the captured per-session delegates.
#[derive(Default)]
pub struct MockAgent {
    sessions: Mutex<Vec<MockAgentSession>>,
    resume_calls: AtomicUsize,
    dispatch_hook: Arc<Mutex<Option<DispatchHook>>>,
}

struct MockAgentSession {
    delegate: Box<dyn InspectorSessionDelegate>,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions connected so far.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Messages dispatched into the `index`-th connected session, decoded
    /// back to UTF-8.
    pub fn received(&self, index: usize) -> Vec<String> {
        self.sessions.lock()[index].received.lock().clone()
    }

    /// Sends `message` toward the frontend through the `index`-th session's
    /// delegate, the way the runtime does when the inspector responds.
    pub fn reply(&self, index: usize, message: &str) {
        self.sessions.lock()[index]
            .delegate
            .send_message_to_frontend(&string16::utf8_to_view(message.as_bytes()));
    }

    /// Number of `resume_startup` calls observed.
    pub fn resume_count(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    /// Installs a hook invoked after every session dispatch, for driving
    /// re-entrant flows from inside a dispatch.
    pub fn set_dispatch_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.dispatch_hook.lock() = Some(Arc::new(hook));
    }
}

impl InspectorAgent for MockAgent {
    fn connect(&self, delegate: Box<dyn InspectorSessionDelegate>) -> Box<dyn InspectorSession> {
        let received = Arc::new(Mutex::new(Vec::new()));
        self.sessions.lock().push(MockAgentSession {
            delegate,
            received: Arc::clone(&received),
        });
        Box::new(MockSessionHandle {
            received,
            dispatch_hook: Arc::clone(&self.dispatch_hook),
        })
    }

    fn resume_startup(&self) {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockSessionHandle {
    received: Arc<Mutex<Vec<String>>>,
    dispatch_hook: Arc<Mutex<Option<DispatchHook>>>,
}

impl InspectorSession for MockSessionHandle {
    fn dispatch(&self, message: &[u16]) {
        let text = string16::view_to_utf8(message);
        self.received.lock().push(text.clone());
        let hook = self.dispatch_hook.lock().clone();
        if let Some(hook) = hook {
            hook(&text);
        }
    }
}

/// Scheduler double standing in for the embedding runtime: wakeup tasks and
/// interrupts queue up until the test runs them, playing the runtime
/// thread's part.
#[derive(Default)]
pub struct MockPlatform {
    tasks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    interrupts: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    wakes: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every pending foreground task; returns how many ran.
    pub fn run_tasks(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Runs every pending interrupt callback; returns how many ran.
    pub fn run_interrupts(&self) -> usize {
        let interrupts = std::mem::take(&mut *self.interrupts.lock());
        let count = interrupts.len();
        for interrupt in interrupts {
            interrupt();
        }
        count
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn pending_interrupts(&self) -> usize {
        self.interrupts.lock().len()
    }

    /// Number of event-loop pokes observed.
    pub fn wake_count(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl RuntimePlatform for MockPlatform {
    fn post_task(&self, task: Box<dyn FnOnce() + Send>) {
        self.tasks.lock().push(task);
    }

    fn request_interrupt(&self, callback: Box<dyn FnOnce() + Send>) {
        self.interrupts.lock().push(callback);
    }

    fn wake_event_loop(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}
