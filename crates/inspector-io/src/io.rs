//! The bridge between the runtime thread and the debug transport's I/O
//! thread.
//!
//! [`InspectorIo`] owns the mailbox, the session table and the I/O thread's
//! lifecycle. Frontend events arrive through the transport-owned server
//! delegate, cross the mailbox, and are applied to the session table on the
//! runtime thread; frontend-bound messages take the reverse path through
//! the per-session delegates and the outgoing drain.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::agent::{InspectorAgent, InspectorSession, InspectorSessionDelegate, RuntimePlatform};
use crate::error::{Error, Result};
use crate::id;
use crate::mailbox::{InspectorAction, Mailbox, MessageQueue, SessionId, TransportAction};
use crate::options::DebugOptions;
use crate::string16;
use crate::transport::{ServerHandle, SocketServerDelegate, Transport};

/// Lifecycle state of the bridge.
///
/// Connectedness is implicit in the session table; `Accepting` covers both
/// "listening, no frontend yet" and "frontend attached".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Constructed, I/O thread not yet spawned.
    New = 0,
    /// Transport is listening.
    Accepting = 1,
    /// Shutdown requested; waiting for sessions to end.
    ShutDown = 2,
    /// All sessions ended after shutdown, or disconnect-wait satisfied.
    Done = 3,
    /// The transport failed to bind. Terminal.
    Error = 4,
}

/// The state word is written by the runtime thread once past startup; the
/// one I/O-thread write (`Error`) happens while the runtime thread is
/// blocked on the start barrier. The atomic keeps the cross-thread reads
/// sound without widening the mailbox lock's footprint.
struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> State {
        match self.0.load(Ordering::SeqCst) {
            0 => State::New,
            1 => State::Accepting,
            2 => State::ShutDown,
            3 => State::Done,
            _ => State::Error,
        }
    }

    fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// The in-process debugger I/O bridge.
///
/// Exactly two threads touch a bridge: the runtime thread that constructed
/// it, and the I/O thread [`start`](InspectorIo::start) spawns. The incoming
/// queue is drained only on the former, the outgoing queue only on the
/// latter; the session table never leaves the runtime thread.
///
/// The embedder must call [`stop`](InspectorIo::stop) before dropping the
/// last handle, otherwise the I/O thread keeps serving until process exit.
pub struct InspectorIo {
    options: DebugOptions,
    script_name: String,
    wait_for_connect: bool,
    /// Stable per-process target id advertised to frontends.
    id: String,

    agent: Arc<dyn InspectorAgent>,
    platform: Arc<dyn RuntimePlatform>,

    state: AtomicState,
    /// Port observed from the transport; -1 until the I/O thread reports in.
    port: AtomicI32,
    start_error: Mutex<Option<Error>>,

    mailbox: Mailbox,
    /// Runtime-thread drain buffer. Confined to the runtime thread; the
    /// mutex only satisfies `Sync` and is never contended.
    drain_buffer: Mutex<MessageQueue<InspectorAction>>,
    /// Re-entrancy guard for `dispatch_messages`.
    dispatching_messages: AtomicBool,
    /// Session table. Confined to the runtime thread, like the drain buffer.
    sessions: Mutex<HashMap<SessionId, Arc<dyn InspectorSession>>>,

    /// I/O-thread async-notifier; pairs with the `Notify` permit model so
    /// wakeups sent before the thread parks are not lost.
    io_thread_notify: Notify,
    thread: Mutex<Option<JoinHandle<()>>>,

    self_ref: Weak<InspectorIo>,
}

impl InspectorIo {
    /// Constructs a bridge. Does not start the I/O thread.
    pub fn new(
        agent: Arc<dyn InspectorAgent>,
        platform: Arc<dyn RuntimePlatform>,
        script_name: impl Into<String>,
        options: DebugOptions,
        wait_for_connect: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            options,
            script_name: script_name.into(),
            wait_for_connect,
            id: id::generate_id(),
            agent,
            platform,
            state: AtomicState::new(State::New),
            port: AtomicI32::new(-1),
            start_error: Mutex::new(None),
            mailbox: Mailbox::new(),
            drain_buffer: Mutex::new(MessageQueue::new()),
            dispatching_messages: AtomicBool::new(false),
            sessions: Mutex::new(HashMap::new()),
            io_thread_notify: Notify::new(),
            thread: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Spawns the I/O thread with the given transport type and waits until
    /// the transport is listening.
    pub fn start<T: Transport>(&self) -> Result<()> {
        self.start_with(T::new)
    }

    /// Like [`start`](InspectorIo::start), but the transport is built by
    /// `build` on the I/O thread. Tests use this seam to hand the bridge a
    /// [`crate::testing::MockTransport`] wired to handles they retain.
    pub fn start_with<T, F>(&self, build: F) -> Result<()>
    where
        T: Transport,
        F: FnOnce(Box<dyn SocketServerDelegate>, String, u16) -> T + Send + 'static,
    {
        if self.state.load() != State::New {
            return Err(Error::AlreadyStarted);
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        // A live `&self` implies at least one strong reference.
        let io = self
            .self_ref
            .upgrade()
            .expect("bridge is managed by Arc via InspectorIo::new");
        let handle = std::thread::Builder::new()
            .name("inspector-io".to_string())
            .spawn(move || thread_main(io, build, ready_tx))
            .expect("failed to spawn inspector I/O thread");
        *self.thread.lock() = Some(handle);

        ready_rx
            .recv()
            .expect("inspector I/O thread exited before signalling readiness");

        if self.state.load() == State::Error {
            return Err(self
                .start_error
                .lock()
                .take()
                .expect("error state implies a recorded transport failure"));
        }

        self.state.store(State::Accepting);
        if self.wait_for_connect {
            // The first frontend may already have been accepted out-of-band;
            // pick up its StartSessionUnconditionally right away.
            self.dispatch_messages();
        }
        Ok(())
    }

    /// Hard stop: drop every connection, stop the transport, join the I/O
    /// thread, then drain whatever the teardown produced. Synchronous and
    /// idempotent.
    pub fn stop(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        self.write(TransportAction::Kill, 0, &[]);
        handle.join().expect("inspector I/O thread panicked");
        self.state.store(State::ShutDown);
        self.dispatch_messages();
    }

    /// True once the I/O thread has been spawned (it stays true after a
    /// failed transport bind; the thread exists until joined by `stop`).
    pub fn is_started(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Cooperative shutdown: asks the transport to stop and leaves the
    /// state machine to reach `Done` when the last session ends.
    pub fn wait_for_disconnect(&self) {
        if self.state.load() == State::Accepting {
            self.state.store(State::Done);
        }
        if !self.sessions.lock().is_empty() {
            self.state.store(State::ShutDown);
            self.write(TransportAction::Stop, 0, &[]);
            eprintln!("Waiting for the debugger to disconnect...");
            let _ = std::io::stderr().flush();
        }
    }

    /// Drains the incoming queue on the runtime thread.
    ///
    /// Idempotent and re-entrancy safe: a nested call (from a session
    /// dispatch, or any of the three wakeup channels firing while a drain
    /// is already running) returns immediately and the outer drain picks up
    /// whatever arrived meanwhile.
    pub fn dispatch_messages(&self) {
        if self.dispatching_messages.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut had_messages;
        loop {
            {
                let mut drain_buffer = self.drain_buffer.lock();
                if drain_buffer.is_empty() {
                    self.mailbox.swap_incoming(&mut drain_buffer);
                }
                had_messages = !drain_buffer.is_empty();
            }
            // Pop one message at a time so a paused session can re-enter
            // the drain without holding the buffer.
            while let Some((action, session_id, message)) = self.pop_drained() {
                match action {
                    InspectorAction::StartSession => {
                        let answer = self.attach(session_id);
                        self.write(answer, session_id, &[]);
                    }
                    InspectorAction::StartSessionUnconditionally => {
                        self.attach(session_id);
                    }
                    InspectorAction::EndSession => {
                        debug!("inspector session {} ended", session_id);
                        let table_empty = {
                            let mut sessions = self.sessions.lock();
                            sessions.remove(&session_id);
                            sessions.is_empty()
                        };
                        if table_empty {
                            let next = if self.state.load() == State::ShutDown {
                                State::Done
                            } else {
                                State::Accepting
                            };
                            self.state.store(next);
                        }
                    }
                    InspectorAction::SendMessage => {
                        let session = self.sessions.lock().get(&session_id).cloned();
                        if let Some(session) = session {
                            session.dispatch(&message);
                        }
                        // Absent session: it ended concurrently, drop the
                        // message.
                    }
                }
            }
            if !had_messages {
                break;
            }
        }
        self.dispatching_messages.store(false, Ordering::SeqCst);
    }

    fn pop_drained(&self) -> Option<(InspectorAction, SessionId, Vec<u16>)> {
        self.drain_buffer.lock().pop_front()
    }

    /// Blocks the runtime thread until another frontend message may be
    /// drained. Returns false when no sessions exist (nothing to wait for).
    pub fn wait_for_frontend_event(&self) -> bool {
        // Allow dispatch re-entry while paused, so the code a debugger
        // evaluation runs can itself be debugged.
        self.dispatching_messages.store(false, Ordering::SeqCst);
        if self.sessions.lock().is_empty() {
            return false;
        }
        let drain_buffer_empty = self.drain_buffer.lock().is_empty();
        self.mailbox.park_until_incoming(drain_buffer_empty);
        true
    }

    /// Enqueues an outgoing action toward the I/O thread.
    pub fn write(&self, action: TransportAction, session_id: SessionId, message: &[u16]) {
        if self
            .mailbox
            .append_outgoing(action, session_id, message.to_vec())
        {
            self.io_thread_notify.notify_one();
        }
    }

    /// Ids of the debug targets exposed by this bridge.
    pub fn get_target_ids(&self) -> Vec<String> {
        vec![self.id.clone()]
    }

    /// Configured host.
    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Port the transport is listening on, once the I/O thread reported it.
    pub fn port(&self) -> Option<u16> {
        let port = self.port.load(Ordering::SeqCst);
        u16::try_from(port).ok()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state.load()
    }

    /// Called from the I/O thread when a frontend message arrives or a
    /// session starts or ends. Fires the three-way wakeup when the queue
    /// goes empty-to-non-empty, and always broadcasts to a paused runtime
    /// thread.
    pub(crate) fn post_incoming_message(
        &self,
        action: InspectorAction,
        session_id: SessionId,
        message: &[u8],
    ) {
        if self
            .mailbox
            .append_incoming(action, session_id, string16::utf8_to_view(message))
        {
            self.platform.post_task(Box::new(dispatcher(&self.self_ref)));
            self.platform
                .request_interrupt(Box::new(dispatcher(&self.self_ref)));
            self.platform.wake_event_loop();
        }
        self.mailbox.broadcast_incoming();
    }

    /// Forwards the frontend's resume cue to the runtime agent
    /// (wait-for-connect mode).
    pub(crate) fn resume_startup(&self) {
        self.agent.resume_startup();
    }

    /// The transport dropped its delegate; the server side is gone.
    pub(crate) fn server_done(&self) {
        debug!("inspector transport server done");
    }

    /// Connects a session on the runtime agent and records it in the table.
    fn attach(&self, session_id: SessionId) -> TransportAction {
        eprintln!("Debugger attached.");
        let delegate = IoSessionDelegate {
            io: self.self_ref.clone(),
            session_id,
        };
        let session: Arc<dyn InspectorSession> =
            Arc::from(self.agent.connect(Box::new(delegate)));
        self.sessions.lock().insert(session_id, session);
        TransportAction::AcceptSession
    }
}

/// Wakeup callback converging on `dispatch_messages`. Holds a weak
/// reference: after the bridge is gone the callback is a no-op, which is
/// what makes stray wakeups during teardown harmless.
fn dispatcher(io: &Weak<InspectorIo>) -> impl FnOnce() + Send + 'static {
    let io = io.clone();
    move || {
        if let Some(io) = io.upgrade() {
            io.dispatch_messages();
        }
    }
}

/// Body of the I/O thread: one fresh event loop, one transport, drains of
/// the outgoing queue until shutdown.
fn thread_main<T, F>(io: Arc<InspectorIo>, build: F, ready: mpsc::Sender<()>)
where
    T: Transport,
    F: FnOnce(Box<dyn SocketServerDelegate>, String, u16) -> T + Send + 'static,
{
    let event_loop = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to initialize inspector I/O event loop");

    event_loop.block_on(async {
        let script_path = id::script_path(&io.script_name);
        let delegate = InspectorIoDelegate::new(
            Arc::downgrade(&io),
            io.id.clone(),
            script_path,
            io.script_name.clone(),
            io.wait_for_connect,
        );
        let mut server = build(
            Box::new(delegate),
            io.options.host.clone(),
            io.options.port,
        );

        if let Err(source) = server.start().await {
            warn!(
                "inspector transport failed to start on {}:{}: {}",
                io.options.host, io.options.port, source
            );
            // Safe: the runtime thread is blocked on the start barrier.
            *io.start_error.lock() = Some(Error::TransportBind {
                host: io.options.host.clone(),
                port: io.options.port,
                source,
            });
            io.state.store(State::Error);
            let _ = ready.send(());
            return;
        }

        io.port.store(i32::from(server.port()), Ordering::SeqCst);
        debug!(
            "inspector listening on {}:{}",
            io.options.host,
            server.port()
        );
        // Posted exactly once, after the transport is up, in both wait
        // modes; the wait-for-connect pause is the embedder's
        // wait_for_frontend_event loop, not this barrier.
        let _ = ready.send(());

        loop {
            io.io_thread_notify.notified().await;
            if drain_outgoing(&io, &mut server) {
                break;
            }
        }
        server.closed().await;
    });
}

/// Applies one swapped batch of outgoing actions to the transport. Returns
/// true once the transport has been told to stop.
fn drain_outgoing<T: Transport>(io: &InspectorIo, server: &mut T) -> bool {
    let mut batch = MessageQueue::new();
    io.mailbox.swap_outgoing(&mut batch);
    let mut shutting_down = false;
    for (action, session_id, message) in batch {
        match action {
            TransportAction::Kill => {
                server.terminate_connections();
                server.stop();
                shutting_down = true;
            }
            TransportAction::Stop => {
                server.stop();
                shutting_down = true;
            }
            TransportAction::SendMessage => {
                server.send(session_id, string16::view_to_utf8(&message));
            }
            TransportAction::AcceptSession => server.accept_session(session_id),
            TransportAction::DeclineSession => server.decline_session(session_id),
        }
    }
    shutting_down
}

/// Transport-side delegate: turns connection events into incoming mailbox
/// posts. Owned by the transport for the I/O thread's lifetime.
pub(crate) struct InspectorIoDelegate {
    io: Weak<InspectorIo>,
    script_name: String,
    script_path: String,
    target_id: String,
    /// Wait-for-connect: accept the first session out-of-band and hold the
    /// runtime until the frontend sends the resume cue.
    waiting: bool,
    server: Option<Box<dyn ServerHandle>>,
}

/// The resume cue, matched as a raw substring of the message body.
/// Frontends send the method name quoted; the bridge does not parse JSON,
/// so a message merely quoting the method in a string payload also matches.
const RESUME_METHOD: &str = "\"Runtime.runIfWaitingForDebugger\"";

impl InspectorIoDelegate {
    pub(crate) fn new(
        io: Weak<InspectorIo>,
        target_id: String,
        script_path: String,
        script_name: String,
        waiting: bool,
    ) -> Self {
        Self {
            io,
            script_name,
            script_path,
            target_id,
            waiting,
            server: None,
        }
    }

    fn post(&self, action: InspectorAction, session_id: SessionId, message: &[u8]) {
        if let Some(io) = self.io.upgrade() {
            io.post_incoming_message(action, session_id, message);
        }
    }
}

impl SocketServerDelegate for InspectorIoDelegate {
    fn assign_server(&mut self, server: Box<dyn ServerHandle>) {
        self.server = Some(server);
    }

    fn start_session(&mut self, session_id: SessionId, _target_id: &str) {
        let mut action = InspectorAction::StartSession;
        if self.waiting {
            action = InspectorAction::StartSessionUnconditionally;
            if let Some(server) = &self.server {
                server.accept_session(session_id);
            }
        }
        self.post(action, session_id, b"");
    }

    fn message_received(&mut self, session_id: SessionId, message: String) {
        if self.waiting && message.contains(RESUME_METHOD) {
            self.waiting = false;
            if let Some(io) = self.io.upgrade() {
                io.resume_startup();
            }
        }
        self.post(InspectorAction::SendMessage, session_id, message.as_bytes());
    }

    fn end_session(&mut self, session_id: SessionId) {
        self.post(InspectorAction::EndSession, session_id, b"");
    }

    fn target_ids(&self) -> Vec<String> {
        vec![self.target_id.clone()]
    }

    fn target_title(&self, _id: &str) -> String {
        if self.script_name.is_empty() {
            id::human_readable_process_name()
        } else {
            self.script_name.clone()
        }
    }

    fn target_url(&self, _id: &str) -> String {
        format!("file://{}", self.script_path)
    }
}

impl Drop for InspectorIoDelegate {
    fn drop(&mut self) {
        if let Some(io) = self.io.upgrade() {
            io.server_done();
        }
    }
}

/// Per-session delegate handed to the runtime agent: frontend-bound
/// messages become outgoing mailbox writes.
struct IoSessionDelegate {
    io: Weak<InspectorIo>,
    session_id: SessionId,
}

impl InspectorSessionDelegate for IoSessionDelegate {
    fn send_message_to_frontend(&mut self, message: &[u16]) {
        if let Some(io) = self.io.upgrade() {
            io.write(TransportAction::SendMessage, self.session_id, message);
        }
    }
}
