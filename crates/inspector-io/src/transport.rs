//! The transport seam.
//!
//! The bridge never speaks to sockets itself. It drives a [`Transport`], the
//! server owning the listening socket and the per-frontend connections, and
//! receives connection events back through the [`SocketServerDelegate`] it
//! hands the transport at construction. Dispatch over transport types is
//! compile-time: the bridge's start path is generic, and tests inject
//! [`crate::testing::MockTransport`] through the same seam.

use std::future::Future;

use crate::mailbox::SessionId;

/// Server capability consumed by the I/O-side dispatch loop.
///
/// A transport is constructed on the I/O thread inside that thread's event
/// loop and never leaves it, so implementations are free to use
/// non-`Send` internals. `start` and `closed` are async and are awaited on
/// the I/O thread's current-thread runtime; the remaining operations must
/// not block (a real server hands them off to its connection tasks).
pub trait Transport: 'static {
    /// Constructs the server for `host:port`, owning `delegate` for the
    /// rest of the thread's lifetime. Binding happens in `start`.
    fn new(delegate: Box<dyn SocketServerDelegate>, host: String, port: u16) -> Self
    where
        Self: Sized;

    /// Binds and starts listening. On error the bridge enters its terminal
    /// error state and the I/O thread tears down.
    fn start(&mut self) -> impl Future<Output = std::io::Result<()>>;

    /// The port actually bound (meaningful after `start` succeeds; resolves
    /// port 0 requests to the ephemeral port granted by the OS).
    fn port(&self) -> u16;

    /// Completes the session handshake for a frontend the runtime accepted.
    fn accept_session(&mut self, session_id: SessionId);

    /// Rejects a pending frontend.
    fn decline_session(&mut self, session_id: SessionId);

    /// Delivers a UTF-8 protocol message to the frontend.
    fn send(&mut self, session_id: SessionId, message: String);

    /// Drops every live connection without handshake.
    fn terminate_connections(&mut self);

    /// Stops listening; existing connections wind down.
    fn stop(&mut self);

    /// Resolves once the listener and every connection have fully shut
    /// down. The I/O thread awaits this before exiting.
    fn closed(&mut self) -> impl Future<Output = ()>;
}

/// Narrow handle the transport lends its delegate so the wait-for-connect
/// path can accept a session synchronously, without a round trip through
/// the runtime thread.
pub trait ServerHandle: Send {
    fn accept_session(&self, session_id: SessionId);
}

/// Connection events flowing from the transport to the bridge.
///
/// All methods are invoked on the I/O thread. The delegate is owned by the
/// transport; when the transport drops it at shutdown, the delegate reports
/// server-done back to the bridge.
pub trait SocketServerDelegate: Send {
    /// Gives the delegate its back-channel to the server. Called once,
    /// before any session event.
    fn assign_server(&mut self, server: Box<dyn ServerHandle>);

    /// A frontend initiated a session against `target_id`.
    fn start_session(&mut self, session_id: SessionId, target_id: &str);

    /// A protocol message arrived from the frontend.
    fn message_received(&mut self, session_id: SessionId, message: String);

    /// The frontend disconnected.
    fn end_session(&mut self, session_id: SessionId);

    /// Ids of the debug targets this server exposes.
    fn target_ids(&self) -> Vec<String>;

    /// Human-readable title for a target.
    fn target_title(&self, id: &str) -> String;

    /// URL advertised for a target.
    fn target_url(&self, id: &str) -> String;
}
