//! inspector-io - cross-thread I/O bridge for a scripting runtime's
//! remote debugger.
//!
//! The bridge couples two worlds that cannot share stacks: the runtime
//! thread that owns the script interpreter (touchable only at safe points)
//! and an I/O thread that owns the debug transport and its event loop.
//! Protocol messages cross between them through a mutex-guarded pair of
//! FIFO queues, with per-thread async notifiers carrying the wakeups.
//!
//! # Architecture
//!
//! ```text
//!  frontend bytes                                      runtime thread
//!       │                                                   ▲
//!  ┌────▼────────┐   SocketServerDelegate   ┌───────────────┴──┐
//!  │  Transport  ├──────────────────────────►  incoming queue  │
//!  │ (I/O thread)│                          │   dispatch loop  │
//!  │             ◄──────────────────────────┤  session table   │
//!  └─────────────┘      outgoing queue      └───────▲──────────┘
//!                                                   │ InspectorAgent /
//!                                                   ▼ session delegates
//!                                            scripting runtime
//! ```
//!
//! # Seams
//!
//! Three contracts keep the bridge free of sockets and interpreter
//! internals: [`Transport`] (the socket server, injected generically),
//! [`InspectorAgent`] (the runtime's inspector plumbing) and
//! [`RuntimePlatform`] (task posting and interrupt requests). The
//! [`testing`] module provides mock implementations of all three.

pub mod agent;
pub mod error;
pub mod id;
pub mod io;
pub mod mailbox;
pub mod options;
pub mod string16;
pub mod testing;
pub mod transport;

// Re-export key types at crate root
pub use agent::{InspectorAgent, InspectorSession, InspectorSessionDelegate, RuntimePlatform};
pub use error::{Error, Result};
pub use io::{InspectorIo, State};
pub use mailbox::{InspectorAction, SessionId, TransportAction};
pub use options::DebugOptions;
pub use string16::{utf8_to_view, view_to_utf8};
pub use transport::{ServerHandle, SocketServerDelegate, Transport};
