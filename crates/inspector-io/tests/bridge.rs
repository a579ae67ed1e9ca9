//! End-to-end bridge scenarios, driven through the testing doubles.
//!
//! The test thread plays the runtime thread: transport events are injected
//! through the bridge's server delegate, and the captured wakeup tasks are
//! run by hand where the embedding runtime's scheduler would run them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use inspector_io::testing::{
    MockAgent, MockPlatform, MockTransport, MockTransportAction, MockTransportState,
};
use inspector_io::{DebugOptions, Error, InspectorIo, State};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    io: Arc<InspectorIo>,
    agent: Arc<MockAgent>,
    platform: Arc<MockPlatform>,
    transport: Arc<MockTransportState>,
}

fn start_bridge(wait_for_connect: bool) -> Harness {
    let agent = Arc::new(MockAgent::new());
    let platform = Arc::new(MockPlatform::new());
    let transport = MockTransportState::new();
    let io = InspectorIo::new(
        agent.clone(),
        platform.clone(),
        "",
        DebugOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        wait_for_connect,
    );
    io.start_with(MockTransport::factory(transport.clone()))
        .expect("bridge failed to start");
    Harness {
        io,
        agent,
        platform,
        transport,
    }
}

impl Harness {
    /// Runs every pending wakeup the way the runtime thread's scheduler
    /// would. Dispatch is idempotent, so running both channels is safe.
    fn run_wakeups(&self) {
        self.platform.run_tasks();
        self.platform.run_interrupts();
    }
}

#[test]
fn happy_session_round_trip() {
    let h = start_bridge(false);
    assert_eq!(h.io.state(), State::Accepting);
    assert_eq!(h.io.host(), "127.0.0.1");
    assert_eq!(h.io.port(), Some(MockTransport::EPHEMERAL_PORT));
    assert_eq!(
        h.transport.requested_endpoint(),
        Some(("127.0.0.1".to_string(), 0))
    );

    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();
    assert_eq!(h.agent.session_count(), 1);
    let actions = h.transport.wait_for_actions(1, TIMEOUT);
    assert_eq!(actions[0], MockTransportAction::AcceptSession(1));

    let request = serde_json::json!({"id": 1, "method": "Runtime.enable"}).to_string();
    h.transport
        .with_delegate(|d| d.message_received(1, request.clone()));
    h.run_wakeups();
    assert_eq!(h.agent.received(0), vec![request]);

    let response = serde_json::json!({"id": 1, "result": {}}).to_string();
    h.agent.reply(0, &response);
    let actions = h.transport.wait_for_actions(2, TIMEOUT);
    assert_eq!(
        actions[1],
        MockTransportAction::Send {
            session_id: 1,
            message: response,
        }
    );

    h.transport.with_delegate(|d| d.end_session(1));
    h.run_wakeups();
    assert_eq!(h.io.state(), State::Accepting);

    h.io.stop();
    let actions = h.transport.actions();
    assert_eq!(
        &actions[2..],
        &[
            MockTransportAction::TerminateConnections,
            MockTransportAction::Stop,
        ]
    );
    assert_eq!(h.io.state(), State::ShutDown);
}

#[test]
fn wait_for_connect_accepts_out_of_band_and_resumes_once() {
    let h = start_bridge(true);

    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(7, &target_id));
    // The delegate accepted synchronously, before the runtime thread saw
    // anything.
    assert_eq!(
        h.transport.actions(),
        vec![MockTransportAction::AcceptSession(7)]
    );

    h.run_wakeups();
    assert_eq!(h.agent.session_count(), 1);

    let resume =
        serde_json::json!({"id": 1, "method": "Runtime.runIfWaitingForDebugger"}).to_string();
    h.transport
        .with_delegate(|d| d.message_received(7, resume.clone()));
    assert_eq!(h.agent.resume_count(), 1);

    // The cue recurring must not resume again.
    h.transport
        .with_delegate(|d| d.message_received(7, resume.clone()));
    assert_eq!(h.agent.resume_count(), 1);

    h.run_wakeups();
    assert_eq!(h.agent.received(0).len(), 2);

    // A reply flushes the outgoing side; the bridge must not have written
    // a second AcceptSession for the out-of-band session.
    h.agent.reply(0, "{}");
    let actions = h.transport.wait_for_actions(2, TIMEOUT);
    assert_eq!(
        actions
            .iter()
            .filter(|a| matches!(a, MockTransportAction::AcceptSession(_)))
            .count(),
        1
    );

    h.io.stop();
}

#[test]
fn bind_failure_is_terminal() {
    let agent = Arc::new(MockAgent::new());
    let platform = Arc::new(MockPlatform::new());
    let transport = MockTransportState::new();
    transport.fail_next_start(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        "address already in use",
    ));

    let io = InspectorIo::new(
        agent,
        platform.clone(),
        "",
        DebugOptions::default(),
        false,
    );
    let error = io
        .start_with(MockTransport::factory(transport.clone()))
        .unwrap_err();
    assert!(error.is_transport_bind());

    assert_eq!(io.state(), State::Error);
    assert!(io.is_started());
    assert_eq!(io.port(), None);
    assert_eq!(platform.wake_count(), 0);

    // The thread already exited cleanly; stop is a no-op beyond the join.
    io.stop();
    assert!(transport.actions().is_empty());
}

#[test]
fn graceful_disconnect_drains_to_done() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.transport.with_delegate(|d| d.start_session(2, &target_id));
    h.run_wakeups();
    h.transport.wait_for_actions(2, TIMEOUT);

    h.io.wait_for_disconnect();
    assert_eq!(h.io.state(), State::ShutDown);
    let actions = h.transport.wait_for_actions(3, TIMEOUT);
    assert_eq!(actions[2], MockTransportAction::Stop);

    h.transport.with_delegate(|d| d.end_session(1));
    h.run_wakeups();
    assert_eq!(h.io.state(), State::ShutDown);

    h.transport.with_delegate(|d| d.end_session(2));
    h.run_wakeups();
    assert_eq!(h.io.state(), State::Done);

    // No further outbound actions after the single Stop.
    assert_eq!(h.transport.actions().len(), 3);
}

#[test]
fn wait_for_disconnect_without_sessions_is_immediate() {
    let h = start_bridge(false);
    h.io.wait_for_disconnect();
    assert_eq!(h.io.state(), State::Done);
    assert!(h.transport.actions().is_empty());
    h.io.stop();
}

#[test]
fn hard_stop_with_live_session() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();
    h.transport.wait_for_actions(1, TIMEOUT);

    h.io.stop();
    let actions = h.transport.actions();
    assert_eq!(
        &actions[1..],
        &[
            MockTransportAction::TerminateConnections,
            MockTransportAction::Stop,
        ]
    );
    assert_eq!(h.io.state(), State::ShutDown);
}

#[test]
fn hard_stop_drains_the_teardown_end_session() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();
    h.transport.wait_for_actions(1, TIMEOUT);

    // Transport teardown reports the disconnect; the runtime side has not
    // drained it yet when stop() runs.
    h.transport.with_delegate(|d| d.end_session(1));
    h.io.stop();
    assert_eq!(h.io.state(), State::Done);
    assert_eq!(h.agent.session_count(), 1);
}

#[test]
fn send_to_vanished_session_is_dropped() {
    let h = start_bridge(false);
    h.transport
        .with_delegate(|d| d.message_received(99, r#"{"id":9,"method":"Runtime.enable"}"#.into()));
    h.run_wakeups();
    assert_eq!(h.agent.session_count(), 0);

    h.io.stop();
    assert_eq!(
        h.transport.actions(),
        vec![
            MockTransportAction::TerminateConnections,
            MockTransportAction::Stop,
        ]
    );
}

#[test]
fn wakeups_fire_once_per_empty_to_non_empty() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();

    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    assert_eq!(h.platform.wake_count(), 1);
    assert_eq!(h.platform.pending_tasks(), 1);
    assert_eq!(h.platform.pending_interrupts(), 1);

    // Appends to an already non-empty queue stay quiet.
    h.transport.with_delegate(|d| {
        d.message_received(1, "a".into());
        d.message_received(1, "b".into());
    });
    assert_eq!(h.platform.wake_count(), 1);
    assert_eq!(h.platform.pending_tasks(), 1);

    h.run_wakeups();
    assert_eq!(h.agent.received(0), vec!["a".to_string(), "b".to_string()]);

    // Drained queue re-arms the trigger.
    h.transport.with_delegate(|d| d.message_received(1, "c".into()));
    assert_eq!(h.platform.wake_count(), 2);

    h.run_wakeups();
    h.io.stop();
}

#[test]
fn nested_dispatch_neither_reorders_nor_duplicates() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();

    let io = Arc::downgrade(&h.io);
    let transport = h.transport.clone();
    let nested_calls = Arc::new(AtomicUsize::new(0));
    let observed = nested_calls.clone();
    h.agent.set_dispatch_hook(move |message| {
        if message == "first" {
            nested_calls.fetch_add(1, Ordering::SeqCst);
            // Re-entering the drain mid-dispatch must be a no-op...
            if let Some(io) = io.upgrade() {
                io.dispatch_messages();
            }
            // ...and work enqueued from inside a dispatch must still be
            // drained by the outer call.
            transport.with_delegate(|d| d.message_received(1, "third".into()));
        }
    });

    h.transport.with_delegate(|d| {
        d.message_received(1, "first".into());
        d.message_received(1, "second".into());
    });
    h.platform.run_tasks();

    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.agent.received(0),
        vec!["first".to_string(), "second".to_string(), "third".to_string()]
    );
    h.io.stop();
}

#[test]
fn inbound_order_is_preserved() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();

    let messages: Vec<String> = (0..50).map(|n| format!(r#"{{"id":{n}}}"#)).collect();
    h.transport.with_delegate(|d| {
        for message in &messages {
            d.message_received(1, message.clone());
        }
    });
    h.run_wakeups();
    assert_eq!(h.agent.received(0), messages);
    h.io.stop();
}

#[test]
fn outbound_order_is_preserved() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();
    h.transport.wait_for_actions(1, TIMEOUT);

    let replies: Vec<String> = (0..10).map(|n| format!(r#"{{"id":{n}}}"#)).collect();
    for reply in &replies {
        h.agent.reply(0, reply);
    }
    let actions = h.transport.wait_for_actions(1 + replies.len(), TIMEOUT);
    let sent: Vec<String> = actions
        .into_iter()
        .filter_map(|action| match action {
            MockTransportAction::Send { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(sent, replies);
    h.io.stop();
}

#[test]
fn wait_for_frontend_event_requires_sessions() {
    let h = start_bridge(false);
    assert!(!h.io.wait_for_frontend_event());
    h.io.stop();
}

#[test]
fn wait_for_frontend_event_returns_for_pending_and_posted_messages() {
    let h = start_bridge(false);
    let target_id = h.io.get_target_ids()[0].clone();
    h.transport.with_delegate(|d| d.start_session(1, &target_id));
    h.run_wakeups();

    // Pending message: no blocking.
    h.transport.with_delegate(|d| d.message_received(1, "x".into()));
    assert!(h.io.wait_for_frontend_event());
    h.run_wakeups();

    // Empty queues: blocks until the delegate posts.
    let io = h.io.clone();
    let waiter = std::thread::spawn(move || io.wait_for_frontend_event());
    std::thread::sleep(Duration::from_millis(50));
    h.transport.with_delegate(|d| d.message_received(1, "y".into()));
    assert!(waiter.join().unwrap());

    h.run_wakeups();
    h.io.stop();
}

#[test]
fn starting_twice_is_rejected() {
    let h = start_bridge(false);
    let error = h.io.start::<MockTransport>().unwrap_err();
    assert!(matches!(error, Error::AlreadyStarted));
    h.io.stop();
}
