//! End-to-end scenarios against a scripted controller stick. The mock
//! port plays the stick's side of the serial conversation byte for
//! byte, so these tests exercise framing, the send state machine, the
//! interview pipeline, dispatch, and persistence together.

use homewave_core::checksum::frame_checksum;
use homewave_core::prelude::*;
use homewave_driver::{Manager, ManagerOptions};
use homewave_serial::frame::RawFrame;
use homewave_serial::port::{MockPort, MockRemote};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const HOME: HomeId = HomeId::new(0xc0ffee01);

type Log = Arc<Mutex<Vec<Notification>>>;

fn data_frame(kind: u8, function: u8, payload: &[u8]) -> RawFrame {
    let mut bytes = vec![0x01, (payload.len() + 3) as u8, kind, function];
    bytes.extend_from_slice(payload);
    bytes.push(frame_checksum(&bytes[1..]));
    RawFrame::Data(bytes.into())
}

fn response(function: u8, payload: &[u8]) -> RawFrame {
    data_frame(0x01, function, payload)
}

fn request(function: u8, payload: &[u8]) -> RawFrame {
    data_frame(0x00, function, payload)
}

struct Stick {
    remote: MockRemote,
}

impl Stick {
    fn inject(&self, frame: RawFrame) {
        self.remote.inject(frame);
    }

    /// The next data frame the driver wrote, skipping the ACKs it emits
    /// for our own frames.
    async fn next_data(&mut self) -> Vec<u8> {
        loop {
            match self.remote.written().await.expect("driver closed the port") {
                RawFrame::Data(bytes) => return bytes.to_vec(),
                _ => continue,
            }
        }
    }

    /// Receives the driver's next request and ACKs it like a stick
    /// would.
    async fn expect_request(&mut self) -> Vec<u8> {
        let bytes = self.next_data().await;
        self.inject(RawFrame::Ack);
        bytes
    }

    /// Answers an already-ACKed ZW_SEND_DATA frame: accepted response,
    /// then the transmit-ok callback with the echoed id.
    fn complete_send(&self, send_frame: &[u8]) {
        self.inject(response(0x13, &[0x01]));
        let callback_id = send_frame[send_frame.len() - 2];
        self.inject(request(0x13, &[callback_id, 0x00]));
    }

    /// Drains already-written frames, asserting none of them carried
    /// data.
    fn assert_no_data_written(&mut self) {
        while let Some(frame) = self.remote.try_written() {
            assert!(
                !matches!(frame, RawFrame::Data(_)),
                "unexpected outbound frame: {:?}",
                frame
            );
        }
    }
}

fn new_manager(user_path: PathBuf, port_name: &str) -> (Manager, Stick, Log) {
    std::fs::create_dir_all(&user_path).unwrap();
    let manager = Manager::new(ManagerOptions::builder().user_path(user_path).build());

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    manager.add_watcher(Box::new(move |notification| {
        sink.lock().unwrap().push(notification.clone());
    }));

    let (port, remote) = MockPort::pair();
    assert!(manager.add_driver_with(port, port_name));
    (manager, Stick { remote }, log)
}

fn fresh_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("homewave-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Lets the driver actor and its tasks drain their queues without
/// letting virtual time advance.
async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

async fn wait_until(log: &Log, what: &str, pred: impl Fn(&[Notification]) -> bool) {
    for _ in 0..2000 {
        if pred(&log.lock().unwrap()) {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("never saw {}; got {:#?}", what, log.lock().unwrap());
}

/// Answers GET_VERSION, MEMORY_GET_ID and GET_INIT_DATA with a network
/// containing exactly `nodes`.
async fn boot(stick: &mut Stick, nodes: &[u8]) {
    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x15, "expected GET_VERSION");
    stick.inject(response(0x15, b"Z-Wave 3.95\x00\x01"));

    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x20, "expected MEMORY_GET_ID");
    stick.inject(response(0x20, &[0xc0, 0xff, 0xee, 0x01, 0x01]));

    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x02, "expected GET_INIT_DATA");
    stick.inject(response(0x02, &init_data_payload(nodes)));
}

fn init_data_payload(nodes: &[u8]) -> Vec<u8> {
    let mut mask = [0u8; 29];
    for &node in nodes {
        mask[((node - 1) / 8) as usize] |= 1 << ((node - 1) % 8);
    }
    let mut payload = vec![0x05, 0x00, 29];
    payload.extend_from_slice(&mask);
    payload
}

/// Walks node 2, a mains-powered binary switch, through its entire
/// interview. NIF advertises BinarySwitch only.
async fn interview_switch(stick: &mut Stick, node: u8, report_level: u8) {
    let req = stick.expect_request().await;
    assert_eq!(&req[3..5], &[0x41, node], "expected GET_NODE_PROTOCOL_INFO");
    stick.inject(response(0x41, &[0xd3, 0x1c, 0x00, 0x04, 0x10, 0x01]));

    let req = stick.expect_request().await;
    assert_eq!(&req[3..5], &[0x60, node], "expected REQUEST_NODE_INFO");
    stick.inject(response(0x60, &[0x01]));
    stick.inject(request(0x49, &[0x84, node, 0x04, 0x04, 0x10, 0x01, 0x25]));

    // Dynamic stage: SwitchBinary::Get
    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x13, "expected SEND_DATA");
    assert_eq!(&req[4..8], &[node, 0x02, 0x25, 0x02]);
    stick.complete_send(&req);
    stick.inject(request(0x04, &[0x00, node, 0x03, 0x25, 0x03, report_level]));
}

fn switch_value_id(node: u8) -> ValueId {
    ValueId::new(
        HOME,
        NodeId::new(node),
        ValueGenre::User,
        0x25,
        1,
        0,
        ValueType::Bool,
    )
}

fn changed_count(log: &Log, value_id: &ValueId) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .filter(|n| matches!(n, Notification::ValueChanged { value_id: id } if id == value_id))
        .count()
}

fn assert_subsequence(log: &Log, expected: &[&Notification]) {
    let seen = log.lock().unwrap();
    let mut cursor = 0;
    for notification in seen.iter() {
        if cursor < expected.len() && notification == expected[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expected.len(),
        "missing {:?} in {:#?}",
        expected[cursor],
        seen
    );
}

#[tokio::test(start_paused = true)]
async fn fresh_interview_of_a_binary_switch() {
    let (manager, mut stick, log) = new_manager(fresh_dir("s1"), "mock0");
    let node = NodeId::new(2);

    boot(&mut stick, &[2]).await;
    interview_switch(&mut stick, 2, 0x00).await;

    wait_until(&log, "NodeQueriesComplete", |seen| {
        seen.iter().any(|n| {
            matches!(n, Notification::NodeQueriesComplete { node_id, .. } if *node_id == node)
        })
    })
    .await;

    assert_subsequence(
        &log,
        &[
            &Notification::DriverReady {
                home_id: HOME,
                controller_node: NodeId::new(1),
            },
            &Notification::NodeAdded {
                home_id: HOME,
                node_id: node,
            },
            &Notification::NodeProtocolInfo {
                home_id: HOME,
                node_id: node,
            },
            &Notification::ValueAdded {
                value_id: switch_value_id(2),
            },
            &Notification::NodeQueriesComplete {
                home_id: HOME,
                node_id: node,
            },
        ],
    );

    // Every value the node owns carries its ids
    for value_id in manager.get_all_values(HOME, node) {
        assert_eq!(value_id.node_id(), node);
        assert_eq!(value_id.home_id(), HOME);
    }

    assert!(manager.is_node_listening(HOME, node));
    assert_eq!(manager.get_node_max_baud_rate(HOME, node), 40_000);
    assert_eq!(manager.get_value_as_bool(&switch_value_id(2)), Some(false));
}

#[tokio::test(start_paused = true)]
async fn interview_of_a_switch_that_also_speaks_basic() {
    let (manager, mut stick, log) = new_manager(fresh_dir("s1b"), "mock0");
    let node = NodeId::new(2);
    let switch = switch_value_id(2);

    boot(&mut stick, &[2]).await;

    let req = stick.expect_request().await;
    assert_eq!(&req[3..5], &[0x41, 2], "expected GET_NODE_PROTOCOL_INFO");
    stick.inject(response(0x41, &[0xd3, 0x1c, 0x00, 0x04, 0x10, 0x01]));

    let req = stick.expect_request().await;
    assert_eq!(&req[3..5], &[0x60, 2], "expected REQUEST_NODE_INFO");
    stick.inject(response(0x60, &[0x01]));
    // NIF advertises Basic and BinarySwitch, the common real-device combination
    stick.inject(request(0x49, &[0x84, 2, 0x05, 0x04, 0x10, 0x01, 0x20, 0x25]));

    // Dynamic stage: Basic defers to the actuator class, so the only
    // query on the wire is SwitchBinary::Get
    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x13, "expected SEND_DATA");
    assert_eq!(&req[4..8], &[2, 0x02, 0x25, 0x02]);
    stick.complete_send(&req);
    stick.inject(request(0x04, &[0x00, 2, 0x03, 0x25, 0x03, 0x00]));

    wait_until(&log, "NodeQueriesComplete", |seen| {
        seen.iter().any(|n| {
            matches!(n, Notification::NodeQueriesComplete { node_id, .. } if *node_id == node)
        })
    })
    .await;

    // The device answered everything it was asked; nothing timed out
    assert!(!log.lock().unwrap().iter().any(|n| {
        matches!(
            n,
            Notification::Event {
                code: NotificationCode::Timeout,
                ..
            }
        )
    }));

    // Both classes created their values
    let values = manager.get_all_values(HOME, node);
    assert!(values.iter().any(|id| id.command_class_id() == 0x20));
    assert!(values.iter().any(|id| id.command_class_id() == 0x25));

    // An unsolicited Basic report lands on the switch value
    let baseline = changed_count(&log, &switch);
    stick.inject(request(0x04, &[0x00, 2, 0x03, 0x20, 0x03, 0xff]));
    wait_until(&log, "remapped Basic report", |_| {
        changed_count(&log, &switch) == baseline + 1
    })
    .await;
    assert_eq!(manager.get_value_as_bool(&switch), Some(true));
}

#[tokio::test(start_paused = true)]
async fn optimistic_set_confirms_idempotently_and_reverts() {
    let (manager, mut stick, log) = new_manager(fresh_dir("s2"), "mock0");
    let switch = switch_value_id(2);

    boot(&mut stick, &[2]).await;
    interview_switch(&mut stick, 2, 0x00).await;
    wait_until(&log, "interview", |seen| {
        seen.iter()
            .any(|n| matches!(n, Notification::NodeQueriesComplete { .. }))
    })
    .await;

    let baseline = changed_count(&log, &switch);

    assert!(manager.set_value_bool(&switch, true));
    let req = stick.expect_request().await;
    assert_eq!(&req[4..9], &[0x02, 0x03, 0x25, 0x01, 0xff]);

    // The local value flipped before the device ever answered
    assert_eq!(changed_count(&log, &switch), baseline + 1);
    assert_eq!(manager.get_value_as_bool(&switch), Some(true));
    stick.complete_send(&req);

    // Confirming report: idempotent, no second notification
    stick.inject(request(0x04, &[0x00, 0x02, 0x03, 0x25, 0x03, 0xff]));
    settle().await;
    assert_eq!(changed_count(&log, &switch), baseline + 1);

    // Contradicting report: the device wins
    stick.inject(request(0x04, &[0x00, 0x02, 0x03, 0x25, 0x03, 0x00]));
    wait_until(&log, "revert", |_| changed_count(&log, &switch) == baseline + 2).await;
    assert_eq!(manager.get_value_as_bool(&switch), Some(false));
}

#[tokio::test(start_paused = true)]
async fn sleeping_node_buffers_until_wake_up() {
    let (manager, mut stick, log) = new_manager(fresh_dir("s3"), "mock0");
    let node = NodeId::new(3);

    boot(&mut stick, &[3]).await;

    // Battery sensor: not listening
    let req = stick.expect_request().await;
    assert_eq!(&req[3..5], &[0x41, 3]);
    stick.inject(response(0x41, &[0x53, 0x1c, 0x00, 0x04, 0x21, 0x01]));

    // The interview parks: nothing may be transmitted to a sleeping node
    settle().await;
    stick.assert_no_data_written();
    assert!(!manager.is_node_listening(HOME, node));

    // First wake-up: the interview resumes
    stick.inject(request(0x04, &[0x00, 3, 0x02, 0x84, 0x07]));
    let req = stick.expect_request().await;
    assert_eq!(&req[3..5], &[0x60, 3]);
    stick.inject(response(0x60, &[0x01]));
    stick.inject(request(0x49, &[0x84, 3, 0x05, 0x04, 0x21, 0x01, 0x70, 0x84]));

    // Session stage: WakeUp::IntervalGet
    let req = stick.expect_request().await;
    assert_eq!(&req[4..8], &[3, 0x02, 0x84, 0x05]);
    stick.complete_send(&req);
    stick.inject(request(0x04, &[0x00, 3, 0x04, 0x84, 0x06, 0x00, 0x02, 0x58]));

    // Interview done; the node is told it may sleep again
    let req = stick.expect_request().await;
    assert_eq!(&req[4..8], &[3, 0x02, 0x84, 0x08], "expected NO_MORE_INFORMATION");
    stick.complete_send(&req);
    wait_until(&log, "interview", |seen| {
        seen.iter()
            .any(|n| matches!(n, Notification::NodeQueriesComplete { .. }))
    })
    .await;

    let interval_id = ValueId::new(
        HOME,
        node,
        ValueGenre::System,
        0x84,
        1,
        0,
        ValueType::Int,
    );
    assert_eq!(manager.get_value_as_int(&interval_id), Some(600));

    // A config write while asleep produces zero bytes on the wire
    assert!(manager.set_config_param(HOME, node, 2, 1));
    settle().await;
    stick.assert_no_data_written();

    // Next wake-up: the buffered frame goes out, then NO_MORE_INFORMATION
    stick.inject(request(0x04, &[0x00, 3, 0x02, 0x84, 0x07]));
    let req = stick.expect_request().await;
    assert_eq!(
        &req[4..11],
        &[3, 0x05, 0x70, 0x04, 0x02, 0x01, 0x01],
        "expected the buffered Configuration::Set"
    );
    stick.complete_send(&req);

    let req = stick.expect_request().await;
    assert_eq!(&req[4..8], &[3, 0x02, 0x84, 0x08]);
    stick.complete_send(&req);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_fails_the_message_and_advances_the_queue() {
    let (manager, mut stick, log) = new_manager(fresh_dir("s4"), "mock0");
    let switch = switch_value_id(2);

    boot(&mut stick, &[2]).await;
    interview_switch(&mut stick, 2, 0x00).await;
    wait_until(&log, "interview", |seen| {
        seen.iter()
            .any(|n| matches!(n, Notification::NodeQueriesComplete { .. }))
    })
    .await;

    assert!(manager.set_value_bool(&switch, true));
    assert!(manager.set_value_bool(&switch, false));

    // Three NAKs exhaust the attempts; retries reuse the callback id
    let first = stick.next_data().await;
    assert_eq!(&first[6..9], &[0x25, 0x01, 0xff]);
    stick.inject(RawFrame::Nak);
    assert_eq!(stick.next_data().await, first);
    stick.inject(RawFrame::Nak);
    assert_eq!(stick.next_data().await, first);
    stick.inject(RawFrame::Nak);

    wait_until(&log, "MessageFailed for node 2", |seen| {
        seen.iter().any(|n| {
            matches!(
                n,
                Notification::Event {
                    node_id,
                    code: NotificationCode::MessageFailed,
                    ..
                } if *node_id == NodeId::new(2)
            )
        })
    })
    .await;

    // The scheduler moved on to the next queued message
    let second = stick.expect_request().await;
    assert_eq!(&second[6..9], &[0x25, 0x01, 0x00]);
    stick.complete_send(&second);
}

#[tokio::test(start_paused = true)]
async fn persisted_topology_survives_a_restart() {
    let dir = fresh_dir("s5");
    let switch = switch_value_id(2);

    {
        let (manager, mut stick, log) = new_manager(dir.clone(), "mock0");
        boot(&mut stick, &[2]).await;
        interview_switch(&mut stick, 2, 0xff).await;
        wait_until(&log, "interview", |seen| {
            seen.iter()
                .any(|n| matches!(n, Notification::NodeQueriesComplete { .. }))
        })
        .await;
        assert_eq!(manager.get_value_as_bool(&switch), Some(true));

        manager.write_config_and_wait(HOME).await.unwrap();
        assert!(manager.remove_driver("mock0"));
    }

    // A new manager on the same user path sees the node before any
    // interview traffic
    let (manager, mut stick, log) = new_manager(dir, "mock1");

    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x15);
    stick.inject(response(0x15, b"Z-Wave 3.95\x00\x01"));
    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x20);
    stick.inject(response(0x20, &[0xc0, 0xff, 0xee, 0x01, 0x01]));

    // The next frame on the wire is the init-data request; by then the
    // restored topology is already visible
    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x02);
    assert!(log.lock().unwrap().iter().any(|n| {
        matches!(n, Notification::NodeAdded { node_id, .. } if *node_id == NodeId::new(2))
    }));
    assert_eq!(manager.get_value_as_bool(&switch), Some(true));
    assert!(manager.is_node_listening(HOME, NodeId::new(2)));

    stick.inject(response(0x02, &init_data_payload(&[2])));

    // A restored, fully interviewed node only refreshes dynamic values
    let req = stick.expect_request().await;
    assert_eq!(&req[4..8], &[0x02, 0x02, 0x25, 0x02]);
    stick.complete_send(&req);
    stick.inject(request(0x04, &[0x00, 0x02, 0x03, 0x25, 0x03, 0xff]));

    wait_until(&log, "refresh", |seen| {
        seen.iter()
            .any(|n| matches!(n, Notification::NodeQueriesComplete { .. }))
    })
    .await;
    // The preserved payload matched the device, so nothing changed
    assert_eq!(changed_count(&log, &switch), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_inclusion_fails_and_traffic_resumes() {
    let (manager, mut stick, log) = new_manager(fresh_dir("s6"), "mock0");

    boot(&mut stick, &[]).await;
    wait_until(&log, "AllNodesQueried", |seen| {
        seen.iter()
            .any(|n| matches!(n, Notification::AllNodesQueried { .. }))
    })
    .await;

    let states: Arc<Mutex<Vec<ControllerState>>> = Arc::new(Mutex::new(Vec::new()));
    let states_sink = states.clone();
    assert!(manager.begin_controller_command(
        HOME,
        ControllerCommand::AddDevice,
        Box::new(move |state| states_sink.lock().unwrap().push(state)),
        false,
    ));

    // The inclusion frame goes out; nothing has happened yet
    let req = stick.next_data().await;
    assert_eq!(req[3], 0x4a);
    assert_eq!(req[4], 0x01, "expected ADD_NODE_ANY");

    assert!(manager.cancel_controller_command(HOME));

    // The stop frame follows; the stick confirms idle
    let stop = stick.next_data().await;
    assert_eq!(stop[3], 0x4a);
    assert_eq!(stop[4], 0x05, "expected ADD_NODE_STOP");
    stick.inject(RawFrame::Ack);
    stick.inject(request(0x4a, &[stop[5], 0x06, 0x00]));

    settle().await;
    assert_eq!(
        *states.lock().unwrap(),
        vec![ControllerState::Starting, ControllerState::Failed]
    );

    // Normal traffic resumes
    assert!(manager.soft_reset(HOME));
    let req = stick.expect_request().await;
    assert_eq!(req[3], 0x08, "expected SERIAL_API_SOFT_RESET");
}
