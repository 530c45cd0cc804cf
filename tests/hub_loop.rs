//! Whole-engine tests: discovery and relay agents running against the
//! mock backend, observed from the device side of the wire.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hidhub::config::Verbosity;
use hidhub::hid::mock::{MockBackend, MockEndpoint};
use hidhub::hub::frame::{Frame, COMMAND_ID, HUB_ID, REPORT_SIZE, UNASSIGNED_ID};
use hidhub::hub::relay::RelayOptions;
use hidhub::hub::{discovery, relay};
use hidhub::Hub;

const DEADLINE: Duration = Duration::from_secs(5);

struct RunningHub {
    hub: Arc<Hub>,
    discovery: Option<JoinHandle<()>>,
    relay: Option<JoinHandle<()>>,
}

fn start(backend: &MockBackend) -> RunningHub {
    let hub = Arc::new(Hub::new());

    let discovery = {
        let hub = Arc::clone(&hub);
        let mut backend = backend.clone();
        thread::spawn(move || {
            discovery::run(
                &hub,
                &mut backend,
                Duration::from_millis(10),
                Verbosity::default(),
            )
        })
    };
    let relay = {
        let hub = Arc::clone(&hub);
        let opts = RelayOptions {
            plain_sleep: true,
            smart_sleep: false,
            step: Duration::from_millis(1),
        };
        thread::spawn(move || relay::run(&hub, &opts, Verbosity::default()))
    };

    RunningHub {
        hub,
        discovery: Some(discovery),
        relay: Some(relay),
    }
}

impl RunningHub {
    fn stop(&mut self) {
        self.hub.request_shutdown();
        if let Some(handle) = self.relay.take() {
            handle.join().unwrap();
        }
        if let Some(handle) = self.discovery.take() {
            handle.join().unwrap();
        }
        self.hub.table.clear();
    }
}

impl Drop for RunningHub {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

fn registration() -> Frame {
    let mut f = [0u8; REPORT_SIZE];
    f[0] = COMMAND_ID;
    f[1] = HUB_ID;
    f[2] = 0x01;
    f
}

fn unregistration() -> Frame {
    let mut f = [0u8; REPORT_SIZE];
    f[0] = COMMAND_ID;
    f[1] = HUB_ID;
    f
}

fn status(recipient: u8, others: &[u8]) -> Frame {
    let mut f = [0u8; REPORT_SIZE];
    f[0] = COMMAND_ID;
    f[1] = HUB_ID;
    f[2] = recipient;
    for i in 3..REPORT_SIZE {
        f[i] = UNASSIGNED_ID;
    }
    f[3..3 + others.len()].copy_from_slice(others);
    f
}

/// Register a device and wait until the hub has answered with the
/// expected status frame.
fn join_hub(endpoint: &Arc<MockEndpoint>, expected: Frame) {
    endpoint.send(registration());
    wait_for("status frame", || endpoint.received().contains(&expected));
}

#[test]
fn lone_device_registers_and_hears_the_shutdown() {
    let backend = MockBackend::new();
    let a = backend.attach("p1");
    let mut running = start(&backend);

    join_hub(&a, status(1, &[]));

    running.stop();
    let frames = a.received();
    let mut shutdown = [0u8; REPORT_SIZE];
    shutdown[0] = COMMAND_ID;
    shutdown[1] = HUB_ID;
    shutdown[2] = UNASSIGNED_ID;
    assert_eq!(frames.last(), Some(&shutdown));
    // Every transmission carried the leading zero report id.
    assert!(a.raw_writes().iter().all(|w| w.len() == 33 && w[0] == 0));
}

#[test]
fn late_arrival_triggers_a_full_membership_broadcast() {
    let backend = MockBackend::new();
    let a = backend.attach("p1");
    let mut running = start(&backend);
    join_hub(&a, status(1, &[]));

    let b = backend.attach("p2");
    join_hub(&b, status(2, &[1]));
    wait_for("updated status at the first device", || {
        a.received().contains(&status(1, &[2]))
    });

    running.stop();
}

#[test]
fn messages_are_relayed_with_the_origin_id_in_order() {
    let backend = MockBackend::new();
    let a = backend.attach("p1");
    let b = backend.attach("p2");
    let mut running = start(&backend);
    join_hub(&a, status(1, &[]));
    join_hub(&b, status(2, &[1]));

    let mut first = [0u8; REPORT_SIZE];
    first[0] = COMMAND_ID;
    first[1] = 2;
    for i in 2..REPORT_SIZE {
        first[i] = 0x10 + (i as u8 - 2);
    }
    let mut second = first;
    second[2] = 0x77;
    a.send(first);
    a.send(second);

    let mut expected_first = first;
    expected_first[1] = 1;
    let mut expected_second = second;
    expected_second[1] = 1;
    wait_for("both relayed frames", || {
        let got = b.received();
        got.contains(&expected_first) && got.contains(&expected_second)
    });

    let got = b.received();
    let first_at = got.iter().position(|f| *f == expected_first).unwrap();
    let second_at = got.iter().position(|f| *f == expected_second).unwrap();
    assert!(first_at < second_at, "relay must preserve send order");
    assert!(
        a.received().iter().all(|f| f[1] == HUB_ID),
        "nothing but hub traffic may reach the sender"
    );

    running.stop();
}

#[test]
fn voluntary_unregistration_notifies_the_others_only() {
    let backend = MockBackend::new();
    let a = backend.attach("p1");
    let b = backend.attach("p2");
    let c = backend.attach("p3");
    let mut running = start(&backend);
    join_hub(&a, status(1, &[]));
    join_hub(&b, status(2, &[1]));
    join_hub(&c, status(3, &[2, 1]));
    // Wait until the three-member broadcast has fully drained so the
    // frame count below cannot race a pending status write.
    wait_for("three-member status at the second device", || {
        b.received().contains(&status(2, &[1, 3]))
    });

    let b_frames_before = b.received().len();
    b.send(unregistration());

    wait_for("departure broadcast", || {
        a.received().contains(&status(1, &[3])) && c.received().contains(&status(3, &[1]))
    });
    assert_eq!(b.received().len(), b_frames_before);

    running.stop();
}

#[test]
fn unplugged_device_is_retired_and_its_handle_closed() {
    let backend = MockBackend::new();
    let a = backend.attach("p1");
    let b = backend.attach("p2");
    let mut running = start(&backend);
    join_hub(&a, status(1, &[]));
    join_hub(&b, status(2, &[1]));

    backend.detach("p2");
    wait_for("handle closed", || b.is_closed());
    wait_for("remaining member notified", || {
        a.received().contains(&status(1, &[]))
            && a.received().iter().filter(|f| **f == status(1, &[])).count() >= 2
    });

    running.stop();
}

#[test]
fn unopenable_and_foreign_interfaces_are_ignored() {
    let backend = MockBackend::new();
    backend.attach_unopenable("bad");
    let other = backend.attach_with("other-usage", 0x1234, 0x01);
    let a = backend.attach("p1");
    let mut running = start(&backend);

    join_hub(&a, status(1, &[]));
    assert!(other.received().is_empty());
    assert!(!other.is_closed());

    running.stop();
}

#[test]
fn failing_reads_do_not_stall_the_other_devices() {
    let backend = MockBackend::new();
    let a = backend.attach("p1");
    let b = backend.attach("p2");
    let mut running = start(&backend);
    join_hub(&a, status(1, &[]));
    join_hub(&b, status(2, &[1]));

    b.fail_reads();
    // The broken device stays open until discovery retires it; meanwhile
    // traffic from the healthy one keeps flowing.
    a.send(registration());
    wait_for("echo to the healthy device", || {
        a.received()
            .iter()
            .filter(|f| **f == status(1, &[2]))
            .count()
            >= 2
    });

    running.stop();
}
