//! Agent I: the single-threaded read/route/write cycle. Runs on the main
//! thread until shutdown is requested, then notifies every registered
//! device before returning.

use std::thread;
use std::time::{Duration, Instant};

use super::frame::{
    format_frame, shutdown_frame, Frame, COMMAND_ID, HUB_ID, REPORT_ID, REPORT_SIZE, UNASSIGNED_ID,
};
use super::queue::OutgoingQueues;
use super::registrar::Registrar;
use super::router::{route, RouteOutcome};
use super::table::DeviceRecord;
use super::Hub;
use crate::config::{Config, Verbosity, SLEEP_STEP_MS, SMART_SLEEP_WAIT};
use crate::stats::Stats;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Sleep between passes at all.
    pub plain_sleep: bool,
    /// Skip the sleep while device-to-device traffic is flowing.
    pub smart_sleep: bool,
    pub step: Duration,
}

impl RelayOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            plain_sleep: !cfg.no_sleep,
            smart_sleep: !cfg.no_smart_sleep,
            step: Duration::from_secs_f64(cfg.sleep_step_ms.unwrap_or(SLEEP_STEP_MS) / 1000.0),
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            plain_sleep: true,
            smart_sleep: true,
            step: Duration::from_secs_f64(SLEEP_STEP_MS / 1000.0),
        }
    }
}

struct IoState {
    registrar: Registrar,
    queues: OutgoingQueues,
    stats: Stats,
    verbosity: Verbosity,
    /// Start of the pass that last relayed a device-to-device message.
    last_message: Instant,
}

pub fn run(hub: &Hub, opts: &RelayOptions, verbosity: Verbosity) {
    let mut state = IoState {
        registrar: Registrar::new(),
        queues: OutgoingQueues::new(),
        stats: Stats::new(verbosity.stats),
        verbosity,
        last_message: Instant::now(),
    };
    tracing::debug!("relay loop running");

    while !hub.shutdown_requested() {
        let pass_start = Instant::now();
        pass(hub, &mut state, pass_start);
        state.stats.maybe_report();
        maybe_sleep(opts, &state, pass_start);
    }

    send_shutdown_frames(hub, verbosity);
    tracing::debug!("relay loop exiting");
}

/// One pass over the table. Records the discovery agent wants back are
/// released here; everything else gets its reads drained, the resulting
/// frames routed, any membership change broadcast, and its queue written
/// out — in that order, before the next record is touched.
fn pass(hub: &Hub, state: &mut IoState, pass_start: Instant) {
    for record in hub.table.iter() {
        if record.unregister_pending() {
            if state.verbosity.basic && record.is_registered() {
                tracing::info!(
                    id = format!("{:#04x}", record.device_id()),
                    "device unregistered (interface gone)"
                );
            }
            state.registrar.unregister(record, &mut state.queues);
            record.mark_delete_ready();
        } else {
            service_device(record, state, pass_start);
        }
    }
    hub.table.publish_iteration();
    state.stats.note_pass();
}

fn service_device(record: &DeviceRecord, state: &mut IoState, pass_start: Instant) {
    let mut frame: Frame = [0u8; REPORT_SIZE];
    loop {
        // SAFETY: this is the relay agent; the record is live (not yet
        // released), so the handle is ours alone.
        match unsafe { record.io_mut() }.read(&mut frame) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                // Treated as "device gone"; discovery will notice the
                // interface has left the enumeration.
                tracing::trace!(path = record.path(), "read failed: {e}");
                break;
            }
        }
        if state.verbosity.hub_frames && frame[0] == COMMAND_ID && frame[1] == HUB_ID {
            tracing::trace!(
                from = format!("{:#04x}", record.device_id()),
                frame = format_frame(&frame),
                "receiving"
            );
        }
        let sender_id = record.device_id();
        match route(&mut frame, record, &mut state.registrar, &mut state.queues) {
            RouteOutcome::Discarded => {
                if state.verbosity.discarded {
                    tracing::trace!(frame = format_frame(&frame), "discarding");
                }
            }
            RouteOutcome::Registered(id) => {
                state.stats.record(sender_id, HUB_ID);
                if state.verbosity.basic {
                    tracing::info!(id = format!("{id:#04x}"), "device registered");
                }
            }
            RouteOutcome::StatusEchoed(id) => {
                state.stats.record(sender_id, HUB_ID);
                state.stats.record(HUB_ID, id);
            }
            RouteOutcome::RegistrationFull => {
                state.stats.record(sender_id, HUB_ID);
                if state.verbosity.basic {
                    tracing::info!("registration rejected: member table is full");
                }
            }
            RouteOutcome::Unregistered(id) => {
                state.stats.record(sender_id, HUB_ID);
                if state.verbosity.basic {
                    tracing::info!(id = format!("{id:#04x}"), "device unregistered");
                }
            }
            RouteOutcome::Relayed {
                origin,
                destination,
            } => {
                state.stats.record(origin, destination);
                state.last_message = pass_start;
            }
            RouteOutcome::Dropped => {}
        }
    }

    if state.registrar.membership_changed() {
        broadcast_status(state);
    }

    drain_outgoing(record, state);
}

/// Status frames for every current member, each with its own id in byte 2.
fn broadcast_status(state: &mut IoState) {
    for i in 0..state.registrar.member_count() {
        let id = state.registrar.members()[i];
        let status = state.registrar.status_frame(id);
        state.queues.push(id, status);
        state.stats.record(HUB_ID, id);
    }
    state.registrar.clear_membership_changed();
}

fn drain_outgoing(record: &DeviceRecord, state: &mut IoState) {
    let id = record.device_id();
    if id == UNASSIGNED_ID {
        return;
    }
    while let Some(frame) = state.queues.pop(id) {
        let hub_traffic = frame[1] == HUB_ID;
        if (state.verbosity.hub_frames && hub_traffic)
            || (state.verbosity.device_frames && !hub_traffic)
        {
            tracing::trace!(
                to = format!("{id:#04x}"),
                frame = format_frame(&frame),
                "sending"
            );
        }
        // SAFETY: relay agent, live record.
        if let Err(e) = unsafe { record.io_mut() }.write(&with_report_id(&frame)) {
            // The frame is lost; no retry.
            tracing::trace!(path = record.path(), "write failed: {e}");
        }
    }
}

/// Notify every registered device that the hub is going away. Runs on the
/// relay agent's thread as its last act before cleanup.
fn send_shutdown_frames(hub: &Hub, verbosity: Verbosity) {
    let wire = with_report_id(&shutdown_frame());
    for record in hub.table.iter() {
        if !record.is_registered() {
            continue;
        }
        if verbosity.hub_frames {
            tracing::trace!(
                to = format!("{:#04x}", record.device_id()),
                "sending shutdown frame"
            );
        }
        // SAFETY: the relay loop has stopped; this thread is still the
        // sole user of live handles.
        if let Err(e) = unsafe { record.io_mut() }.write(&wire) {
            tracing::trace!(path = record.path(), "write failed: {e}");
        }
    }
}

/// Host→device transmissions carry a leading report-id byte.
fn with_report_id(frame: &Frame) -> [u8; REPORT_SIZE + 1] {
    let mut wire = [0u8; REPORT_SIZE + 1];
    wire[0] = REPORT_ID;
    wire[1..].copy_from_slice(frame);
    wire
}

fn maybe_sleep(opts: &RelayOptions, state: &IoState, pass_start: Instant) {
    if !opts.plain_sleep {
        return;
    }
    if opts.smart_sleep && pass_start.duration_since(state.last_message) < SMART_SLEEP_WAIT {
        return;
    }
    thread::sleep(opts.step);
}
