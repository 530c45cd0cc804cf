//! Takes one inbound frame and turns it into registrar calls and queue
//! pushes. The relay loop acts on the returned outcome (stats, verbose
//! logging, smart-sleep bookkeeping) so the routing itself stays pure
//! enough to test in isolation.

use super::frame::{classify, Frame, FrameKind, UNASSIGNED_ID};
use super::queue::OutgoingQueues;
use super::registrar::{RegisterOutcome, Registrar};
use super::table::DeviceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Wrong command id; not our traffic.
    Discarded,
    /// Fresh registration; status frames for everyone follow via the
    /// membership-changed flag.
    Registered(u8),
    /// Repeat registration; a single status frame was queued back to the
    /// sender.
    StatusEchoed(u8),
    /// Registration rejected: the member table is full.
    RegistrationFull,
    /// The sender gave up its id; broadcast follows via the flag.
    Unregistered(u8),
    /// Device-to-device frame queued for delivery, header rewritten.
    Relayed { origin: u8, destination: u8 },
    /// Well-formed hub frame that asks nothing of us, or a message from or
    /// to a device that is not registered.
    Dropped,
}

pub fn route(
    frame: &mut Frame,
    record: &DeviceRecord,
    registrar: &mut Registrar,
    queues: &mut OutgoingQueues,
) -> RouteOutcome {
    match classify(frame) {
        FrameKind::Foreign => RouteOutcome::Discarded,
        FrameKind::Registration => match registrar.register(record) {
            RegisterOutcome::Newly(id) => RouteOutcome::Registered(id),
            RegisterOutcome::AlreadyRegistered(id) => {
                // Membership did not change, so only the sender hears back.
                queues.push(id, registrar.status_frame(id));
                RouteOutcome::StatusEchoed(id)
            }
            RegisterOutcome::Full => RouteOutcome::RegistrationFull,
        },
        FrameKind::Unregistration => {
            let id = record.device_id();
            if id == UNASSIGNED_ID {
                return RouteOutcome::Dropped;
            }
            registrar.unregister(record, queues);
            RouteOutcome::Unregistered(id)
        }
        FrameKind::Message { destination } => {
            let origin = record.device_id();
            if origin == UNASSIGNED_ID || !registrar.is_assigned(destination) {
                return RouteOutcome::Dropped;
            }
            frame[1] = origin;
            queues.push(destination, *frame);
            RouteOutcome::Relayed {
                origin,
                destination,
            }
        }
        FrameKind::HubOther => RouteOutcome::Dropped,
    }
}
