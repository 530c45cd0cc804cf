//! Id allocation and membership. Relay-agent private.

use super::frame::{
    hub_frame, id_is_valid, Frame, DEVICE_ID_COUNT, MAX_REGISTERED, UNASSIGNED_ID,
};
use super::queue::OutgoingQueues;
use super::table::DeviceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A fresh id was handed out; membership changed.
    Newly(u8),
    /// The record already held an id; nothing changed.
    AlreadyRegistered(u8),
    /// The table is at capacity; the request is dropped.
    Full,
}

pub struct Registrar {
    /// The first `count` entries are live ids; the rest stay `UNASSIGNED_ID`
    /// so the array doubles as the padded member block of a status frame.
    assigned: [u8; MAX_REGISTERED],
    count: usize,
    in_use: [bool; DEVICE_ID_COUNT],
    /// Round-robin allocation cursor. Advances past every id it hands out
    /// and wraps at the reserved hub id, so freshly freed ids are not
    /// reused immediately.
    next_candidate: u8,
    membership_changed: bool,
}

impl Registrar {
    pub fn new() -> Self {
        Self {
            assigned: [UNASSIGNED_ID; MAX_REGISTERED],
            count: 0,
            in_use: [false; DEVICE_ID_COUNT],
            next_candidate: 1,
            membership_changed: false,
        }
    }

    pub fn member_count(&self) -> usize {
        self.count
    }

    pub fn members(&self) -> &[u8] {
        &self.assigned[..self.count]
    }

    pub fn is_assigned(&self, id: u8) -> bool {
        id_is_valid(id) && self.in_use[id as usize]
    }

    pub fn membership_changed(&self) -> bool {
        self.membership_changed
    }

    /// Relay agent calls this once it has broadcast status frames to every
    /// current member.
    pub fn clear_membership_changed(&mut self) {
        self.membership_changed = false;
    }

    pub fn register(&mut self, record: &DeviceRecord) -> RegisterOutcome {
        if record.is_registered() {
            return RegisterOutcome::AlreadyRegistered(record.device_id());
        }
        if self.count == MAX_REGISTERED {
            return RegisterOutcome::Full;
        }
        let id = self.next_candidate;
        record.set_device_id(id);
        self.in_use[id as usize] = true;
        while self.in_use[self.next_candidate as usize] {
            self.next_candidate = (self.next_candidate + 1) % DEVICE_ID_COUNT as u8;
        }
        self.assigned[self.count] = id;
        self.count += 1;
        self.membership_changed = true;
        RegisterOutcome::Newly(id)
    }

    /// Releases the record's id, discards its pending outgoing frames and
    /// flags the membership change. No-op for unregistered records.
    pub fn unregister(&mut self, record: &DeviceRecord, queues: &mut OutgoingQueues) {
        let id = record.device_id();
        if id == UNASSIGNED_ID {
            return;
        }
        queues.clear(id);
        for i in 0..self.count {
            if self.assigned[i] == id {
                self.assigned[i] = self.assigned[self.count - 1];
                self.assigned[self.count - 1] = UNASSIGNED_ID;
                break;
            }
        }
        self.in_use[id as usize] = false;
        self.count -= 1;
        record.set_device_id(UNASSIGNED_ID);
        self.membership_changed = true;
    }

    /// Status frame for one member: byte 2 is always the recipient's own
    /// id, the other members follow, and the rest of the block is padded
    /// with `UNASSIGNED_ID`. Devices rely on "byte 2 is me".
    pub fn status_frame(&self, recipient: u8) -> Frame {
        let mut frame = hub_frame();
        frame[2..2 + MAX_REGISTERED].copy_from_slice(&self.assigned);
        for i in 3..2 + self.count {
            if frame[i] == recipient {
                frame[i] = frame[2];
                frame[2] = recipient;
                break;
            }
        }
        frame
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::{DeviceIo, HidError};
    use crate::hub::frame::{COMMAND_ID, HUB_ID, REPORT_SIZE};

    struct NullIo;

    impl DeviceIo for NullIo {
        fn read(&mut self, _buf: &mut [u8; REPORT_SIZE]) -> Result<usize, HidError> {
            Ok(0)
        }
        fn write(&mut self, data: &[u8]) -> Result<usize, HidError> {
            Ok(data.len())
        }
    }

    fn record(path: &str) -> DeviceRecord {
        DeviceRecord::new(Box::new(NullIo), path)
    }

    #[test]
    fn ids_start_at_one_and_count_up() {
        let mut reg = Registrar::new();
        let a = record("a");
        let b = record("b");
        assert_eq!(reg.register(&a), RegisterOutcome::Newly(1));
        assert_eq!(reg.register(&b), RegisterOutcome::Newly(2));
        assert!(reg.is_assigned(1));
        assert!(reg.is_assigned(2));
        assert_eq!(reg.member_count(), 2);
    }

    #[test]
    fn reregistration_changes_nothing() {
        let mut reg = Registrar::new();
        let a = record("a");
        reg.register(&a);
        reg.clear_membership_changed();
        assert_eq!(reg.register(&a), RegisterOutcome::AlreadyRegistered(1));
        assert_eq!(reg.member_count(), 1);
        assert!(!reg.membership_changed());
    }

    #[test]
    fn thirty_first_registration_is_rejected() {
        let mut reg = Registrar::new();
        let records: Vec<_> = (0..MAX_REGISTERED).map(|i| record(&format!("p{i}"))).collect();
        for r in &records {
            assert!(matches!(reg.register(r), RegisterOutcome::Newly(_)));
        }
        let extra = record("extra");
        assert_eq!(reg.register(&extra), RegisterOutcome::Full);
        assert!(!extra.is_registered());
        assert_eq!(reg.member_count(), MAX_REGISTERED);
    }

    #[test]
    fn unregister_swaps_with_last_and_frees_the_id() {
        let mut reg = Registrar::new();
        let mut queues = OutgoingQueues::new();
        let a = record("a");
        let b = record("b");
        let c = record("c");
        reg.register(&a);
        reg.register(&b);
        reg.register(&c);
        queues.push(2, [0u8; REPORT_SIZE]);

        reg.unregister(&b, &mut queues);
        assert_eq!(reg.members(), [1, 3]);
        assert!(!reg.is_assigned(2));
        assert!(!b.is_registered());
        assert!(queues.is_empty(2));
        assert_eq!(reg.member_count(), 2);
    }

    #[test]
    fn unregistering_an_unregistered_record_is_a_noop() {
        let mut reg = Registrar::new();
        let mut queues = OutgoingQueues::new();
        let a = record("a");
        reg.unregister(&a, &mut queues);
        assert_eq!(reg.member_count(), 0);
        assert!(!reg.membership_changed());
    }

    #[test]
    fn freed_ids_are_not_reused_until_the_cursor_wraps() {
        let mut reg = Registrar::new();
        let mut queues = OutgoingQueues::new();
        let a = record("a");
        let b = record("b");
        reg.register(&a);
        reg.unregister(&a, &mut queues);
        // Id 1 is free again, but the cursor has moved on.
        assert_eq!(reg.register(&b), RegisterOutcome::Newly(2));
    }

    #[test]
    fn status_frame_puts_the_recipient_first() {
        let mut reg = Registrar::new();
        for p in ["a", "b", "c"] {
            reg.register(&record(p));
        }
        let frame = reg.status_frame(3);
        assert_eq!(frame[0], COMMAND_ID);
        assert_eq!(frame[1], HUB_ID);
        assert_eq!(frame[2], 3);
        // The displaced first member lands where the recipient was.
        let mut members = [frame[3], frame[4]];
        members.sort_unstable();
        assert_eq!(members, [1, 2]);
        assert!(frame[5..].iter().all(|&b| b == UNASSIGNED_ID));
    }

    #[test]
    fn status_frame_for_sole_member_is_all_padding_after_byte_2() {
        let mut reg = Registrar::new();
        reg.register(&record("a"));
        let frame = reg.status_frame(1);
        assert_eq!(frame[2], 1);
        assert!(frame[3..].iter().all(|&b| b == UNASSIGNED_ID));
    }
}
