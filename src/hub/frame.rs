//! Frame layout and classification.
//!
//! Every report is exactly [`REPORT_SIZE`] bytes. Byte 0 carries the
//! command id, byte 1 the counterpart id (the hub id 0xFF for control
//! traffic, a device id for relayed messages), and the meaning of the rest
//! depends on the kind.

/// Payload size of one raw HID report.
pub const REPORT_SIZE: usize = 32;

/// Report id prepended to every host→device write.
pub const REPORT_ID: u8 = 0x00;

/// First byte of every hub frame. Adjust if it collides with another raw
/// HID consumer flashed into the same keyboards.
pub const COMMAND_ID: u8 = 0x27;

/// Ids 0..=254 are devices; 255 is the hub itself, and doubles as "no id
/// assigned" in record state.
pub const DEVICE_ID_COUNT: usize = 255;
pub const HUB_ID: u8 = 0xFF;
pub const UNASSIGNED_ID: u8 = 0xFF;

/// Upper bound on simultaneously registered devices; the member block of a
/// status frame is exactly this many bytes.
pub const MAX_REGISTERED: usize = 30;

pub type Frame = [u8; REPORT_SIZE];

pub fn id_is_valid(id: u8) -> bool {
    (id as usize) < DEVICE_ID_COUNT
}

/// What an inbound report asks of the hub, keyed on bytes 0..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Byte 0 is not ours; not hub traffic at all.
    Foreign,
    /// `[COMMAND_ID, HUB_ID, 0x01, ..]`
    Registration,
    /// `[COMMAND_ID, HUB_ID, 0x00, ..]`
    Unregistration,
    /// `[COMMAND_ID, destination, ..]` with destination in 0..=254.
    Message { destination: u8 },
    /// Addressed to the hub with an unknown opcode.
    HubOther,
}

pub fn classify(frame: &Frame) -> FrameKind {
    if frame[0] != COMMAND_ID {
        return FrameKind::Foreign;
    }
    if frame[1] != HUB_ID {
        return FrameKind::Message {
            destination: frame[1],
        };
    }
    match frame[2] {
        0x01 => FrameKind::Registration,
        0x00 => FrameKind::Unregistration,
        _ => FrameKind::HubOther,
    }
}

/// Base for hub→device control frames: command id, hub id, zeroed tail.
pub fn hub_frame() -> Frame {
    let mut frame = [0u8; REPORT_SIZE];
    frame[0] = COMMAND_ID;
    frame[1] = HUB_ID;
    frame
}

/// `[COMMAND_ID, HUB_ID, UNASSIGNED_ID, ..]` — sent to every registered
/// device when the hub goes down.
pub fn shutdown_frame() -> Frame {
    let mut frame = hub_frame();
    frame[2] = UNASSIGNED_ID;
    frame
}

/// Hex dump for frame-level trace output.
pub fn format_frame(frame: &Frame) -> String {
    frame
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
