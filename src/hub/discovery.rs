//! Agent D: keeps the device table in step with what the backend can
//! currently enumerate. Runs on its own thread; the only state it shares
//! with the relay agent is the table itself.

use std::thread;
use std::time::Duration;

use super::table::DeviceRecord;
use super::Hub;
use crate::config::{Verbosity, QMK_USAGE, QMK_USAGE_PAGE};
use crate::hid::{HidBackend, InterfaceInfo};

pub fn run(hub: &Hub, backend: &mut dyn HidBackend, period: Duration, verbosity: Verbosity) {
    while !hub.shutdown_requested() {
        reconcile(hub, backend, verbosity);
        thread::sleep(period);
    }
}

/// One reconciliation cycle: forget last cycle's marks, re-mark every
/// interface the backend still reports (opening the new ones), then deal
/// with the leftovers.
pub fn reconcile(hub: &Hub, backend: &mut dyn HidBackend, verbosity: Verbosity) {
    hub.table.clear_enumeration_marks();

    let interfaces = match backend.enumerate() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            // A failed enumeration is not an empty one; skip the sweep.
            tracing::warn!("enumeration failed: {e}");
            return;
        }
    };
    for iface in &interfaces {
        if iface.usage_page == QMK_USAGE_PAGE && iface.usage == QMK_USAGE {
            adopt_interface(hub, backend, iface, verbosity);
        }
    }

    let closed = hub.table.sweep_missing(hub.shutdown_flag());
    if verbosity.basic {
        for path in closed {
            tracing::info!(path = %path, "closed a missing raw HID interface");
        }
    }
}

fn adopt_interface(
    hub: &Hub,
    backend: &mut dyn HidBackend,
    iface: &InterfaceInfo,
    verbosity: Verbosity,
) {
    if let Some(record) = hub.table.find_live(&iface.path) {
        record.mark_in_enumeration(true);
        return;
    }
    match backend.open(&iface.path) {
        Ok(io) => {
            hub.table.push(DeviceRecord::new(io, iface.path.clone()));
            if verbosity.basic {
                tracing::info!(
                    path = %iface.path,
                    manufacturer = iface.manufacturer.as_deref().unwrap_or(""),
                    product = iface.product.as_deref().unwrap_or(""),
                    serial = iface.serial.as_deref().unwrap_or(""),
                    vendor_id = format!("{:#06x}", iface.vendor_id),
                    product_id = format!("{:#06x}", iface.product_id),
                    usage_page = format!("{:#06x}", iface.usage_page),
                    usage = format!("{:#04x}", iface.usage),
                    "opened a new raw HID interface"
                );
            }
        }
        Err(e) => {
            // Retried implicitly on the next enumeration.
            tracing::warn!(path = %iface.path, "open failed: {e}");
        }
    }
}
