//! The relay engine: device table, registrar, router, queues and the two
//! agents that drive them.

pub mod discovery;
pub mod frame;
pub mod queue;
pub mod registrar;
pub mod relay;
pub mod router;
pub mod table;

use std::sync::atomic::{AtomicBool, Ordering};

use table::DeviceTable;

/// Everything the two agents share: the device table and the cooperative
/// shutdown flag. The registrar, queues and stats stay private to the
/// relay agent.
pub struct Hub {
    pub table: DeviceTable,
    shutdown: AtomicBool,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            table: DeviceTable::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
