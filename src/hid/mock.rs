//! In-memory backend for tests. Always compiled, hidden from docs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{DeviceIo, HidBackend, HidError, InterfaceInfo};
use crate::config::{QMK_USAGE, QMK_USAGE_PAGE};
use crate::hub::frame::{Frame, REPORT_SIZE};

/// Shared bus of fake interfaces. Clone freely; all clones see the same
/// interfaces, so a test can attach/detach while the discovery agent is
/// enumerating.
#[derive(Clone, Default)]
pub struct MockBackend {
    bus: Arc<Mutex<Vec<MockInterface>>>,
}

struct MockInterface {
    info: InterfaceInfo,
    endpoint: Arc<MockEndpoint>,
    fail_open: bool,
}

/// Test-side view of one fake device: inject reports the hub will read,
/// inspect what the hub wrote, and flip failure switches.
#[derive(Default)]
pub struct MockEndpoint {
    to_hub: Mutex<VecDeque<Frame>>,
    from_hub: Mutex<Vec<Vec<u8>>>,
    fail_reads: AtomicBool,
    closed: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an interface with the QMK usage tuple.
    pub fn attach(&self, path: &str) -> Arc<MockEndpoint> {
        self.attach_with(path, QMK_USAGE_PAGE, QMK_USAGE)
    }

    pub fn attach_with(&self, path: &str, usage_page: u16, usage: u16) -> Arc<MockEndpoint> {
        let endpoint = Arc::new(MockEndpoint::default());
        self.bus.lock().unwrap().push(MockInterface {
            info: InterfaceInfo {
                path: path.to_owned(),
                vendor_id: 0xFEED,
                product_id: 0x6060,
                usage_page,
                usage,
                manufacturer: Some("mock".to_owned()),
                product: Some("mock keyboard".to_owned()),
                serial: None,
            },
            endpoint: Arc::clone(&endpoint),
            fail_open: false,
        });
        endpoint
    }

    /// Attach an interface whose `open` always fails.
    pub fn attach_unopenable(&self, path: &str) {
        let endpoint = self.attach(path);
        let mut bus = self.bus.lock().unwrap();
        let iface = bus
            .iter_mut()
            .find(|i| Arc::ptr_eq(&i.endpoint, &endpoint))
            .unwrap();
        iface.fail_open = true;
    }

    /// Remove an interface from future enumerations. The open handle, if
    /// any, keeps working until the hub closes it.
    pub fn detach(&self, path: &str) {
        self.bus.lock().unwrap().retain(|i| i.info.path != path);
    }
}

impl HidBackend for MockBackend {
    fn enumerate(&mut self) -> Result<Vec<InterfaceInfo>, HidError> {
        Ok(self
            .bus
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.info.clone())
            .collect())
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn DeviceIo>, HidError> {
        let bus = self.bus.lock().unwrap();
        let iface = bus
            .iter()
            .find(|i| i.info.path == path)
            .ok_or_else(|| HidError::Open {
                path: path.to_owned(),
                reason: "no such interface".to_owned(),
            })?;
        if iface.fail_open {
            return Err(HidError::Open {
                path: path.to_owned(),
                reason: "open refused".to_owned(),
            });
        }
        iface.endpoint.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(MockDeviceIo {
            endpoint: Arc::clone(&iface.endpoint),
        }))
    }
}

impl MockEndpoint {
    /// Queue a device→hub report.
    pub fn send(&self, frame: Frame) {
        self.to_hub.lock().unwrap().push_back(frame);
    }

    /// Everything the hub has written, with the leading report-id byte
    /// stripped.
    pub fn received(&self) -> Vec<Frame> {
        self.from_hub
            .lock()
            .unwrap()
            .iter()
            .filter(|raw| raw.len() == REPORT_SIZE + 1)
            .map(|raw| {
                let mut frame = [0u8; REPORT_SIZE];
                frame.copy_from_slice(&raw[1..]);
                frame
            })
            .collect()
    }

    /// Raw writes as they hit the wire (report id included).
    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.from_hub.lock().unwrap().clone()
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// True once the hub has dropped its handle.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockDeviceIo {
    endpoint: Arc<MockEndpoint>,
}

impl DeviceIo for MockDeviceIo {
    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize, HidError> {
        if self.endpoint.fail_reads.load(Ordering::SeqCst) {
            return Err(HidError::Read("injected failure".to_owned()));
        }
        match self.endpoint.to_hub.lock().unwrap().pop_front() {
            Some(frame) => {
                buf.copy_from_slice(&frame);
                Ok(REPORT_SIZE)
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, HidError> {
        self.endpoint.from_hub.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }
}

impl Drop for MockDeviceIo {
    fn drop(&mut self) {
        self.endpoint.closed.store(true, Ordering::SeqCst);
    }
}
