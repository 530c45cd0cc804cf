use crate::hub::frame::REPORT_SIZE;

pub mod hidapi;
#[doc(hidden)]
pub mod mock;

pub use self::hidapi::HidapiBackend;

#[derive(Debug, thiserror::Error)]
pub enum HidError {
    #[error("backend initialization failed: {0}")]
    Init(String),
    #[error("enumeration failed: {0}")]
    Enumerate(String),
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
}

/// One interface from an enumeration snapshot. `path` is the stable
/// identity the device table matches on across enumerations.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// Enumeration and opening. Owned by the discovery agent; the relay agent
/// never sees it.
pub trait HidBackend: Send {
    fn enumerate(&mut self) -> Result<Vec<InterfaceInfo>, HidError>;

    /// Open `path` for non-blocking reads. The returned handle is handed to
    /// the relay agent and closed when its record is destroyed.
    fn open(&mut self, path: &str) -> Result<Box<dyn DeviceIo>, HidError>;
}

/// An open raw HID interface. `read` must never block: `Ok(0)` means no
/// report is pending.
pub trait DeviceIo: Send {
    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize, HidError>;
    fn write(&mut self, data: &[u8]) -> Result<usize, HidError>;
}
