use std::ffi::CString;

use hidapi::{HidApi, HidDevice};

use super::{DeviceIo, HidBackend, HidError, InterfaceInfo};
use crate::hub::frame::REPORT_SIZE;

/// Production backend on top of the hidapi C library.
pub struct HidapiBackend {
    api: HidApi,
}

impl HidapiBackend {
    pub fn new() -> Result<Self, HidError> {
        let api = HidApi::new().map_err(|e| HidError::Init(e.to_string()))?;
        Ok(Self { api })
    }
}

impl HidBackend for HidapiBackend {
    fn enumerate(&mut self) -> Result<Vec<InterfaceInfo>, HidError> {
        self.api
            .refresh_devices()
            .map_err(|e| HidError::Enumerate(e.to_string()))?;
        Ok(self
            .api
            .device_list()
            .map(|d| InterfaceInfo {
                path: d.path().to_string_lossy().into_owned(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                usage_page: d.usage_page(),
                usage: d.usage(),
                manufacturer: d.manufacturer_string().map(str::to_owned),
                product: d.product_string().map(str::to_owned),
                serial: d.serial_number().map(str::to_owned),
            })
            .collect())
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn DeviceIo>, HidError> {
        let cpath = CString::new(path).map_err(|e| HidError::Open {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        let device = self.api.open_path(&cpath).map_err(|e| HidError::Open {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        device
            .set_blocking_mode(false)
            .map_err(|e| HidError::Open {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(HidapiDeviceIo { device }))
    }
}

struct HidapiDeviceIo {
    device: HidDevice,
}

impl DeviceIo for HidapiDeviceIo {
    fn read(&mut self, buf: &mut [u8; REPORT_SIZE]) -> Result<usize, HidError> {
        self.device
            .read(buf)
            .map_err(|e| HidError::Read(e.to_string()))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, HidError> {
        self.device
            .write(data)
            .map_err(|e| HidError::Write(e.to_string()))
    }
}
