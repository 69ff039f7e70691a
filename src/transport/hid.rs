//! HID access for Link hubs.
//!
//! [`PacketIo`] abstracts one opened HID stream so the packet layer can be
//! exercised against scripted reports in tests. [`LinkBackend`] wraps
//! enumeration and opening; the directory only sees paths and streams.

use std::ffi::CString;
use std::sync::{Mutex, PoisonError};

use hidapi::{HidApi, HidDevice};
use tracing::debug;

use crate::error::{LinkError, Result};
use crate::protocol::{CORSAIR_VID, LINK_HUB_PID};

/// One opened fixed-size-report HID stream.
pub trait PacketIo: Send {
    /// Write one report. `data[0]` is the report id.
    fn write_report(&mut self, data: &[u8]) -> Result<usize>;

    /// Read one report into `buf`, waiting at most `timeout_ms`.
    /// Returns the number of bytes read, 0 if no report arrived in time.
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
}

/// `PacketIo` over a hidapi device handle.
pub struct HidPacketIo {
    device: HidDevice,
}

impl PacketIo for HidPacketIo {
    fn write_report(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.device.write(data)?)
    }

    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        Ok(self.device.read_timeout(buf, timeout_ms)?)
    }
}

/// Enumerates and opens Link hubs.
///
/// The directory drives discovery exclusively through this trait, so tests
/// can substitute a backend that serves scripted streams.
pub trait LinkBackend: Send + Sync {
    /// Platform paths of all attached Link hubs.
    fn enumerate(&self) -> Result<Vec<String>>;

    /// Open the hub at `path`.
    fn open(&self, path: &str) -> Result<Box<dyn PacketIo>>;
}

/// `LinkBackend` over hidapi enumeration.
pub struct HidBackend {
    api: Mutex<HidApi>,
}

impl HidBackend {
    /// Initialize the HID library.
    pub fn new() -> Result<Self> {
        let api = HidApi::new()?;
        Ok(HidBackend { api: Mutex::new(api) })
    }
}

impl LinkBackend for HidBackend {
    fn enumerate(&self) -> Result<Vec<String>> {
        let mut api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        api.refresh_devices()?;

        let paths: Vec<String> = api
            .device_list()
            .filter(|info| info.vendor_id() == CORSAIR_VID && info.product_id() == LINK_HUB_PID)
            .map(|info| info.path().to_string_lossy().into_owned())
            .collect();

        debug!(count = paths.len(), "enumerated Link hubs");
        Ok(paths)
    }

    fn open(&self, path: &str) -> Result<Box<dyn PacketIo>> {
        let cpath = CString::new(path)
            .map_err(|_| LinkError::InvalidInput(format!("Device path contains NUL: {path:?}")))?;

        let api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
        let device = api.open_path(&cpath)?;
        debug!(path, "opened Link hub");
        Ok(Box::new(HidPacketIo { device }))
    }
}
