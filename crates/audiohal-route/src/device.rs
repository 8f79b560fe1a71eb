//! PCM device abstraction.
//!
//! A stream route owns one [`AudioDevice`] created by the manager's
//! [`DeviceFactory`]. While a stream is attached the device is moved into the
//! stream's attachment and handed back on detach, so a device is used by at
//! most one stream at a time.
//!
//! [`MockDevice`] and [`MockDeviceFactory`] are a deterministic in-memory
//! backend. Every call is recorded in a shared [`MockDeviceLog`], and opens
//! can be made to fail per route.

use std::collections::HashSet;
use std::sync::Arc;

use audiohal_core::SampleSpec;
use parking_lot::Mutex;

use crate::Direction;
use crate::error::DeviceError;
use crate::stream_route::StreamRouteConfig;

/// Parameters used to open a device for one attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    /// Sound card name.
    pub card_name: String,
    /// PCM device number on the card.
    pub device_id: u32,
    /// Stream direction.
    pub direction: Direction,
    /// Spec the device runs at.
    pub spec: SampleSpec,
    /// Frames per period.
    pub period_size: usize,
    /// Periods per buffer.
    pub period_count: usize,
}

/// A PCM endpoint.
pub trait AudioDevice: Send {
    /// Opens the device.
    fn open(&mut self, params: &DeviceParams) -> Result<(), DeviceError>;

    /// Closes the device. Closing a closed device succeeds.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Whether the device is open.
    fn is_open(&self) -> bool;

    /// Writes interleaved frames in the device spec. Returns bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError>;

    /// Reads interleaved frames in the device spec. Returns bytes read.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, DeviceError>;
}

/// Creates the device of each stream route.
pub trait DeviceFactory: Send + Sync {
    /// Builds the (closed) device for route `key`.
    fn create(&self, key: &str, config: &StreamRouteConfig) -> Box<dyn AudioDevice>;
}

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// `open` succeeded.
    Opened {
        /// Route key.
        route: String,
        /// Spec the device was opened with.
        spec: SampleSpec,
    },
    /// `open` was refused by failure injection.
    OpenFailed {
        /// Route key.
        route: String,
    },
    /// `close` was called on an open device.
    Closed {
        /// Route key.
        route: String,
    },
    /// Bytes written.
    Written {
        /// Route key.
        route: String,
        /// Byte count.
        bytes: usize,
    },
    /// Bytes read.
    Read {
        /// Route key.
        route: String,
        /// Byte count.
        bytes: usize,
    },
}

#[derive(Debug, Default)]
struct LogState {
    events: Vec<DeviceEvent>,
    fail_open: HashSet<String>,
    fail_close: HashSet<String>,
    open: HashSet<String>,
    written: Vec<(String, Vec<u8>)>,
    capture_fill: u8,
}

/// Shared record of mock device activity, with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockDeviceLog {
    inner: Arc<Mutex<LogState>>,
}

impl MockDeviceLog {
    /// Every call so far, in order.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.inner.lock().events.clone()
    }

    /// Forgets recorded events and written data.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.events.clear();
        state.written.clear();
    }

    /// Makes `open` fail for route `key` until reset.
    pub fn fail_open(&self, key: &str, fail: bool) {
        let mut state = self.inner.lock();
        if fail {
            state.fail_open.insert(key.to_string());
        } else {
            state.fail_open.remove(key);
        }
    }

    /// Makes `close` report an error for route `key` until reset.
    pub fn fail_close(&self, key: &str, fail: bool) {
        let mut state = self.inner.lock();
        if fail {
            state.fail_close.insert(key.to_string());
        } else {
            state.fail_close.remove(key);
        }
    }

    /// Byte value returned by capture reads.
    pub fn set_capture_fill(&self, byte: u8) {
        self.inner.lock().capture_fill = byte;
    }

    /// Whether the device of route `key` is open.
    pub fn is_open(&self, key: &str) -> bool {
        self.inner.lock().open.contains(key)
    }

    /// Number of successful opens of route `key`.
    pub fn open_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Opened { route, .. } if route == key))
            .count()
    }

    /// All bytes written to route `key`, concatenated.
    pub fn written(&self, key: &str) -> Vec<u8> {
        self.inner
            .lock()
            .written
            .iter()
            .filter(|(route, _)| route == key)
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }
}

/// In-memory device recording into a [`MockDeviceLog`].
#[derive(Debug)]
pub struct MockDevice {
    key: String,
    log: MockDeviceLog,
    open: bool,
}

impl MockDevice {
    /// Creates a closed device for route `key`.
    pub fn new(key: &str, log: MockDeviceLog) -> Self {
        Self {
            key: key.to_string(),
            log,
            open: false,
        }
    }
}

impl AudioDevice for MockDevice {
    fn open(&mut self, params: &DeviceParams) -> Result<(), DeviceError> {
        let mut state = self.log.inner.lock();
        if state.fail_open.contains(&self.key) {
            state.events.push(DeviceEvent::OpenFailed {
                route: self.key.clone(),
            });
            return Err(DeviceError::Open {
                card: params.card_name.clone(),
                device: params.device_id,
                reason: "injected failure".into(),
            });
        }
        state.events.push(DeviceEvent::Opened {
            route: self.key.clone(),
            spec: params.spec.clone(),
        });
        state.open.insert(self.key.clone());
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut state = self.log.inner.lock();
        state.open.remove(&self.key);
        state.events.push(DeviceEvent::Closed {
            route: self.key.clone(),
        });
        if state.fail_close.contains(&self.key) {
            return Err(DeviceError::Close("injected failure".into()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        let mut state = self.log.inner.lock();
        state.events.push(DeviceEvent::Written {
            route: self.key.clone(),
            bytes: data.len(),
        });
        state.written.push((self.key.clone(), data.to_vec()));
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        let mut state = self.log.inner.lock();
        data.fill(state.capture_fill);
        state.events.push(DeviceEvent::Read {
            route: self.key.clone(),
            bytes: data.len(),
        });
        Ok(data.len())
    }
}

/// Factory producing [`MockDevice`]s that share one log.
#[derive(Debug, Clone, Default)]
pub struct MockDeviceFactory {
    log: MockDeviceLog,
}

impl MockDeviceFactory {
    /// Creates a factory with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the shared log.
    pub fn log(&self) -> MockDeviceLog {
        self.log.clone()
    }
}

impl DeviceFactory for MockDeviceFactory {
    fn create(&self, key: &str, _config: &StreamRouteConfig) -> Box<dyn AudioDevice> {
        Box::new(MockDevice::new(key, self.log.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DeviceParams {
        StreamRouteConfig::default().device_params(Direction::Output, SampleSpec::default())
    }

    #[test]
    fn open_write_close_is_recorded() {
        let factory = MockDeviceFactory::new();
        let log = factory.log();
        let mut dev = factory.create("Media_Playback", &StreamRouteConfig::default());
        assert_eq!(dev.write(&[0; 4]), Err(DeviceError::NotOpen));
        dev.open(&params()).unwrap();
        assert!(log.is_open("Media_Playback"));
        assert_eq!(dev.write(&[1, 2, 3, 4]).unwrap(), 4);
        dev.close().unwrap();
        dev.close().unwrap();
        assert!(!log.is_open("Media_Playback"));
        assert_eq!(log.written("Media_Playback"), vec![1, 2, 3, 4]);
        assert_eq!(log.events().len(), 3);
        assert_eq!(log.open_count("Media_Playback"), 1);
    }

    #[test]
    fn injected_open_failure() {
        let factory = MockDeviceFactory::new();
        let log = factory.log();
        log.fail_open("Hdmi_Playback", true);
        let mut dev = factory.create("Hdmi_Playback", &StreamRouteConfig::default());
        assert!(matches!(dev.open(&params()), Err(DeviceError::Open { .. })));
        assert!(!dev.is_open());
        log.fail_open("Hdmi_Playback", false);
        assert!(dev.open(&params()).is_ok());
    }

    #[test]
    fn capture_reads_fill_pattern() {
        let factory = MockDeviceFactory::new();
        factory.log().set_capture_fill(0x7f);
        let mut dev = factory.create("Mic_Capture", &StreamRouteConfig::default());
        dev.open(&params()).unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(dev.read(&mut buf).unwrap(), 6);
        assert_eq!(buf, [0x7f; 6]);
    }

    #[test]
    fn injected_close_failure_still_closes() {
        let factory = MockDeviceFactory::new();
        let log = factory.log();
        log.fail_close("Media_Playback", true);
        let mut dev = factory.create("Media_Playback", &StreamRouteConfig::default());
        dev.open(&params()).unwrap();
        assert!(dev.close().is_err());
        assert!(!dev.is_open());
    }
}
