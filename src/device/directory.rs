//! Registry of attached hub units and the discovery loop that keeps it
//! current.
//!
//! One entry per platform path. A unit stays registered until its transport
//! flags the stream dead; the next scan evicts it, and the path becomes
//! eligible for a fresh probe. Opening is throttled so a strip of hubs does
//! not get hammered in one burst.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::hub::HubUnit;
use crate::device::sensor::SensorSink;
use crate::transport::LinkBackend;

/// Pause between successive open attempts within one scan.
const OPEN_THROTTLE_MS: u64 = 100;

/// Default pause between scans in [`DeviceDirectory::run`].
pub const DISCOVERY_INTERVAL_MS: u64 = 2000;

struct UnitHandle {
    unit: Arc<Mutex<HubUnit>>,
    connected: Arc<AtomicBool>,
}

/// All hub units currently attached, keyed by platform path.
pub struct DeviceDirectory {
    backend: Box<dyn LinkBackend>,
    units: Mutex<HashMap<String, UnitHandle>>,
    open_throttle: Duration,
}

impl DeviceDirectory {
    pub fn new(backend: Box<dyn LinkBackend>) -> Self {
        DeviceDirectory {
            backend,
            units: Mutex::new(HashMap::new()),
            open_throttle: Duration::from_millis(OPEN_THROTTLE_MS),
        }
    }

    /// Override the pause between open attempts.
    pub fn with_open_throttle(mut self, throttle: Duration) -> Self {
        self.open_throttle = throttle;
        self
    }

    /// One discovery pass: evict dead units, then probe new paths.
    ///
    /// Returns the number of units opened in this pass. A path that fails to
    /// probe stays unregistered and is retried on the next pass.
    pub fn scan(&self, sink: &mut dyn SensorSink) -> usize {
        self.evict_disconnected(sink);

        let paths = match self.backend.enumerate() {
            Ok(paths) => paths,
            Err(err) => {
                warn!(%err, "enumeration failed, keeping current units");
                return 0;
            }
        };

        let known: Vec<String> = {
            let units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
            units.keys().cloned().collect()
        };

        let mut opened = 0;
        let mut first_probe = true;
        for path in paths {
            if known.contains(&path) {
                continue;
            }
            if !first_probe {
                std::thread::sleep(self.open_throttle);
            }
            first_probe = false;

            match self.probe(&path) {
                Ok(handle) => {
                    let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
                    // A concurrent scan may have won the race for this path.
                    if !units.contains_key(&path) {
                        units.insert(path, handle);
                        opened += 1;
                    }
                }
                Err(err) => {
                    debug!(%path, %err, "probe failed, will retry next pass");
                }
            }
        }
        opened
    }

    fn probe(&self, path: &str) -> crate::error::Result<UnitHandle> {
        let io = self.backend.open(path)?;
        let unit = HubUnit::open(path, io)?;
        let connected = unit.connected_flag();
        Ok(UnitHandle {
            unit: Arc::new(Mutex::new(unit)),
            connected,
        })
    }

    fn evict_disconnected(&self, sink: &mut dyn SensorSink) {
        let dead: Vec<(String, Arc<Mutex<HubUnit>>)> = {
            let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
            let paths: Vec<String> = units
                .iter()
                .filter(|(_, handle)| !handle.connected.load(Ordering::SeqCst))
                .map(|(path, _)| path.clone())
                .collect();
            paths
                .into_iter()
                .filter_map(|path| units.remove(&path).map(|handle| (path, handle.unit)))
                .collect()
        };

        for (path, unit) in dead {
            info!(%path, "evicting disconnected unit");
            let mut unit = unit.lock().unwrap_or_else(PoisonError::into_inner);
            unit.close(sink);
        }
    }

    /// Snapshot of the registered units.
    pub fn units(&self) -> Vec<(String, Arc<Mutex<HubUnit>>)> {
        let units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<(String, Arc<Mutex<HubUnit>>)> = units
            .iter()
            .map(|(path, handle)| (path.clone(), Arc::clone(&handle.unit)))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn unit_count(&self) -> usize {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Discovery loop body: scan, sleep, repeat until `running` clears.
    pub fn run(&self, running: &AtomicBool, interval: Duration, sink: &mut dyn SensorSink) {
        info!(interval_ms = interval.as_millis() as u64, "discovery loop started");
        while running.load(Ordering::SeqCst) {
            self.scan(sink);
            std::thread::sleep(interval);
        }
        info!("discovery loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::device::sensor::RecordingSink;
    use crate::error::Result;
    use crate::protocol::{CHANNEL_POPULATED, DEFAULT_REPORT_LENGTH, OP_READ_BLOCK, OP_READ_BYTE, OP_READ_WORD};
    use crate::transport::mock::{MockPacketIo, MockReply};
    use crate::transport::PacketIo;

    /// Shared log of the paths a mock backend has been asked to open.
    type OpenLog = Arc<Mutex<Vec<String>>>;

    struct MockBackend {
        paths: Vec<String>,
        scripts: Mutex<VecDeque<Vec<MockReply>>>,
        opens: OpenLog,
    }

    impl MockBackend {
        fn new(paths: &[&str], scripts: Vec<Vec<MockReply>>) -> (Self, OpenLog) {
            let opens: OpenLog = Arc::new(Mutex::new(Vec::new()));
            let backend = MockBackend {
                paths: paths.iter().map(|p| p.to_string()).collect(),
                scripts: Mutex::new(scripts.into()),
                opens: Arc::clone(&opens),
            };
            (backend, opens)
        }
    }

    impl LinkBackend for MockBackend {
        fn enumerate(&self) -> Result<Vec<String>> {
            Ok(self.paths.clone())
        }

        fn open(&self, path: &str) -> Result<Box<dyn PacketIo>> {
            self.opens.lock().unwrap().push(path.to_string());
            let replies = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            let (io, _writes) = MockPacketIo::new(replies);
            Ok(Box::new(io))
        }
    }

    fn report(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![0u8];
        for segment in segments {
            data.extend_from_slice(segment);
        }
        data.resize(DEFAULT_REPORT_LENGTH, 0);
        data
    }

    fn hub_script(ident: u8) -> Vec<MockReply> {
        let mut status = vec![1, OP_READ_BLOCK];
        status.extend_from_slice(&[CHANNEL_POPULATED, 0, 0, 0, 0, 0, 0, 0]);
        vec![
            MockReply::Respond(report(&[
                vec![1, OP_READ_BYTE, ident],
                vec![2, OP_READ_WORD, 0x02, 0x11],
            ])),
            MockReply::Respond(report(&[status])),
        ]
    }

    fn directory(paths: &[&str], scripts: Vec<Vec<MockReply>>) -> (DeviceDirectory, OpenLog) {
        let (backend, opens) = MockBackend::new(paths, scripts);
        let dir = DeviceDirectory::new(Box::new(backend)).with_open_throttle(Duration::ZERO);
        (dir, opens)
    }

    #[test]
    fn test_scan_opens_each_path_once() {
        let (dir, opens) = directory(&["hub-a"], vec![hub_script(0x3A)]);
        let mut sink = RecordingSink::new();

        assert_eq!(dir.scan(&mut sink), 1);
        assert_eq!(dir.unit_count(), 1);

        // The same path does not get reopened while its unit is alive.
        assert_eq!(dir.scan(&mut sink), 0);
        assert_eq!(dir.unit_count(), 1);
        assert_eq!(opens.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_scan_opens_multiple_paths() {
        let (dir, opens) = directory(
            &["hub-a", "hub-b"],
            vec![hub_script(0x3A), hub_script(0x3D)],
        );
        let mut sink = RecordingSink::new();

        assert_eq!(dir.scan(&mut sink), 2);
        assert_eq!(dir.unit_count(), 2);
        assert_eq!(opens.lock().unwrap().len(), 2);

        let units = dir.units();
        assert_eq!(units[0].0, "hub-a");
        assert_eq!(units[1].0, "hub-b");
    }

    #[test]
    fn test_disconnected_unit_is_evicted_and_reopened() {
        let (dir, opens) = directory(&["hub-a"], vec![hub_script(0x3A), hub_script(0x3A)]);
        let mut sink = RecordingSink::new();

        dir.scan(&mut sink);
        {
            let units = dir.units();
            let unit = units[0].1.lock().unwrap();
            unit.connected_flag().store(false, Ordering::SeqCst);
        }

        // Eviction and reprobe happen in the same pass.
        assert_eq!(dir.scan(&mut sink), 1);
        assert_eq!(dir.unit_count(), 1);
        assert_eq!(opens.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_probe_retries_next_pass() {
        let (dir, opens) = directory(
            &["hub-a"],
            vec![vec![MockReply::Silent], hub_script(0x3A)],
        );
        let mut sink = RecordingSink::new();

        assert_eq!(dir.scan(&mut sink), 0);
        assert_eq!(dir.unit_count(), 0);

        assert_eq!(dir.scan(&mut sink), 1);
        assert_eq!(dir.unit_count(), 1);
        assert_eq!(opens.lock().unwrap().len(), 2);
    }
}
