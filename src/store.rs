/// In-memory census of devices and access points.
///
/// Two MAC-keyed maps behind one mutex. Writers are short: a lookup and
/// an in-place field update. The create/update callbacks fire after the
/// lock is released, with value snapshots — callbacks never see a live
/// reference into the store, and may take their own locks freely.
///
/// Records live for the process lifetime; expiry is the document sink's
/// concern.
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

use crate::frame::Observation;
use crate::station::{self, AccessPoint, Device};

pub type DeviceCallback = Box<dyn Fn(Device, bool) + Send + Sync>;
pub type ApCallback = Box<dyn Fn(AccessPoint, bool) + Send + Sync>;

/// Census counters for the periodic stats report. The channel is the
/// controller's advisory value, not a per-frame attribution.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub devices: usize,
    pub access_points: usize,
    pub channel: u8,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, Device>,
    access_points: HashMap<String, AccessPoint>,
    dirty_devices: HashSet<String>,
    dirty_aps: HashSet<String>,
}

pub struct ObservationStore {
    inner: Mutex<Inner>,
    on_device: Option<DeviceCallback>,
    on_ap: Option<ApCallback>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::with_callbacks(None, None)
    }

    pub fn with_callbacks(on_device: Option<DeviceCallback>, on_ap: Option<ApCallback>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            on_device,
            on_ap,
        }
    }

    /// Merge one decoded observation. Group-addressed sources never
    /// create records.
    pub fn ingest(&self, observation: Observation) {
        match observation {
            Observation::ProbeRequest { source, ssid, rssi } => {
                self.ingest_probe(&source, ssid.as_deref(), rssi)
            }
            Observation::Beacon {
                bssid,
                ssid,
                channel,
                rssi,
                encryption,
            } => self.ingest_beacon(&bssid, ssid.as_deref(), channel, rssi, encryption),
        }
    }

    fn ingest_probe(&self, source: &[u8; 6], ssid: Option<&str>, rssi: i8) {
        if !station::is_unicast(source) {
            log::trace!("dropping probe from group address");
            return;
        }
        let mac = station::canonical_mac(source);
        let now = Utc::now();

        let (snapshot, is_new) = {
            let mut inner = self.inner.lock().unwrap();
            let (snapshot, is_new) = match inner.devices.entry(mac.clone()) {
                Entry::Occupied(mut occupied) => {
                    let device = occupied.get_mut();
                    device.observe(rssi, ssid, now);
                    (device.clone(), false)
                }
                Entry::Vacant(vacant) => {
                    let device = Device::new(mac.clone(), rssi, ssid, now);
                    (vacant.insert(device).clone(), true)
                }
            };
            inner.dirty_devices.insert(mac);
            (snapshot, is_new)
        };

        if let Some(callback) = &self.on_device {
            callback(snapshot, is_new);
        }
    }

    fn ingest_beacon(
        &self,
        bssid: &[u8; 6],
        ssid: Option<&str>,
        channel: u8,
        rssi: i8,
        encryption: station::Encryption,
    ) {
        if !station::is_unicast(bssid) {
            log::trace!("dropping beacon with group BSSID");
            return;
        }
        let key = station::canonical_mac(bssid);
        let now = Utc::now();

        let (snapshot, is_new) = {
            let mut inner = self.inner.lock().unwrap();
            let (snapshot, is_new) = match inner.access_points.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    let ap = occupied.get_mut();
                    ap.observe(rssi, ssid, channel, encryption, now);
                    (ap.clone(), false)
                }
                Entry::Vacant(vacant) => {
                    let ap = AccessPoint::new(key.clone(), ssid, channel, rssi, encryption, now);
                    (vacant.insert(ap).clone(), true)
                }
            };
            inner.dirty_aps.insert(key);
            (snapshot, is_new)
        };

        if let Some(callback) = &self.on_ap {
            callback(snapshot, is_new);
        }
    }

    /// Assign a vendor, once. Returns whether the field was set.
    pub fn set_vendor(&self, mac: &str, vendor: &str) -> bool {
        if vendor.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.devices.get_mut(mac) {
            Some(device) if device.vendor.is_none() => {
                device.vendor = Some(vendor.to_string());
                inner.dirty_devices.insert(mac.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self, channel: u8) -> Stats {
        let inner = self.inner.lock().unwrap();
        Stats {
            devices: inner.devices.len(),
            access_points: inner.access_points.len(),
            channel,
        }
    }

    /// Snapshots of every record touched since it was last flushed, and
    /// clears the dirty marks. The publisher's final drain uses this to
    /// recover records whose batch entries were lost to the safety cap.
    pub fn snapshot_and_clear_dirty(&self) -> (Vec<Device>, Vec<AccessPoint>) {
        let mut inner = self.inner.lock().unwrap();
        let devices = inner
            .dirty_devices
            .iter()
            .filter_map(|mac| inner.devices.get(mac).cloned())
            .collect();
        let access_points = inner
            .dirty_aps
            .iter()
            .filter_map(|bssid| inner.access_points.get(bssid).cloned())
            .collect();
        inner.dirty_devices.clear();
        inner.dirty_aps.clear();
        (devices, access_points)
    }

    /// Clear dirty marks for records the publisher just delivered.
    pub fn mark_flushed<S: AsRef<str>>(&self, devices: &[S], access_points: &[S]) {
        let mut inner = self.inner.lock().unwrap();
        for mac in devices {
            inner.dirty_devices.remove(mac.as_ref());
        }
        for bssid in access_points {
            inner.dirty_aps.remove(bssid.as_ref());
        }
    }

    /// Snapshot of one device, for tests and diagnostics.
    pub fn device(&self, mac: &str) -> Option<Device> {
        self.inner.lock().unwrap().devices.get(mac).cloned()
    }

    /// Snapshot of one access point, for tests and diagnostics.
    pub fn access_point(&self, bssid: &str) -> Option<AccessPoint> {
        self.inner.lock().unwrap().access_points.get(bssid).cloned()
    }
}

impl Default for ObservationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::Encryption;
    use std::sync::Arc;

    const SOURCE: [u8; 6] = [0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33];
    const BSSID: [u8; 6] = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01];

    fn probe(ssid: Option<&str>, rssi: i8) -> Observation {
        Observation::ProbeRequest {
            source: SOURCE,
            ssid: ssid.map(String::from),
            rssi,
        }
    }

    fn beacon(ssid: Option<&str>, channel: u8, encryption: Encryption, rssi: i8) -> Observation {
        Observation::Beacon {
            bssid: BSSID,
            ssid: ssid.map(String::from),
            channel,
            rssi,
            encryption,
        }
    }

    type EventLog = Arc<Mutex<Vec<(String, bool)>>>;

    fn recording_store() -> (Arc<ObservationStore>, EventLog, EventLog) {
        let device_events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let ap_events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let device_log = device_events.clone();
        let ap_log = ap_events.clone();
        let store = ObservationStore::with_callbacks(
            Some(Box::new(move |device, is_new| {
                device_log
                    .lock()
                    .unwrap()
                    .push((device.mac_address, is_new));
            })),
            Some(Box::new(move |ap, is_new| {
                ap_log.lock().unwrap().push((ap.bssid, is_new));
            })),
        );
        (Arc::new(store), device_events, ap_events)
    }

    #[test]
    fn new_probe_request_creates_device() {
        let (store, device_events, _) = recording_store();
        store.ingest(probe(Some("cafe"), -62));

        let device = store.device("aa:bb:cc:11:22:33").unwrap();
        assert_eq!(device.packet_count, 1);
        assert_eq!(device.rssi_values.as_slice(), &[-62]);
        assert!(device.probe_ssids.contains("cafe"));
        assert!(device.first_seen <= device.last_seen);

        let events = device_events.lock().unwrap();
        assert_eq!(events.as_slice(), &[("aa:bb:cc:11:22:33".to_string(), true)]);
    }

    #[test]
    fn reingest_updates_never_duplicates() {
        let (store, device_events, _) = recording_store();
        store.ingest(probe(Some("cafe"), -62));
        store.ingest(probe(None, -60));

        let device = store.device("aa:bb:cc:11:22:33").unwrap();
        assert_eq!(device.packet_count, 2);
        assert_eq!(device.rssi_values.as_slice(), &[-62, -60]);
        assert_eq!(store.stats(1).devices, 1);

        let events = device_events.lock().unwrap();
        assert_eq!(events[0].1, true);
        assert_eq!(events[1].1, false);
    }

    #[test]
    fn rssi_window_keeps_last_ten_in_order() {
        let (store, _, _) = recording_store();
        for i in 0..15 {
            store.ingest(probe(None, -50 - i as i8));
        }
        let device = store.device("aa:bb:cc:11:22:33").unwrap();
        assert_eq!(device.rssi_values.len(), 10);
        let expected: Vec<i8> = (5..15).map(|i| -50 - i as i8).collect();
        assert_eq!(device.rssi_values.as_slice(), expected.as_slice());
    }

    #[test]
    fn hidden_beacon_then_named_beacon_merges() {
        let (store, _, ap_events) = recording_store();
        store.ingest(beacon(None, 6, Encryption::Wpa2, -40));
        store.ingest(beacon(Some("home"), 6, Encryption::Wpa2, -41));

        let ap = store.access_point("de:ad:be:ef:00:01").unwrap();
        assert_eq!(ap.ssid, "home");
        assert_eq!(ap.channel, 6);
        assert_eq!(ap.encryption, Encryption::Wpa2);
        assert_eq!(ap.beacon_count, 2);
        assert_eq!(store.stats(6).access_points, 1);

        let events = ap_events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, true);
        assert_eq!(events[1].1, false);
    }

    #[test]
    fn same_beacon_twice_counts_twice_one_record() {
        let (store, _, _) = recording_store();
        store.ingest(beacon(Some("home"), 6, Encryption::Open, -40));
        store.ingest(beacon(Some("home"), 6, Encryption::Open, -40));
        let ap = store.access_point("de:ad:be:ef:00:01").unwrap();
        assert_eq!(ap.beacon_count, 2);
        assert_eq!(store.stats(6).access_points, 1);
    }

    #[test]
    fn broadcast_and_multicast_never_create_records() {
        let (store, device_events, ap_events) = recording_store();
        store.ingest(Observation::Beacon {
            bssid: [0xFF; 6],
            ssid: Some("x".into()),
            channel: 1,
            rssi: -40,
            encryption: Encryption::Open,
        });
        store.ingest(Observation::ProbeRequest {
            source: [0x01, 0x00, 0x5E, 0x00, 0x00, 0x01],
            ssid: None,
            rssi: -40,
        });

        let stats = store.stats(1);
        assert_eq!(stats.devices, 0);
        assert_eq!(stats.access_points, 0);
        assert!(device_events.lock().unwrap().is_empty());
        assert!(ap_events.lock().unwrap().is_empty());
    }

    #[test]
    fn vendor_assignment_is_write_once() {
        let (store, _, _) = recording_store();
        store.ingest(probe(None, -62));

        assert!(store.set_vendor("aa:bb:cc:11:22:33", "Acme Radios"));
        assert!(!store.set_vendor("aa:bb:cc:11:22:33", "Imposter"));
        assert!(!store.set_vendor("aa:bb:cc:11:22:33", ""));
        assert!(!store.set_vendor("00:00:00:00:00:01", "Nobody"));

        let device = store.device("aa:bb:cc:11:22:33").unwrap();
        assert_eq!(device.vendor.as_deref(), Some("Acme Radios"));
    }

    #[test]
    fn dirty_tracking_follows_flush_lifecycle() {
        let (store, _, _) = recording_store();
        store.ingest(probe(None, -62));
        store.ingest(beacon(Some("home"), 6, Encryption::Open, -40));

        let (devices, aps) = store.snapshot_and_clear_dirty();
        assert_eq!(devices.len(), 1);
        assert_eq!(aps.len(), 1);

        // Nothing new: nothing dirty.
        let (devices, aps) = store.snapshot_and_clear_dirty();
        assert!(devices.is_empty());
        assert!(aps.is_empty());

        // A new observation re-dirties; mark_flushed cleans it.
        store.ingest(probe(None, -61));
        store.mark_flushed(&["aa:bb:cc:11:22:33"], &[]);
        let (devices, _) = store.snapshot_and_clear_dirty();
        assert!(devices.is_empty());
    }

    #[test]
    fn snapshots_are_value_copies() {
        let (store, _, _) = recording_store();
        store.ingest(probe(None, -62));
        let mut snapshot = store.device("aa:bb:cc:11:22:33").unwrap();
        snapshot.packet_count = 999;
        assert_eq!(store.device("aa:bb:cc:11:22:33").unwrap().packet_count, 1);
    }
}
