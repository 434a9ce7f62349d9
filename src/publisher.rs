/// Batching publisher: drains store callbacks into the document sink
/// and announces first sightings on the event bus.
///
/// Callbacks push into two bounded batches under a single mutex; a
/// flusher thread wakes on an interval (or early, when a batch fills)
/// and swaps the batches out before doing any I/O. Capture ingestion is
/// never blocked for longer than that swap.
///
/// Batch entries merge per key: repeated callbacks for one MAC collapse
/// into a single entry carrying the latest snapshot plus the deltas —
/// packet count, newest RSSI samples — accumulated since the previous
/// flush. The sink increments by those deltas, so back-to-back flushes
/// of a quiet record write nothing and busy records never double-count.
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::bus::{DiscoveryEvent, EventBus};
use crate::error::SensorError;
use crate::sink::{ApUpdate, DeviceUpdate, DocumentSink};
use crate::station::{self, AccessPoint, Device, RssiWindow};
use crate::store::ObservationStore;
use crate::vendor::VendorResolver;

/// Batches may grow to this many times the flush size while the sink is
/// unreachable; beyond that the oldest entries are dropped.
pub const BATCH_CAP_FACTOR: usize = 10;

/// Reconnect backoff schedule; the last delay repeats.
const BACKOFF_SCHEDULE: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Disconnected,
    Connected,
    Running,
    Draining,
    Stopped,
}

struct DeviceEntry {
    update: DeviceUpdate,
    is_new: bool,
}

struct ApEntry {
    update: ApUpdate,
    is_new: bool,
}

#[derive(Default)]
struct Batches {
    devices: VecDeque<DeviceEntry>,
    aps: VecDeque<ApEntry>,
}

struct Backoff {
    index: usize,
    next_attempt: Option<Instant>,
}

impl Backoff {
    fn new() -> Self {
        Self {
            index: 0,
            next_attempt: None,
        }
    }

    fn ready(&self) -> bool {
        self.next_attempt.map_or(true, |at| Instant::now() >= at)
    }

    fn failure(&mut self) -> Duration {
        let delay = BACKOFF_SCHEDULE[self.index];
        self.next_attempt = Some(Instant::now() + delay);
        if self.index + 1 < BACKOFF_SCHEDULE.len() {
            self.index += 1;
        }
        delay
    }

    fn success(&mut self) {
        self.index = 0;
        self.next_attempt = None;
    }
}

pub struct Publisher {
    batches: Mutex<Batches>,
    wakeup: Condvar,
    state: Mutex<PublisherState>,
    sink: Mutex<Box<dyn DocumentSink>>,
    bus: Mutex<Box<dyn EventBus>>,
    resolver: VendorResolver,
    store: Mutex<Option<Arc<ObservationStore>>>,
    flusher: Mutex<Option<thread::JoinHandle<()>>>,
    batch_size: usize,
    batch_interval: Duration,
    batch_cap: usize,
}

impl Publisher {
    pub fn new(
        sink: Box<dyn DocumentSink>,
        bus: Box<dyn EventBus>,
        resolver: VendorResolver,
        batch_size: usize,
        batch_interval: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batches: Mutex::new(Batches::default()),
            wakeup: Condvar::new(),
            state: Mutex::new(PublisherState::Disconnected),
            sink: Mutex::new(sink),
            bus: Mutex::new(bus),
            resolver,
            store: Mutex::new(None),
            flusher: Mutex::new(None),
            batch_size,
            batch_interval,
            batch_cap: batch_size * BATCH_CAP_FACTOR,
        }
    }

    pub fn state(&self) -> PublisherState {
        *self.state.lock().unwrap()
    }

    /// Attempt both connections. Idempotent. Link failures are logged,
    /// not fatal — the flusher keeps retrying with backoff, and the
    /// sensor runs standalone in the meantime.
    pub fn connect(&self) {
        if self.state() != PublisherState::Disconnected {
            return;
        }
        if let Err(err) = self.sink.lock().unwrap().connect() {
            log::warn!("document sink connect failed, will retry: {}", err);
        }
        if let Err(err) = self.bus.lock().unwrap().connect() {
            log::warn!("event bus connect failed, will retry: {}", err);
        }
        *self.state.lock().unwrap() = PublisherState::Connected;
    }

    /// Spawn the flusher. Requires a prior `connect()`.
    pub fn start(self: Arc<Self>, store: Arc<ObservationStore>) -> Result<(), SensorError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != PublisherState::Connected {
                return Err(SensorError::State("start() requires a connected publisher"));
            }
            *state = PublisherState::Running;
        }
        *self.store.lock().unwrap() = Some(store);

        let publisher = self.clone();
        let handle = thread::Builder::new()
            .name("flusher".into())
            .spawn(move || publisher.run_flusher())
            .map_err(|err| {
                log::error!("flusher spawn failed: {}", err);
                SensorError::State("flusher thread spawn failed")
            })?;
        *self.flusher.lock().unwrap() = Some(handle);
        log::info!("publisher started");
        Ok(())
    }

    /// Store callback for devices. Only touches the batch mutex.
    pub fn on_device(&self, device: Device, is_new: bool) {
        let mut batches = self.batches.lock().unwrap();
        merge_device(&mut batches.devices, device, is_new, self.batch_cap);
        if batches.devices.len() >= self.batch_size {
            self.wakeup.notify_one();
        }
    }

    /// Store callback for access points.
    pub fn on_access_point(&self, ap: AccessPoint, is_new: bool) {
        let mut batches = self.batches.lock().unwrap();
        merge_ap(&mut batches.aps, ap, is_new, self.batch_cap);
        if batches.aps.len() >= self.batch_size {
            self.wakeup.notify_one();
        }
    }

    /// Stop the flusher, drain everything pending, close connections.
    /// Safe to call more than once.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                PublisherState::Running => *state = PublisherState::Draining,
                PublisherState::Connected | PublisherState::Disconnected => {
                    *state = PublisherState::Stopped;
                }
                PublisherState::Draining | PublisherState::Stopped => return,
            }
        }

        if self.state() == PublisherState::Draining {
            // Wake the flusher so it observes the state change promptly.
            {
                let _guard = self.batches.lock().unwrap();
                self.wakeup.notify_all();
            }
            if let Some(handle) = self.flusher.lock().unwrap().take() {
                let _ = handle.join();
            }

            let mut backoff = Backoff::new();
            self.flush_once(&mut backoff);
            self.drain_dirty();
        }

        self.sink.lock().unwrap().close();
        self.bus.lock().unwrap().close();
        *self.state.lock().unwrap() = PublisherState::Stopped;
        log::info!("publisher stopped");
    }

    fn run_flusher(&self) {
        log::info!("flusher started");
        let mut sink_backoff = Backoff::new();
        loop {
            {
                let mut batches = self.batches.lock().unwrap();
                let deadline = Instant::now() + self.batch_interval;
                loop {
                    if self.state() != PublisherState::Running {
                        return;
                    }
                    if batches.devices.len() >= self.batch_size
                        || batches.aps.len() >= self.batch_size
                    {
                        break;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self
                        .wakeup
                        .wait_timeout(batches, deadline - now)
                        .unwrap();
                    batches = guard;
                }
            }
            if self.state() != PublisherState::Running {
                return;
            }
            self.flush_once(&mut sink_backoff);
        }
    }

    /// One flush cycle: repair the sink link, swap the batches, upsert,
    /// announce discoveries, clear dirty marks for delivered records.
    fn flush_once(&self, sink_backoff: &mut Backoff) {
        // While the sink is down nothing is swapped out; entries keep
        // merging in the bounded batches until the link returns.
        if !self.ensure_sink(sink_backoff) {
            return;
        }

        let (mut device_entries, ap_entries) = {
            let mut batches = self.batches.lock().unwrap();
            (mem::take(&mut batches.devices), mem::take(&mut batches.aps))
        };
        if device_entries.is_empty() && ap_entries.is_empty() {
            return;
        }

        self.resolve_vendors(&mut device_entries);

        let mut delivered_devices = Vec::new();
        let mut delivered_aps = Vec::new();
        let mut events = Vec::new();
        let mut dropped = 0usize;

        {
            let mut sink = self.sink.lock().unwrap();
            for entry in &device_entries {
                match sink.upsert_device(&entry.update) {
                    Ok(()) => {
                        delivered_devices.push(entry.update.device.mac_address.clone());
                        if entry.is_new {
                            events.push(DiscoveryEvent::device_discovered(&entry.update.device));
                        }
                    }
                    Err(err) => {
                        dropped += 1;
                        log::error!(
                            "device upsert failed for {}: {}",
                            entry.update.device.mac_address,
                            err
                        );
                    }
                }
            }
            for entry in &ap_entries {
                match sink.upsert_access_point(&entry.update) {
                    Ok(()) => {
                        delivered_aps.push(entry.update.ap.bssid.clone());
                        if entry.is_new {
                            events.push(DiscoveryEvent::ap_discovered(&entry.update.ap));
                        }
                    }
                    Err(err) => {
                        dropped += 1;
                        log::error!("AP upsert failed for {}: {}", entry.update.ap.bssid, err);
                    }
                }
            }
            for event in &events {
                if let Err(err) = sink.insert_event(event) {
                    log::error!("event insert failed for {}: {}", event.subject(), err);
                }
            }
        }

        // Bus publishes are best-effort: failures are logged, never
        // retried, and never hold up the sink path.
        {
            let mut bus = self.bus.lock().unwrap();
            for event in &events {
                if !bus.is_connected() {
                    if let Err(err) = bus.connect() {
                        log::error!("event bus unavailable, dropping events: {}", err);
                        break;
                    }
                }
                if let Err(err) = bus.publish(event) {
                    log::error!("event publish failed for {}: {}", event.subject(), err);
                }
            }
        }

        let store = self.store.lock().unwrap().clone();
        if let Some(store) = store {
            store.mark_flushed(&delivered_devices, &delivered_aps);
        }

        log::debug!(
            "flushed {} devices, {} APs, {} events ({} dropped)",
            delivered_devices.len(),
            delivered_aps.len(),
            events.len(),
            dropped
        );
    }

    fn ensure_sink(&self, backoff: &mut Backoff) -> bool {
        let mut sink = self.sink.lock().unwrap();
        if !sink.is_connected() && !backoff.ready() {
            return false;
        }
        match sink.connect() {
            Ok(()) => {
                backoff.success();
                true
            }
            Err(err) => {
                let delay = backoff.failure();
                log::error!(
                    "document sink unavailable (next attempt in {:?}): {}",
                    delay,
                    err
                );
                false
            }
        }
    }

    /// At-most-once vendor lookup for devices first seen this flush.
    /// Runs on the flusher, with no publisher locks held, so a slow
    /// lookup service cannot stall capture ingestion.
    fn resolve_vendors(&self, entries: &mut VecDeque<DeviceEntry>) {
        let store = self.store.lock().unwrap().clone();
        for entry in entries.iter_mut() {
            if !entry.is_new || entry.update.device.vendor.is_some() {
                continue;
            }
            let Some(mac) = station::parse_mac(&entry.update.device.mac_address) else {
                continue;
            };
            if let Some(vendor) = self.resolver.resolve(&mac) {
                entry.update.device.vendor = Some(vendor.clone());
                if let Some(store) = &store {
                    store.set_vendor(&entry.update.device.mac_address, &vendor);
                }
            }
        }
    }

    /// Recover records whose batch entries were lost to the safety cap:
    /// anything still dirty after the final flush is upserted without
    /// deltas so the sink at least sees its latest state.
    fn drain_dirty(&self) {
        let Some(store) = self.store.lock().unwrap().clone() else {
            return;
        };
        let (devices, aps) = store.snapshot_and_clear_dirty();
        if devices.is_empty() && aps.is_empty() {
            return;
        }

        let mut sink = self.sink.lock().unwrap();
        if sink.connect().is_err() {
            log::warn!(
                "{} dirty records lost: document sink unreachable at shutdown",
                devices.len() + aps.len()
            );
            return;
        }
        for device in devices {
            let mac = device.mac_address.clone();
            if let Err(err) = sink.upsert_device(&DeviceUpdate::snapshot_only(device)) {
                log::error!("final upsert failed for {}: {}", mac, err);
            }
        }
        for ap in aps {
            let bssid = ap.bssid.clone();
            if let Err(err) = sink.upsert_access_point(&ApUpdate::snapshot_only(ap)) {
                log::error!("final upsert failed for {}: {}", bssid, err);
            }
        }
    }
}

fn merge_device(queue: &mut VecDeque<DeviceEntry>, device: Device, is_new: bool, cap: usize) {
    let latest_rssi = device.rssi_values.last().copied();
    if let Some(entry) = queue
        .iter_mut()
        .find(|entry| entry.update.device.mac_address == device.mac_address)
    {
        entry.update.device = device;
        entry.update.packets += 1;
        if let Some(rssi) = latest_rssi {
            station::push_rssi(&mut entry.update.rssi_samples, rssi);
        }
        entry.is_new |= is_new;
        return;
    }

    if queue.len() >= cap {
        if let Some(dropped) = queue.pop_front() {
            log::warn!(
                "device batch over cap, dropping oldest entry {}",
                dropped.update.device.mac_address
            );
        }
    }
    let mut rssi_samples = RssiWindow::new();
    if let Some(rssi) = latest_rssi {
        let _ = rssi_samples.push(rssi);
    }
    queue.push_back(DeviceEntry {
        update: DeviceUpdate {
            device,
            packets: 1,
            rssi_samples,
        },
        is_new,
    });
}

fn merge_ap(queue: &mut VecDeque<ApEntry>, ap: AccessPoint, is_new: bool, cap: usize) {
    let latest_rssi = ap.rssi_values.last().copied();
    if let Some(entry) = queue
        .iter_mut()
        .find(|entry| entry.update.ap.bssid == ap.bssid)
    {
        entry.update.ap = ap;
        entry.update.beacons += 1;
        if let Some(rssi) = latest_rssi {
            station::push_rssi(&mut entry.update.rssi_samples, rssi);
        }
        entry.is_new |= is_new;
        return;
    }

    if queue.len() >= cap {
        if let Some(dropped) = queue.pop_front() {
            log::warn!(
                "AP batch over cap, dropping oldest entry {}",
                dropped.update.ap.bssid
            );
        }
    }
    let mut rssi_samples = RssiWindow::new();
    if let Some(rssi) = latest_rssi {
        let _ = rssi_samples.push(rssi);
    }
    queue.push_back(ApEntry {
        update: ApUpdate {
            ap,
            beacons: 1,
            rssi_samples,
        },
        is_new,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Observation;
    use std::sync::atomic::{AtomicBool, Ordering};

    // ── In-memory sink and bus doubles ──────────────────────────────

    #[derive(Default)]
    struct SinkLog {
        devices: Vec<DeviceUpdate>,
        aps: Vec<ApUpdate>,
        events: Vec<DiscoveryEvent>,
        connects: usize,
        closed: bool,
    }

    struct MemorySink {
        log: Arc<Mutex<SinkLog>>,
        up: Arc<AtomicBool>,
        connected: bool,
    }

    impl DocumentSink for MemorySink {
        fn connect(&mut self) -> Result<(), SensorError> {
            self.log.lock().unwrap().connects += 1;
            if self.up.load(Ordering::SeqCst) {
                self.connected = true;
                Ok(())
            } else {
                self.connected = false;
                Err(SensorError::Sink("sink is down".into()))
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn upsert_device(&mut self, update: &DeviceUpdate) -> Result<(), SensorError> {
            if !self.connected {
                return Err(SensorError::Sink("not connected".into()));
            }
            self.log.lock().unwrap().devices.push(update.clone());
            Ok(())
        }

        fn upsert_access_point(&mut self, update: &ApUpdate) -> Result<(), SensorError> {
            if !self.connected {
                return Err(SensorError::Sink("not connected".into()));
            }
            self.log.lock().unwrap().aps.push(update.clone());
            Ok(())
        }

        fn insert_event(&mut self, event: &DiscoveryEvent) -> Result<(), SensorError> {
            if !self.connected {
                return Err(SensorError::Sink("not connected".into()));
            }
            self.log.lock().unwrap().events.push(event.clone());
            Ok(())
        }

        fn close(&mut self) {
            self.connected = false;
            self.log.lock().unwrap().closed = true;
        }
    }

    struct MemoryBus {
        events: Arc<Mutex<Vec<DiscoveryEvent>>>,
    }

    impl EventBus for MemoryBus {
        fn connect(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn publish(&mut self, event: &DiscoveryEvent) -> Result<(), SensorError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn close(&mut self) {}
    }

    struct Harness {
        publisher: Arc<Publisher>,
        sink_log: Arc<Mutex<SinkLog>>,
        bus_events: Arc<Mutex<Vec<DiscoveryEvent>>>,
        sink_up: Arc<AtomicBool>,
    }

    fn harness(batch_size: usize, batch_interval: Duration) -> Harness {
        let sink_log = Arc::new(Mutex::new(SinkLog::default()));
        let bus_events = Arc::new(Mutex::new(Vec::new()));
        let sink_up = Arc::new(AtomicBool::new(true));
        let publisher = Arc::new(Publisher::new(
            Box::new(MemorySink {
                log: sink_log.clone(),
                up: sink_up.clone(),
                connected: false,
            }),
            Box::new(MemoryBus {
                events: bus_events.clone(),
            }),
            VendorResolver::new(None),
            batch_size,
            batch_interval,
        ));
        Harness {
            publisher,
            sink_log,
            bus_events,
            sink_up,
        }
    }

    /// A store wired back into the publisher, the supervisor way.
    fn wired_store(publisher: &Arc<Publisher>) -> Arc<ObservationStore> {
        let for_devices = publisher.clone();
        let for_aps = publisher.clone();
        let store = Arc::new(ObservationStore::with_callbacks(
            Some(Box::new(move |device, is_new| {
                for_devices.on_device(device, is_new)
            })),
            Some(Box::new(move |ap, is_new| {
                for_aps.on_access_point(ap, is_new)
            })),
        ));
        *publisher.store.lock().unwrap() = Some(store.clone());
        store
    }

    fn probe(octet: u8, rssi: i8) -> Observation {
        Observation::ProbeRequest {
            source: [0xAA, 0xBB, 0xCC, 0x11, 0x22, octet],
            ssid: Some("cafe".into()),
            rssi,
        }
    }

    // ── Batching and debounce ───────────────────────────────────────

    #[test]
    fn repeated_callbacks_merge_into_one_entry() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        for i in 0..5 {
            store.ingest(probe(0x01, -60 - i));
        }

        let batches = h.publisher.batches.lock().unwrap();
        assert_eq!(batches.devices.len(), 1);
        let entry = &batches.devices[0];
        assert_eq!(entry.update.packets, 5);
        assert!(entry.is_new);
        assert_eq!(
            entry.update.rssi_samples.as_slice(),
            &[-60, -61, -62, -63, -64]
        );
        // Latest snapshot wins.
        assert_eq!(entry.update.device.packet_count, 5);
    }

    #[test]
    fn flush_delivers_deltas_and_discovery_events() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        store.ingest(probe(0x01, -62));
        store.ingest(probe(0x01, -61));
        store.ingest(probe(0x02, -70));

        h.publisher.flush_once(&mut Backoff::new());

        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices.len(), 2);
        let first = &log.devices[0];
        assert_eq!(first.device.mac_address, "aa:bb:cc:11:22:01");
        assert_eq!(first.packets, 2);
        // One discovery event per new record, to both sink and bus.
        assert_eq!(log.events.len(), 2);
        assert_eq!(h.bus_events.lock().unwrap().len(), 2);
    }

    #[test]
    fn flush_with_no_new_data_writes_nothing() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        store.ingest(probe(0x01, -62));

        h.publisher.flush_once(&mut Backoff::new());
        h.publisher.flush_once(&mut Backoff::new());

        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices.len(), 1);
        assert_eq!(log.events.len(), 1);
    }

    #[test]
    fn updates_never_fire_discovery_events() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        store.ingest(probe(0x01, -62));
        h.publisher.flush_once(&mut Backoff::new());

        store.ingest(probe(0x01, -61));
        h.publisher.flush_once(&mut Backoff::new());

        assert_eq!(h.bus_events.lock().unwrap().len(), 1);
        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices.len(), 2);
        assert_eq!(log.events.len(), 1);
    }

    #[test]
    fn batch_over_cap_drops_oldest() {
        let h = harness(1, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        // cap = batch_size * BATCH_CAP_FACTOR = 10
        for i in 0..12 {
            store.ingest(probe(i, -60));
        }
        let batches = h.publisher.batches.lock().unwrap();
        assert_eq!(batches.devices.len(), 10);
        assert_eq!(
            batches.devices[0].update.device.mac_address,
            "aa:bb:cc:11:22:02"
        );
    }

    // ── Sink outage and recovery ────────────────────────────────────

    #[test]
    fn sink_outage_holds_batches_and_arms_backoff() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        h.sink_up.store(false, Ordering::SeqCst);

        store.ingest(probe(0x01, -62));
        let mut backoff = Backoff::new();
        h.publisher.flush_once(&mut backoff);

        assert!(backoff.next_attempt.is_some());
        assert_eq!(backoff.index, 1);
        assert!(h.sink_log.lock().unwrap().devices.is_empty());
        assert_eq!(h.publisher.batches.lock().unwrap().devices.len(), 1);

        // Backoff not yet elapsed: the next cycle skips the connect.
        let connects_before = h.sink_log.lock().unwrap().connects;
        h.publisher.flush_once(&mut backoff);
        assert_eq!(h.sink_log.lock().unwrap().connects, connects_before);

        // Link restored: pending entries are delivered.
        h.sink_up.store(true, Ordering::SeqCst);
        h.publisher.flush_once(&mut Backoff::new());
        assert_eq!(h.sink_log.lock().unwrap().devices.len(), 1);
        assert!(h.publisher.batches.lock().unwrap().devices.is_empty());
    }

    #[test]
    fn backoff_delays_grow_to_the_cap() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.failure(), Duration::from_secs(1));
        assert_eq!(backoff.failure(), Duration::from_secs(2));
        assert_eq!(backoff.failure(), Duration::from_secs(5));
        assert_eq!(backoff.failure(), Duration::from_secs(10));
        assert_eq!(backoff.failure(), Duration::from_secs(10));
        backoff.success();
        assert_eq!(backoff.failure(), Duration::from_secs(1));
    }

    // ── Vendor resolution ───────────────────────────────────────────

    #[test]
    fn new_devices_get_vendor_from_offline_table() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        store.ingest(Observation::ProbeRequest {
            source: [0x24, 0x0A, 0xC4, 0x00, 0x00, 0x01], // Espressif OUI
            ssid: None,
            rssi: -62,
        });

        h.publisher.flush_once(&mut Backoff::new());

        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices[0].device.vendor.as_deref(), Some("Espressif"));
        // The store record carries the vendor from now on.
        let device = store.device("24:0a:c4:00:00:01").unwrap();
        assert_eq!(device.vendor.as_deref(), Some("Espressif"));
    }

    #[test]
    fn vendor_lookup_skipped_for_updates() {
        let h = harness(50, Duration::from_secs(10));
        let store = wired_store(&h.publisher);
        let obs = || Observation::ProbeRequest {
            source: [0x24, 0x0A, 0xC4, 0x00, 0x00, 0x01],
            ssid: None,
            rssi: -62,
        };
        store.ingest(obs());
        h.publisher.flush_once(&mut Backoff::new());

        // The vendor is already set; the update entry must carry it
        // through without another resolution pass.
        store.ingest(obs());
        h.publisher.flush_once(&mut Backoff::new());

        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices.len(), 2);
        assert_eq!(log.devices[1].device.vendor.as_deref(), Some("Espressif"));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn start_requires_connected() {
        let h = harness(50, Duration::from_secs(10));
        let store = Arc::new(ObservationStore::new());
        assert!(h.publisher.clone().start(store).is_err());
        assert_eq!(h.publisher.state(), PublisherState::Disconnected);
    }

    #[test]
    fn connect_is_idempotent() {
        let h = harness(50, Duration::from_secs(10));
        h.publisher.connect();
        h.publisher.connect();
        assert_eq!(h.publisher.state(), PublisherState::Connected);
        assert_eq!(h.sink_log.lock().unwrap().connects, 1);
    }

    #[test]
    fn shutdown_flushes_pending_records() {
        let h = harness(50, Duration::from_secs(3600));
        h.publisher.connect();
        let store = wired_store(&h.publisher);
        h.publisher.clone().start(store.clone()).unwrap();
        assert_eq!(h.publisher.state(), PublisherState::Running);

        store.ingest(probe(0x01, -62));
        store.ingest(probe(0x02, -63));
        store.ingest(probe(0x03, -64));

        // Shutdown arrives long before the scheduled flush.
        h.publisher.stop();

        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices.len(), 3);
        assert!(log.closed);
        assert_eq!(h.publisher.state(), PublisherState::Stopped);
        // The final drain found nothing left dirty: no duplicates.
        let macs: Vec<_> = log
            .devices
            .iter()
            .map(|u| u.device.mac_address.clone())
            .collect();
        let mut deduped = macs.clone();
        deduped.dedup();
        assert_eq!(macs.len(), deduped.len());
    }

    #[test]
    fn double_stop_is_a_no_op() {
        let h = harness(50, Duration::from_secs(3600));
        h.publisher.connect();
        let store = wired_store(&h.publisher);
        h.publisher.clone().start(store).unwrap();
        h.publisher.stop();
        h.publisher.stop();
        assert_eq!(h.publisher.state(), PublisherState::Stopped);
    }

    #[test]
    fn size_trigger_flushes_before_the_interval() {
        let h = harness(2, Duration::from_secs(3600));
        h.publisher.connect();
        let store = wired_store(&h.publisher);
        h.publisher.clone().start(store.clone()).unwrap();

        store.ingest(probe(0x01, -62));
        store.ingest(probe(0x02, -63));

        // The flusher wakes on the size trigger, not the hour timer.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if h.sink_log.lock().unwrap().devices.len() == 2 {
                break;
            }
            assert!(Instant::now() < deadline, "size-triggered flush never ran");
            thread::sleep(Duration::from_millis(10));
        }
        h.publisher.stop();
    }

    #[test]
    fn cap_casualties_recovered_by_final_drain() {
        let h = harness(1, Duration::from_secs(3600));
        h.publisher.connect();
        let store = wired_store(&h.publisher);

        // Sink down: 12 distinct devices overflow the cap of 10.
        h.sink_up.store(false, Ordering::SeqCst);
        for i in 0..12 {
            store.ingest(probe(i, -60));
        }
        assert_eq!(h.publisher.batches.lock().unwrap().devices.len(), 10);

        // Sink returns before shutdown: the batch flush delivers 10 and
        // the dirty drain recovers the 2 dropped entries.
        h.sink_up.store(true, Ordering::SeqCst);
        h.publisher.flush_once(&mut Backoff::new());
        h.publisher.drain_dirty();

        let log = h.sink_log.lock().unwrap();
        assert_eq!(log.devices.len(), 12);
    }
}
