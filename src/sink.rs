/// Document sink: the durable side of the publisher.
///
/// The trait is the flush unit's contract; MongoDB is the production
/// implementation. Upserts carry per-flush deltas so repeated flushes
/// of a live record never double-count, while scalar fields mirror the
/// in-memory record.
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::sync::{Client, Collection, Database};
use mongodb::IndexModel;

use crate::bus::DiscoveryEvent;
use crate::error::SensorError;
use crate::station::{AccessPoint, Device, RssiWindow, RSSI_WINDOW};

/// One device flush unit: the latest snapshot plus the deltas merged
/// into the batch since the previous flush.
#[derive(Debug, Clone)]
pub struct DeviceUpdate {
    pub device: Device,
    /// Packets observed since the record was last flushed.
    pub packets: u64,
    /// Newest RSSI samples since the last flush, at most the window.
    pub rssi_samples: RssiWindow,
}

/// One access-point flush unit.
#[derive(Debug, Clone)]
pub struct ApUpdate {
    pub ap: AccessPoint,
    pub beacons: u64,
    pub rssi_samples: RssiWindow,
}

impl DeviceUpdate {
    /// A delta-free update, used by the final dirty-record drain.
    pub fn snapshot_only(device: Device) -> Self {
        Self {
            device,
            packets: 0,
            rssi_samples: RssiWindow::new(),
        }
    }
}

impl ApUpdate {
    pub fn snapshot_only(ap: AccessPoint) -> Self {
        Self {
            ap,
            beacons: 0,
            rssi_samples: RssiWindow::new(),
        }
    }
}

/// The publisher's view of the document store.
pub trait DocumentSink: Send {
    /// Idempotent; validates an existing connection and re-establishes
    /// a dropped one.
    fn connect(&mut self) -> Result<(), SensorError>;
    fn is_connected(&self) -> bool;
    fn upsert_device(&mut self, update: &DeviceUpdate) -> Result<(), SensorError>;
    fn upsert_access_point(&mut self, update: &ApUpdate) -> Result<(), SensorError>;
    fn insert_event(&mut self, event: &DiscoveryEvent) -> Result<(), SensorError>;
    fn close(&mut self);
}

/// MongoDB document sink. Collections: `devices` (unique on
/// `mac_address`), `access_points` (unique on `bssid`), `events`.
/// Single-threaded use — only the flusher thread holds the client.
pub struct MongoSink {
    uri: String,
    db_name: String,
    client: Option<Client>,
    devices: Option<Collection<Document>>,
    access_points: Option<Collection<Document>>,
    events: Option<Collection<Document>>,
}

impl MongoSink {
    pub fn new(uri: &str, db_name: &str) -> Self {
        Self {
            uri: uri.to_string(),
            db_name: db_name.to_string(),
            client: None,
            devices: None,
            access_points: None,
            events: None,
        }
    }

    fn drop_connection(&mut self) {
        self.client = None;
        self.devices = None;
        self.access_points = None;
        self.events = None;
    }

    fn ensure_indexes(db: &Database) {
        let results = [
            unique_index(db, "devices", "mac_address"),
            descending_index(db, "devices", "last_seen"),
            unique_index(db, "access_points", "bssid"),
            descending_index(db, "access_points", "last_seen"),
            descending_index(db, "events", "timestamp"),
            ascending_index(db, "events", "mac_address"),
        ];
        for result in results {
            if let Err(err) = result {
                log::warn!("index creation failed: {}", err);
            }
        }
    }
}

impl DocumentSink for MongoSink {
    fn connect(&mut self) -> Result<(), SensorError> {
        if let Some(client) = &self.client {
            match client
                .database(&self.db_name)
                .run_command(doc! { "ping": 1 }, None)
            {
                Ok(_) => return Ok(()),
                Err(err) => {
                    log::warn!("document sink connection lost: {}", err);
                    self.drop_connection();
                }
            }
        }

        let client = Client::with_uri_str(&self.uri).map_err(sink_err)?;
        let db = client.database(&self.db_name);
        db.run_command(doc! { "ping": 1 }, None).map_err(sink_err)?;
        Self::ensure_indexes(&db);

        self.devices = Some(db.collection("devices"));
        self.access_points = Some(db.collection("access_points"));
        self.events = Some(db.collection("events"));
        self.client = Some(client);
        log::info!("connected to document sink, database {}", self.db_name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn upsert_device(&mut self, update: &DeviceUpdate) -> Result<(), SensorError> {
        let collection = self
            .devices
            .as_ref()
            .ok_or_else(|| SensorError::Sink("not connected".into()))?;
        let device = &update.device;

        let mut set = doc! { "last_seen": bson_time(device.last_seen) };
        if let Some(average) = device.average_rssi() {
            set.insert("average_rssi", average);
        }
        if let Some(vendor) = &device.vendor {
            set.insert("vendor", vendor.clone());
        }

        let rssi: Vec<i32> = update.rssi_samples.iter().map(|&v| i32::from(v)).collect();
        let ssids: Vec<Bson> = device
            .probe_ssids
            .iter()
            .map(|s| Bson::String(s.clone()))
            .collect();

        collection
            .update_one(
                doc! { "mac_address": &device.mac_address },
                doc! {
                    "$set": set,
                    "$setOnInsert": { "first_seen": bson_time(device.first_seen) },
                    "$push": {
                        "rssi_values": { "$each": rssi, "$slice": -(RSSI_WINDOW as i32) }
                    },
                    "$addToSet": { "probe_ssids": { "$each": ssids } },
                    "$inc": { "packet_count": update.packets as i64 },
                },
                UpdateOptions::builder().upsert(true).build(),
            )
            .map_err(sink_err)?;
        Ok(())
    }

    fn upsert_access_point(&mut self, update: &ApUpdate) -> Result<(), SensorError> {
        let collection = self
            .access_points
            .as_ref()
            .ok_or_else(|| SensorError::Sink("not connected".into()))?;
        let ap = &update.ap;

        let mut set = doc! {
            "ssid": &ap.ssid,
            "channel": ap.channel as i32,
            "encryption": ap.encryption.as_str(),
            "last_seen": bson_time(ap.last_seen),
        };
        if let Some(average) = ap.average_rssi() {
            set.insert("average_rssi", average);
        }

        let rssi: Vec<i32> = update.rssi_samples.iter().map(|&v| i32::from(v)).collect();

        collection
            .update_one(
                doc! { "bssid": &ap.bssid },
                doc! {
                    "$set": set,
                    "$setOnInsert": { "first_seen": bson_time(ap.first_seen) },
                    "$push": {
                        "rssi_values": { "$each": rssi, "$slice": -(RSSI_WINDOW as i32) }
                    },
                    "$inc": { "beacon_count": update.beacons as i64 },
                },
                UpdateOptions::builder().upsert(true).build(),
            )
            .map_err(sink_err)?;
        Ok(())
    }

    fn insert_event(&mut self, event: &DiscoveryEvent) -> Result<(), SensorError> {
        let collection = self
            .events
            .as_ref()
            .ok_or_else(|| SensorError::Sink("not connected".into()))?;

        let mut document = doc! {
            "timestamp": bson_time(event.timestamp),
            "event_type": event.event_type,
            "mac_address": event.subject(),
        };
        if let Some(rssi) = event.rssi {
            document.insert("rssi", i32::from(rssi));
        }
        if let Some(vendor) = &event.vendor {
            document.insert("vendor", vendor.clone());
        }
        if let Some(ssid) = &event.ssid {
            document.insert("ssid", ssid.clone());
        }
        if let Some(channel) = event.channel {
            document.insert("channel", channel as i32);
        }

        collection.insert_one(document, None).map_err(sink_err)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.client.is_some() {
            self.drop_connection();
            log::info!("document sink connection closed");
        }
    }
}

fn bson_time(time: chrono::DateTime<chrono::Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(time.timestamp_millis())
}

fn sink_err<E: std::fmt::Display>(err: E) -> SensorError {
    SensorError::Sink(err.to_string())
}

fn index_keys(field: &str, direction: i32) -> Document {
    let mut keys = Document::new();
    keys.insert(field, direction);
    keys
}

fn unique_index(db: &Database, collection: &str, field: &str) -> mongodb::error::Result<()> {
    let model = IndexModel::builder()
        .keys(index_keys(field, 1))
        .options(IndexOptions::builder().unique(true).build())
        .build();
    db.collection::<Document>(collection)
        .create_index(model, None)
        .map(|_| ())
}

fn ascending_index(db: &Database, collection: &str, field: &str) -> mongodb::error::Result<()> {
    let model = IndexModel::builder().keys(index_keys(field, 1)).build();
    db.collection::<Document>(collection)
        .create_index(model, None)
        .map(|_| ())
}

fn descending_index(db: &Database, collection: &str, field: &str) -> mongodb::error::Result<()> {
    let model = IndexModel::builder().keys(index_keys(field, -1)).build();
    db.collection::<Document>(collection)
        .create_index(model, None)
        .map(|_| ())
}
