/// Discovery events and the message-bus side of the publisher.
///
/// Events are JSON envelopes on a durable queue, published with
/// persistent delivery. Publishing is best-effort: a failed publish is
/// logged and dropped, and the connection is torn down so the next
/// flush cycle reconnects.
use amiquip::{AmqpProperties, Connection, Exchange, Publish, QueueDeclareOptions};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::error::SensorError;
use crate::station::{AccessPoint, Device};

pub const EVENT_DEVICE_DISCOVERED: &str = "device_discovered";
pub const EVENT_AP_DISCOVERED: &str = "ap_discovered";

/// Envelope for a first-sighting announcement. Optional fields are
/// omitted from the JSON rather than serialized as null.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryEvent {
    pub event_type: &'static str,
    #[serde(serialize_with = "rfc3339_utc")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
}

fn rfc3339_utc<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl DiscoveryEvent {
    pub fn device_discovered(device: &Device) -> Self {
        Self {
            event_type: EVENT_DEVICE_DISCOVERED,
            timestamp: Utc::now(),
            mac_address: Some(device.mac_address.clone()),
            bssid: None,
            rssi: device.rssi_values.last().copied(),
            vendor: device.vendor.clone(),
            ssid: None,
            channel: None,
        }
    }

    pub fn ap_discovered(ap: &AccessPoint) -> Self {
        Self {
            event_type: EVENT_AP_DISCOVERED,
            timestamp: Utc::now(),
            mac_address: None,
            bssid: Some(ap.bssid.clone()),
            rssi: ap.rssi_values.last().copied(),
            vendor: None,
            ssid: if ap.ssid.is_empty() {
                None
            } else {
                Some(ap.ssid.clone())
            },
            channel: if ap.channel == 0 {
                None
            } else {
                Some(ap.channel)
            },
        }
    }

    /// The identity this event is about, whichever form it takes.
    pub fn subject(&self) -> &str {
        self.mac_address
            .as_deref()
            .or(self.bssid.as_deref())
            .unwrap_or("")
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(err) => {
                log::debug!("event serialization failed: {}", err);
                String::new()
            }
        }
    }
}

/// The publisher's view of the message bus.
pub trait EventBus: Send {
    /// Idempotent; re-establishes a dropped connection.
    fn connect(&mut self) -> Result<(), SensorError>;
    fn is_connected(&self) -> bool;
    fn publish(&mut self, event: &DiscoveryEvent) -> Result<(), SensorError>;
    fn close(&mut self);
}

/// RabbitMQ-backed bus: one durable queue, persistent messages through
/// the default exchange. Single-threaded use — only the flusher thread
/// touches the connection.
pub struct AmqpBus {
    url: String,
    queue: String,
    connection: Option<Connection>,
    channel: Option<amiquip::Channel>,
}

impl AmqpBus {
    pub fn new(host: &str, queue: &str) -> Self {
        Self {
            url: format!("amqp://{}", host),
            queue: queue.to_string(),
            connection: None,
            channel: None,
        }
    }
}

impl EventBus for AmqpBus {
    fn connect(&mut self) -> Result<(), SensorError> {
        if self.channel.is_some() {
            return Ok(());
        }
        let mut connection = Connection::insecure_open(&self.url).map_err(bus_err)?;
        let channel = connection.open_channel(None).map_err(bus_err)?;
        channel
            .queue_declare(
                self.queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
            )
            .map_err(bus_err)?;
        log::info!("connected to event bus at {}", self.url);
        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn publish(&mut self, event: &DiscoveryEvent) -> Result<(), SensorError> {
        let Some(channel) = &self.channel else {
            return Err(SensorError::Bus("not connected".into()));
        };
        let body = event.to_json();
        let properties = AmqpProperties::default().with_delivery_mode(2);
        let result = Exchange::direct(channel).publish(Publish::with_properties(
            body.as_bytes(),
            self.queue.as_str(),
            properties,
        ));
        if let Err(err) = result {
            // Drop the link; the next flush cycle reconnects.
            self.channel = None;
            self.connection = None;
            return Err(bus_err(err));
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.close();
        }
        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.close() {
                log::debug!("event bus close: {}", err);
            } else {
                log::info!("event bus connection closed");
            }
        }
    }
}

fn bus_err<E: std::fmt::Display>(err: E) -> SensorError {
    SensorError::Bus(err.to_string())
}
