/// Device and access-point records, plus MAC address helpers.
///
/// Records are plain values. All merge logic that needs both maps and
/// the dirty bookkeeping lives in [`crate::store`]; the methods here
/// only touch a single record.
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// RSSI sliding-window length per record.
pub const RSSI_WINDOW: usize = 10;

/// Soft cap on distinct probed SSIDs retained per device.
pub const PROBE_SSID_CAP: usize = 64;

/// Bounded RSSI history, ordered oldest to newest.
pub type RssiWindow = heapless::Vec<i8, RSSI_WINDOW>;

/// Format a raw MAC as the canonical lowercase colon-hex string.
pub fn canonical_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// True for addresses that can identify a station: the group bit of the
/// first octet is clear. Rejects broadcast and all multicast.
pub fn is_unicast(mac: &[u8; 6]) -> bool {
    mac[0] & 0x01 == 0
}

/// First three octets of a MAC, the vendor-administered prefix.
pub fn oui(mac: &[u8; 6]) -> [u8; 3] {
    [mac[0], mac[1], mac[2]]
}

/// Parse a colon-hex MAC string back into raw octets.
pub fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let mut bytes = [0u8; 6];
    let mut parts = mac.split(':');
    for byte in &mut bytes {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(bytes)
}

/// Push a sample into a window, discarding the oldest on overflow.
pub fn push_rssi(window: &mut RssiWindow, rssi: i8) {
    if window.is_full() {
        window.remove(0);
    }
    let _ = window.push(rssi);
}

/// Beacon-derived encryption classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
    Unknown,
}

impl Encryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encryption::Open => "Open",
            Encryption::Wep => "WEP",
            Encryption::Wpa => "WPA",
            Encryption::Wpa2 => "WPA2",
            Encryption::Wpa3 => "WPA3",
            Encryption::Unknown => "Unknown",
        }
    }
}

/// A client station, keyed by source MAC of its probe requests.
#[derive(Debug, Clone)]
pub struct Device {
    pub mac_address: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub rssi_values: RssiWindow,
    pub probe_ssids: BTreeSet<String>,
    pub packet_count: u64,
    pub vendor: Option<String>,
}

impl Device {
    pub fn new(mac_address: String, rssi: i8, ssid: Option<&str>, now: DateTime<Utc>) -> Self {
        let mut rssi_values = RssiWindow::new();
        let _ = rssi_values.push(rssi);
        let mut device = Self {
            mac_address,
            first_seen: now,
            last_seen: now,
            rssi_values,
            probe_ssids: BTreeSet::new(),
            packet_count: 1,
            vendor: None,
        };
        if let Some(ssid) = ssid {
            device.add_probe_ssid(ssid);
        }
        device
    }

    /// Merge one more probe request into the record.
    pub fn observe(&mut self, rssi: i8, ssid: Option<&str>, now: DateTime<Utc>) {
        push_rssi(&mut self.rssi_values, rssi);
        if let Some(ssid) = ssid {
            self.add_probe_ssid(ssid);
        }
        self.packet_count += 1;
        self.last_seen = now;
    }

    fn add_probe_ssid(&mut self, ssid: &str) {
        if ssid.is_empty() {
            return;
        }
        if self.probe_ssids.len() >= PROBE_SSID_CAP && !self.probe_ssids.contains(ssid) {
            return;
        }
        self.probe_ssids.insert(ssid.to_string());
    }

    pub fn average_rssi(&self) -> Option<f64> {
        if self.rssi_values.is_empty() {
            return None;
        }
        let sum: i64 = self.rssi_values.iter().map(|&v| i64::from(v)).sum();
        Some(sum as f64 / self.rssi_values.len() as f64)
    }
}

/// An access point, keyed by BSSID of its beacons.
#[derive(Debug, Clone)]
pub struct AccessPoint {
    pub bssid: String,
    pub ssid: String,
    pub channel: u8,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub rssi_values: RssiWindow,
    pub beacon_count: u64,
    pub encryption: Encryption,
}

impl AccessPoint {
    pub fn new(
        bssid: String,
        ssid: Option<&str>,
        channel: u8,
        rssi: i8,
        encryption: Encryption,
        now: DateTime<Utc>,
    ) -> Self {
        let mut rssi_values = RssiWindow::new();
        let _ = rssi_values.push(rssi);
        Self {
            bssid,
            ssid: ssid.unwrap_or("").to_string(),
            channel,
            first_seen: now,
            last_seen: now,
            rssi_values,
            beacon_count: 1,
            encryption,
        }
    }

    /// Merge one more beacon into the record.
    ///
    /// The SSID upgrades once a hidden network reveals its name; channel
    /// and encryption always re-assert to the latest observation since
    /// the DS parameter IE is authoritative and APs can be reconfigured.
    pub fn observe(
        &mut self,
        rssi: i8,
        ssid: Option<&str>,
        channel: u8,
        encryption: Encryption,
        now: DateTime<Utc>,
    ) {
        push_rssi(&mut self.rssi_values, rssi);
        if self.ssid.is_empty() {
            if let Some(name) = ssid {
                if !name.is_empty() {
                    self.ssid = name.to_string();
                }
            }
        }
        if channel != 0 {
            self.channel = channel;
        }
        self.encryption = encryption;
        self.beacon_count += 1;
        self.last_seen = now;
    }

    pub fn average_rssi(&self) -> Option<f64> {
        if self.rssi_values.is_empty() {
            return None;
        }
        let sum: i64 = self.rssi_values.iter().map(|&v| i64::from(v)).sum();
        Some(sum as f64 / self.rssi_values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_mac_is_lowercase_colon_hex() {
        let mac = [0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33];
        assert_eq!(canonical_mac(&mac), "aa:bb:cc:11:22:33");
    }

    #[test]
    fn parse_mac_round_trips() {
        let mac = [0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33];
        assert_eq!(parse_mac(&canonical_mac(&mac)), Some(mac));
        assert_eq!(parse_mac("aa:bb:cc"), None);
        assert_eq!(parse_mac("aa:bb:cc:11:22:zz"), None);
        assert_eq!(parse_mac("aa:bb:cc:11:22:33:44"), None);
    }

    #[test]
    fn broadcast_and_multicast_are_not_unicast() {
        assert!(!is_unicast(&[0xFF; 6]));
        assert!(!is_unicast(&[0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]));
        assert!(is_unicast(&[0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]));
    }

    #[test]
    fn rssi_window_discards_oldest() {
        let mut window = RssiWindow::new();
        for i in 0..15 {
            push_rssi(&mut window, -50 - i as i8);
        }
        assert_eq!(window.len(), RSSI_WINDOW);
        // Last 10 samples in arrival order: -55 .. -64
        let expected: Vec<i8> = (5..15).map(|i| -50 - i as i8).collect();
        assert_eq!(window.as_slice(), expected.as_slice());
    }

    #[test]
    fn device_observe_updates_window_count_and_ssids() {
        let now = Utc::now();
        let mut device = Device::new("aa:bb:cc:11:22:33".into(), -62, Some("cafe"), now);
        assert_eq!(device.packet_count, 1);
        assert_eq!(device.rssi_values.as_slice(), &[-62]);
        assert!(device.probe_ssids.contains("cafe"));

        device.observe(-60, Some("office"), now);
        assert_eq!(device.packet_count, 2);
        assert_eq!(device.rssi_values.as_slice(), &[-62, -60]);
        assert_eq!(device.probe_ssids.len(), 2);
        assert!(device.first_seen <= device.last_seen);
    }

    #[test]
    fn device_ignores_empty_probe_ssid() {
        let now = Utc::now();
        let mut device = Device::new("aa:bb:cc:11:22:33".into(), -62, Some(""), now);
        device.observe(-60, None, now);
        assert!(device.probe_ssids.is_empty());
    }

    #[test]
    fn probe_ssid_soft_cap_holds() {
        let now = Utc::now();
        let mut device = Device::new("aa:bb:cc:11:22:33".into(), -62, None, now);
        for i in 0..(PROBE_SSID_CAP + 10) {
            device.observe(-60, Some(&format!("net-{}", i)), now);
        }
        assert_eq!(device.probe_ssids.len(), PROBE_SSID_CAP);
        // Already-known SSIDs still merge at the cap.
        device.observe(-60, Some("net-0"), now);
        assert_eq!(device.probe_ssids.len(), PROBE_SSID_CAP);
    }

    #[test]
    fn ap_hidden_ssid_upgrades_once_revealed() {
        let now = Utc::now();
        let mut ap = AccessPoint::new(
            "de:ad:be:ef:00:01".into(),
            None,
            6,
            -40,
            Encryption::Wpa2,
            now,
        );
        assert_eq!(ap.ssid, "");
        ap.observe(-42, Some("home"), 6, Encryption::Wpa2, now);
        assert_eq!(ap.ssid, "home");
        assert_eq!(ap.beacon_count, 2);
        // A later hidden beacon does not clear the learned name.
        ap.observe(-44, None, 6, Encryption::Wpa2, now);
        assert_eq!(ap.ssid, "home");
    }

    #[test]
    fn ap_channel_reasserts_but_zero_is_ignored() {
        let now = Utc::now();
        let mut ap = AccessPoint::new(
            "de:ad:be:ef:00:01".into(),
            Some("home"),
            6,
            -40,
            Encryption::Open,
            now,
        );
        ap.observe(-40, Some("home"), 11, Encryption::Open, now);
        assert_eq!(ap.channel, 11);
        ap.observe(-40, Some("home"), 0, Encryption::Open, now);
        assert_eq!(ap.channel, 11);
    }

    #[test]
    fn average_rssi_over_window() {
        let now = Utc::now();
        let mut device = Device::new("aa:bb:cc:11:22:33".into(), -60, None, now);
        device.observe(-70, None, now);
        assert_eq!(device.average_rssi(), Some(-65.0));
    }
}
