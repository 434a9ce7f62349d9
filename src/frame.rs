/// 802.11 frame decoding: radiotap header plus management frame parsing.
///
/// Pure parsing logic with no capture or OS dependencies. The capture
/// loop hands every frame here; anything that is not a well-formed
/// beacon or probe request comes back as `None`.
use radiotap::Radiotap;

use crate::station::Encryption;

/// RSSI substituted when the radiotap header carries no antenna signal.
pub const RSSI_SENTINEL: i8 = -100;

/// Management frame MAC header: FC(2) + duration(2) + 3 addresses + seq(2).
const MGMT_HEADER_LEN: usize = 24;

/// Beacon fixed parameters: timestamp(8) + interval(2) + capabilities(2).
const BEACON_FIXED_LEN: usize = 12;

const SUBTYPE_PROBE_REQUEST: u8 = 0x04;
const SUBTYPE_BEACON: u8 = 0x08;

/// Privacy bit of the capability field.
const CAP_PRIVACY: u16 = 1 << 4;

const IE_SSID: u8 = 0;
const IE_DS_PARAMETER: u8 = 3;
const IE_RSN: u8 = 48;
const IE_VENDOR: u8 = 221;

/// Microsoft OUI + type 1 marks the legacy WPA vendor element.
const WPA_VENDOR_PREFIX: [u8; 4] = [0x00, 0x50, 0xF2, 0x01];

/// 00-0F-AC:8, the SAE AKM suite selector.
const AKM_SAE: [u8; 4] = [0x00, 0x0F, 0xAC, 0x08];

/// A decoded management frame, ready for the observation store.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Beacon {
        bssid: [u8; 6],
        ssid: Option<String>,
        channel: u8,
        rssi: i8,
        encryption: Encryption,
    },
    ProbeRequest {
        source: [u8; 6],
        ssid: Option<String>,
        rssi: i8,
    },
}

/// Decode one captured frame (radiotap header included).
///
/// Returns `None` for truncated input, non-management frames, and
/// subtypes other than beacon and probe request.
pub fn decode(data: &[u8]) -> Option<Observation> {
    let radiotap = Radiotap::from_bytes(data).ok()?;
    let rssi = radiotap
        .antenna_signal
        .map(|signal| signal.value)
        .unwrap_or(RSSI_SENTINEL);

    let frame = data.get(radiotap.header.length..)?;
    if frame.len() < MGMT_HEADER_LEN {
        return None;
    }

    let frame_control = frame[0];
    if frame_control & 0x0c != 0 {
        // Type bits: only management (0) is interesting.
        return None;
    }
    match (frame_control >> 4) & 0x0f {
        SUBTYPE_BEACON => decode_beacon(frame, rssi),
        SUBTYPE_PROBE_REQUEST => decode_probe_request(frame, rssi),
        _ => None,
    }
}

fn decode_beacon(frame: &[u8], rssi: i8) -> Option<Observation> {
    let bssid: [u8; 6] = frame[16..22].try_into().ok()?;

    let fixed = frame.get(MGMT_HEADER_LEN..MGMT_HEADER_LEN + BEACON_FIXED_LEN)?;
    let capabilities = u16::from_le_bytes([fixed[10], fixed[11]]);
    let elements = &frame[MGMT_HEADER_LEN + BEACON_FIXED_LEN..];

    let mut ssid = None;
    let mut channel = None;
    let mut rsn: Option<&[u8]> = None;
    let mut has_wpa_vendor = false;

    for (id, body) in ElementIter::new(elements) {
        match id {
            // First SSID and first DS parameter win.
            IE_SSID if ssid.is_none() => ssid = Some(body),
            IE_DS_PARAMETER if channel.is_none() && !body.is_empty() => channel = Some(body[0]),
            IE_RSN if rsn.is_none() => rsn = Some(body),
            IE_VENDOR if body.len() >= 4 && body[..4] == WPA_VENDOR_PREFIX => {
                has_wpa_vendor = true;
            }
            _ => {}
        }
    }

    let encryption = if capabilities & CAP_PRIVACY == 0 {
        Encryption::Open
    } else if let Some(rsn) = rsn {
        classify_rsn(rsn)
    } else if has_wpa_vendor {
        Encryption::Wpa
    } else {
        Encryption::Wep
    };

    Some(Observation::Beacon {
        bssid,
        ssid: ssid.and_then(decode_ssid),
        channel: channel.unwrap_or(0),
        rssi,
        encryption,
    })
}

fn decode_probe_request(frame: &[u8], rssi: i8) -> Option<Observation> {
    let source: [u8; 6] = frame[10..16].try_into().ok()?;

    let elements = &frame[MGMT_HEADER_LEN..];
    let ssid = ElementIter::new(elements)
        .find(|&(id, _)| id == IE_SSID)
        .and_then(|(_, body)| decode_ssid(body));

    Some(Observation::ProbeRequest { source, ssid, rssi })
}

/// An empty SSID element means the network name is hidden (beacons) or
/// the probe is a wildcard scan; both decode to `None`.
fn decode_ssid(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(body).into_owned())
    }
}

/// RSN present means WPA2 at minimum; an SAE suite in the AKM list
/// upgrades the classification to WPA3. A truncated RSN element keeps
/// the WPA2 baseline.
fn classify_rsn(body: &[u8]) -> Encryption {
    // version(2) + group cipher(4) + pairwise count(2) + pairwise suites
    let Some(pairwise) = read_u16_le(body, 6) else {
        return Encryption::Wpa2;
    };
    let akm_start = 8 + pairwise as usize * 4;

    let Some(akm_count) = read_u16_le(body, akm_start) else {
        return Encryption::Wpa2;
    };
    let akm_count = akm_count as usize;

    for i in 0..akm_count {
        let offset = akm_start + 2 + i * 4;
        match body.get(offset..offset + 4) {
            Some(suite) if suite == AKM_SAE.as_slice() => return Encryption::Wpa3,
            Some(_) => {}
            None => break,
        }
    }
    Encryption::Wpa2
}

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Walks a tagged-element list: `(id: u8, len: u8, data[len])` repeated.
/// Stops at end of buffer or the first element whose declared length
/// overruns the remaining bytes.
struct ElementIter<'a> {
    data: &'a [u8],
}

impl<'a> ElementIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let id = self.data[0];
        let len = self.data[1] as usize;
        if self.data.len() < 2 + len {
            // Malformed length: stop the walk.
            self.data = &[];
            return None;
        }
        let body = &self.data[2..2 + len];
        self.data = &self.data[2 + len..];
        Some((id, body))
    }
}
