/// Runtime configuration sourced from the environment, with the channel
/// plans compiled in.
///
/// Every knob has a default so the sensor starts with no environment at
/// all. Malformed values fall back to the default with a warning rather
/// than aborting startup.
use std::env;
use std::time::Duration;

/// 2.4 GHz channel plan (US allocation, always hopped).
pub const CHANNELS_2_4GHZ: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

/// 5 GHz channel plan, appended only when `ENABLE_5GHZ` is set.
/// Channel-set failures on unsupported channels are non-fatal, so an
/// over-broad plan costs one hop slot per unsupported channel.
pub const CHANNELS_5GHZ: &[u8] = &[
    36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140, 144,
    149, 153, 157, 161, 165,
];

/// Public OUI lookup service, queried when the compiled-in table misses.
pub const DEFAULT_VENDOR_API: &str = "https://api.macvendors.com";

#[derive(Debug, Clone)]
pub struct Config {
    /// Wireless interface to put into monitor mode.
    pub interface: String,
    /// Dwell time per channel in the hop loop.
    pub channel_hop_interval: Duration,
    /// Hop the 5 GHz plan in addition to 2.4 GHz.
    pub enable_5ghz: bool,
    /// Document sink connection string and database name.
    pub mongodb_uri: String,
    pub mongodb_db: String,
    /// Event bus host and queue name.
    pub rabbitmq_host: String,
    pub rabbitmq_queue: String,
    /// Flush when a batch reaches this many entries.
    pub batch_size: usize,
    /// Flush at least this often regardless of batch size.
    pub batch_interval: Duration,
    /// Vendor lookup endpoint; empty string disables the HTTP fallback.
    pub vendor_api_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let hop_secs = positive_or("CHANNEL_HOP_INTERVAL", 0.5);
        let batch_interval_secs = positive_or("BATCH_INTERVAL", 10.0);
        let vendor_api_url = match env::var("VENDOR_API_URL") {
            Ok(url) if url.is_empty() => None,
            Ok(url) => Some(url),
            Err(_) => Some(DEFAULT_VENDOR_API.to_string()),
        };
        Self {
            interface: var_or("INTERFACE", "wlan0"),
            channel_hop_interval: Duration::from_secs_f64(hop_secs),
            enable_5ghz: env::var("ENABLE_5GHZ").is_ok(),
            mongodb_uri: var_or(
                "MONGODB_URI",
                "mongodb://localhost:27017/?serverSelectionTimeoutMS=5000",
            ),
            mongodb_db: var_or("MONGODB_DB", "aircensus"),
            rabbitmq_host: var_or("RABBITMQ_HOST", "localhost"),
            rabbitmq_queue: var_or("RABBITMQ_QUEUE", "aircensus_events"),
            batch_size: parse_var("BATCH_SIZE", 50usize),
            batch_interval: Duration::from_secs_f64(batch_interval_secs),
            vendor_api_url,
        }
    }

    /// The full hop schedule: 2.4 GHz, plus 5 GHz when enabled.
    pub fn channel_plan(&self) -> Vec<u8> {
        let mut plan = CHANNELS_2_4GHZ.to_vec();
        if self.enable_5ghz {
            plan.extend_from_slice(CHANNELS_5GHZ);
        }
        plan
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("invalid {} value {:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

fn positive_or(name: &str, default: f64) -> f64 {
    let value = parse_var(name, default);
    if value > 0.0 && value.is_finite() {
        value
    } else {
        log::warn!("non-positive {} value, using default", name);
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_env();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_interval, Duration::from_secs(10));
        assert_eq!(config.channel_hop_interval, Duration::from_millis(500));
    }

    #[test]
    fn plan_covers_2_4ghz_by_default() {
        let config = Config::from_env();
        let plan = config.channel_plan();
        assert!(plan.starts_with(CHANNELS_2_4GHZ));
        if !config.enable_5ghz {
            assert_eq!(plan.len(), CHANNELS_2_4GHZ.len());
        }
    }

    #[test]
    fn plan_includes_5ghz_when_enabled() {
        let config = Config {
            enable_5ghz: true,
            ..Config::from_env()
        };
        let plan = config.channel_plan();
        assert!(plan.contains(&36));
        assert!(plan.contains(&165));
        assert_eq!(plan.len(), CHANNELS_2_4GHZ.len() + CHANNELS_5GHZ.len());
    }

    #[test]
    fn parse_var_falls_back_on_garbage() {
        std::env::set_var("AIRCENSUS_TEST_PARSE", "not-a-number");
        let value: usize = parse_var("AIRCENSUS_TEST_PARSE", 7);
        assert_eq!(value, 7);
        std::env::remove_var("AIRCENSUS_TEST_PARSE");
    }
}
