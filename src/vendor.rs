/// Vendor resolution: OUI to manufacturer name.
///
/// Resolution order is compiled-in table, then LRU cache, then the HTTP
/// lookup service. Only the publisher's flusher calls this — lookups
/// carry a network timeout and must stay off the capture path.
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;

use crate::error::SensorError;
use crate::oui;
use crate::station;

/// Bounded cache of HTTP lookup results, keyed by OUI.
pub const CACHE_CAPACITY: usize = 1024;

/// Per-request timeout for the lookup service.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// A vendor lookup service queried by full MAC address.
pub trait VendorApi: Send + Sync {
    /// `Ok` carries the vendor name, with `"Unknown"` for prefixes the
    /// registry has never seen. `Err` means the service could not
    /// answer; the caller leaves the vendor unset so a later lookup may
    /// succeed.
    fn query(&self, mac: &str) -> Result<String, SensorError>;
}

/// macvendors-style REST lookup: `GET {base}/{mac}` returns the vendor
/// as plain text, 404 for unregistered prefixes.
pub struct HttpVendorApi {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpVendorApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(LOOKUP_TIMEOUT).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl VendorApi for HttpVendorApi {
    fn query(&self, mac: &str) -> Result<String, SensorError> {
        let url = format!("{}/{}", self.base_url, mac);
        match self.agent.get(&url).call() {
            Ok(response) => response
                .into_string()
                .map(|body| body.trim().to_string())
                .map_err(|err| SensorError::Lookup(err.to_string())),
            Err(ureq::Error::Status(404, _)) => Ok("Unknown".to_string()),
            Err(err) => Err(SensorError::Lookup(err.to_string())),
        }
    }
}

pub struct VendorResolver {
    cache: Mutex<LruCache<[u8; 3], String>>,
    api: Option<Box<dyn VendorApi>>,
}

impl VendorResolver {
    pub fn new(api: Option<Box<dyn VendorApi>>) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap();
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            api,
        }
    }

    /// Resolve the vendor for a MAC. `None` means the lookup failed and
    /// may be retried later; failures are never cached.
    pub fn resolve(&self, mac: &[u8; 6]) -> Option<String> {
        let oui = station::oui(mac);
        if let Some(vendor) = oui::lookup(&oui) {
            return Some(vendor.to_string());
        }

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(vendor) = cache.get(&oui) {
                return Some(vendor.clone());
            }
        }

        let api = self.api.as_ref()?;
        match api.query(&station::canonical_mac(mac)) {
            Ok(vendor) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(oui, vendor.clone());
                }
                Some(vendor)
            }
            Err(err) => {
                log::debug!("vendor lookup failed for {}: {}", station::canonical_mac(mac), err);
                None
            }
        }
    }
}
