//! Geolocation module for locating proxy hosts using MMDB

use crate::error::PipelineError;
use crate::Result;
use maxminddb::{geoip2, Reader};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Geographic location information for an IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    pub country_code: Option<String>,
    /// Country name in English
    pub country_name: Option<String>,
    /// City name in English
    pub city_name: Option<String>,
}

impl GeoLocation {
    /// Country as reported on results: the ISO code, else the English name
    pub fn country(&self) -> Option<String> {
        self.country_code.clone().or_else(|| self.country_name.clone())
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            PipelineError::GeoLookupUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up a candidate host. DNS names are not resolved.
    pub fn lookup(&self, host: &str) -> Result<GeoLocation> {
        let ip: IpAddr = host.parse().map_err(|_| {
            PipelineError::GeoLookupUnavailable(format!("{} is not an IP address", host))
        })?;
        self.lookup_ip(ip)
    }

    /// Look up the geolocation for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoLocation> {
        let lookup_result = self.reader.lookup(ip).map_err(|e| unavailable(ip, e))?;
        let city: Option<geoip2::City> = lookup_result.decode().map_err(|e| unavailable(ip, e))?;

        let Some(city) = city else {
            return Ok(GeoLocation::default());
        };

        Ok(GeoLocation {
            country_code: city.country.iso_code.map(String::from),
            country_name: city.country.names.english.map(String::from),
            city_name: city.city.names.english.map(String::from),
        })
    }
}

fn unavailable<E: std::fmt::Display>(ip: IpAddr, err: E) -> PipelineError {
    PipelineError::GeoLookupUnavailable(format!("{}: {}", ip, err))
}

impl std::fmt::Debug for GeoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoLocator").finish_non_exhaustive()
    }
}
