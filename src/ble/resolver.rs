//! Service catalog and characteristic resolution.
//!
//! The serial endpoint is located by short-identifier substring match: a
//! legacy 16-bit identifier such as `ffe0` is embedded inside the 128-bit
//! UUID string (`0000ffe0-0000-1000-8000-00805f9b34fb`), so exact UUID
//! comparison would require knowing the vendor's base UUID up front.

use btleplug::api::Service;
use tracing::debug;

use crate::error::{Error, Result};

/// The services and characteristics exposed by a connected peripheral.
///
/// Populated once, after full service/characteristic discovery completes;
/// read-only for the lifetime of the connection.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<CatalogService>,
}

/// One service entry in the catalog.
#[derive(Debug, Clone)]
pub struct CatalogService {
    /// UUID string of the service, lowercase hyphenated form.
    pub uuid: String,
    /// UUID strings of the service's characteristics.
    pub characteristics: Vec<String>,
}

/// The resolved serial endpoint within a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// UUID string of the matched service.
    pub service_uuid: String,
    /// UUID string of the matched characteristic.
    pub characteristic_uuid: String,
}

impl ServiceCatalog {
    /// Build a catalog from discovered btleplug services.
    pub fn from_services<'a>(services: impl IntoIterator<Item = &'a Service>) -> Self {
        let services = services
            .into_iter()
            .map(|service| CatalogService {
                uuid: service.uuid.to_string().to_lowercase(),
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| c.uuid.to_string().to_lowercase())
                    .collect(),
            })
            .collect();
        Self { services }
    }

    /// Build a catalog directly from UUID strings. Used by tests and by
    /// callers that already hold a discovered service graph.
    pub fn from_entries(entries: Vec<CatalogService>) -> Self {
        Self { services: entries }
    }

    /// Whether the peripheral advertised no services at all.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The catalog entries.
    pub fn services(&self) -> &[CatalogService] {
        &self.services
    }
}

/// Locate the serial endpoint in a catalog by short-identifier match.
///
/// A service matches when its UUID string contains `service_short_id` as a
/// substring; the characteristic is matched the same way within the matched
/// service only.
///
/// # Errors
///
/// [`Error::NoServices`] when the catalog is empty, [`Error::ServiceNotFound`]
/// when no service UUID contains the short identifier, and
/// [`Error::CharacteristicNotFound`] when the matched service has no
/// characteristic containing the characteristic short identifier. All three
/// are terminal for the session: the peripheral is assumed structurally
/// incompatible and is never retried.
pub fn resolve(
    catalog: &ServiceCatalog,
    service_short_id: &str,
    characteristic_short_id: &str,
) -> Result<ResolvedEndpoint> {
    if catalog.is_empty() {
        return Err(Error::NoServices);
    }

    let service_short_id = service_short_id.to_lowercase();
    let characteristic_short_id = characteristic_short_id.to_lowercase();

    let service = catalog
        .services
        .iter()
        .find(|service| service.uuid.contains(&service_short_id))
        .ok_or_else(|| Error::ServiceNotFound {
            short_id: service_short_id.clone(),
        })?;

    let characteristic = service
        .characteristics
        .iter()
        .find(|uuid| uuid.contains(&characteristic_short_id))
        .ok_or_else(|| Error::CharacteristicNotFound {
            short_id: characteristic_short_id.clone(),
        })?;

    debug!(
        "Resolved characteristic {} in service {}",
        characteristic, service.uuid
    );

    Ok(ResolvedEndpoint {
        service_uuid: service.uuid.clone(),
        characteristic_uuid: characteristic.clone(),
    })
}
