//! The located domain controller.

use std::fmt;
use std::net::IpAddr;

use netlogon::DsFlags;
use uuid::Uuid;

/// The `DOMAIN_CONTROLLER_INFO` structure
/// (<https://learn.microsoft.com/en-us/windows/win32/api/dsgetdc/ns-dsgetdc-domain_controller_infow>).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainControllerInfo {
    /// DNS or NetBIOS name of the selected DC, per the request's return
    /// flags.
    pub domain_controller_name: String,
    pub domain_controller_address: Option<IpAddr>,
    pub domain_guid: Uuid,
    pub domain_name: Option<String>,
    pub dns_forest_name: String,
    /// The DC's reported DS flags plus the synthesized result bits.
    pub flags: DsFlags,
    pub dc_site_name: String,
    pub client_site_name: Option<String>,
}

impl fmt::Display for DomainControllerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DomainControllerInfo[domainControllerName: {}",
            self.domain_controller_name
        )?;
        if let Some(addr) = &self.domain_controller_address {
            write!(f, ", domainControllerAddress: {addr}")?;
        }
        write!(f, ", domainGuid: {}", self.domain_guid)?;
        if let Some(name) = &self.domain_name {
            write!(f, ", domainName: {name}")?;
        }
        write!(f, ", dnsForestName: {}", self.dns_forest_name)?;
        write!(f, ", flags: {}", self.flags)?;
        write!(f, ", dcSiteName: {}", self.dc_site_name)?;
        if let Some(site) = &self.client_site_name {
            write!(f, ", clientSiteName: {site}")?;
        }
        write!(f, "]")
    }
}
