//! DC locator request parameters.

use std::time::Duration;

use crate::flags::DcFlags;

/// Parameters for [`crate::DcLocator::locate`], mirroring the arguments of
/// the `DsGetDcName()` function.
#[derive(Debug, Clone, Default)]
pub struct DcLocatorRequest {
    /// Remote computer to run the location on. RPC is not supported, a
    /// non-empty value is rejected.
    pub computer_name: Option<String>,
    /// Fully-qualified DNS name of the domain to locate in. Defaults to the
    /// local host's domain (or, for GC lookups, its forest).
    pub domain_name: Option<String>,
    /// Site to restrict the discovery to.
    pub site_name: Option<String>,
    pub flags: DcFlags,
    /// Read timeout applied to DNS lookups and LDAP pings.
    pub read_timeout: Option<Duration>,
}

impl DcLocatorRequest {
    pub fn new() -> Self {
        Self::default()
    }
}
