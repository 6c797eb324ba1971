//! DC locator orchestration.
//!
//! Mimics the `DsGetDcName()` function
//! (<https://learn.microsoft.com/en-us/windows/win32/api/dsgetdc/nf-dsgetdc-dsgetdcnamew>):
//! DNS-based discovery followed by LDAP pings, with site-aware fallback.
//! Remote RPC location, location by GUID and flat-name lookups are not
//! supported; see [`crate::DcFlags`] for the flags that are silently
//! ignored.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use netlogon::{
    DsFlags, LdapPingRequest, LdapPinger, NetlogonNtVersion, SamLogonExResponse, SamLogonResponse,
};
use tracing::debug;

use crate::dns::{DcType, DnsLocator, DnsLocatorRequest, HostPort, SrvResolver, SrvService};
use crate::error::{LocatorError, Result};
use crate::flags::DcFlags;
use crate::info::DomainControllerInfo;
use crate::request::DcLocatorRequest;

/// Probe seam over [`LdapPinger`], so discovery strategies can be exercised
/// without live domain controllers.
pub trait Pinger: Send + Sync {
    fn ping(&self, request: &LdapPingRequest) -> netlogon::Result<SamLogonResponse>;
}

impl Pinger for LdapPinger {
    fn ping(&self, request: &LdapPingRequest) -> netlogon::Result<SamLogonResponse> {
        LdapPinger::ping(self, request)
    }
}

/// Accepted but without any effect on the location process.
const IGNORED_FLAGS: DcFlags = DcFlags::DS_FORCE_REDISCOVERY
    .union(DcFlags::DS_BACKGROUND_ONLY)
    .union(DcFlags::DS_AVOID_SELF)
    .union(DcFlags::DS_DIRECTORY_SERVICE_PREFERRED)
    .union(DcFlags::DS_GOOD_TIMESERV_PREFERRED);

/// Dropped when `DS_ONLY_LDAP_NEEDED` is present.
const ONLY_LDAP_NEEDED_IGNORED_FLAGS: DcFlags = DcFlags::DS_DIRECTORY_SERVICE_REQUIRED
    .union(DcFlags::DS_DIRECTORY_SERVICE_PREFERRED)
    .union(DcFlags::DS_PDC_REQUIRED)
    .union(DcFlags::DS_KDC_REQUIRED)
    .union(DcFlags::DS_TIMESERV_REQUIRED)
    .union(DcFlags::DS_GOOD_TIMESERV_PREFERRED)
    .union(DcFlags::DS_DIRECTORY_SERVICE_6_REQUIRED)
    .union(DcFlags::DS_WEB_SERVICE_REQUIRED)
    .union(DcFlags::DS_DIRECTORY_SERVICE_8_REQUIRED)
    .union(DcFlags::DS_DIRECTORY_SERVICE_9_REQUIRED)
    .union(DcFlags::DS_DIRECTORY_SERVICE_10_REQUIRED)
    .union(DcFlags::DS_KEY_LIST_SUPPORT_REQUIRED);

const MUTUALLY_EXCLUSIVE_FLAG_SETS: [DcFlags; 4] = [
    DcFlags::DS_GC_SERVER_REQUIRED
        .union(DcFlags::DS_PDC_REQUIRED)
        .union(DcFlags::DS_KDC_REQUIRED),
    DcFlags::DS_IS_DNS_NAME.union(DcFlags::DS_IS_FLAT_NAME),
    DcFlags::DS_RETURN_DNS_NAME.union(DcFlags::DS_RETURN_FLAT_NAME),
    DcFlags::DS_DIRECTORY_SERVICE_REQUIRED
        .union(DcFlags::DS_DIRECTORY_SERVICE_6_REQUIRED)
        .union(DcFlags::DS_DIRECTORY_SERVICE_8_REQUIRED)
        .union(DcFlags::DS_DIRECTORY_SERVICE_9_REQUIRED)
        .union(DcFlags::DS_DIRECTORY_SERVICE_10_REQUIRED),
];

const GOOD_TIMESERV_EXCLUSIVE_FLAGS: DcFlags = DcFlags::DS_GC_SERVER_REQUIRED
    .union(DcFlags::DS_PDC_REQUIRED)
    .union(DcFlags::DS_KDC_REQUIRED)
    .union(DcFlags::DS_DIRECTORY_SERVICE_REQUIRED);

/// Request flag to DS capability flag a candidate must report.
const SERVER_SELECTION_FLAGS: [(DcFlags, DsFlags); 13] = [
    (DcFlags::DS_DIRECTORY_SERVICE_REQUIRED, DsFlags::FD),
    (DcFlags::DS_GC_SERVER_REQUIRED, DsFlags::FG),
    (DcFlags::DS_PDC_REQUIRED, DsFlags::FP),
    (DcFlags::DS_KDC_REQUIRED, DsFlags::FK),
    (DcFlags::DS_TIMESERV_REQUIRED, DsFlags::FT),
    (DcFlags::DS_WRITABLE_REQUIRED, DsFlags::FW),
    (DcFlags::DS_ONLY_LDAP_NEEDED, DsFlags::FL),
    (DcFlags::DS_DIRECTORY_SERVICE_6_REQUIRED, DsFlags::FFS),
    (DcFlags::DS_WEB_SERVICE_REQUIRED, DsFlags::FWS),
    (DcFlags::DS_DIRECTORY_SERVICE_8_REQUIRED, DsFlags::FW8),
    (DcFlags::DS_DIRECTORY_SERVICE_9_REQUIRED, DsFlags::FW9),
    (DcFlags::DS_DIRECTORY_SERVICE_10_REQUIRED, DsFlags::FW10),
    (DcFlags::DS_KEY_LIST_SUPPORT_REQUIRED, DsFlags::FKL),
];

/// Locates a suitable domain controller for a domain or forest.
///
/// A locator holds no state between [`DcLocator::locate`] calls except its
/// immutable configuration; every call owns its own sockets and DNS context.
pub struct DcLocator {
    pinger: Box<dyn Pinger>,
    resolver: Option<Arc<dyn SrvResolver>>,
    local_host_name: Option<String>,
}

impl Default for DcLocator {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builds a [`DcLocator`]; consumed by `build()`.
#[derive(Default)]
pub struct DcLocatorBuilder {
    pinger: Option<Box<dyn Pinger>>,
    resolver: Option<Arc<dyn SrvResolver>>,
    local_host_name: Option<String>,
}

impl DcLocatorBuilder {
    /// Replaces the LDAP pinger.
    pub fn pinger(mut self, pinger: Box<dyn Pinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }

    /// Replaces the system SRV resolver.
    pub fn resolver(mut self, resolver: Arc<dyn SrvResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the fully-qualified local host name used for the default
    /// domain and the `DnsHostName` filter.
    pub fn local_host_name(mut self, local_host_name: impl Into<String>) -> Self {
        self.local_host_name = Some(local_host_name.into());
        self
    }

    pub fn build(self) -> DcLocator {
        DcLocator {
            pinger: self.pinger.unwrap_or_else(|| Box::new(LdapPinger::new())),
            resolver: self.resolver,
            local_host_name: self.local_host_name,
        }
    }
}

impl DcLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> DcLocatorBuilder {
        DcLocatorBuilder::default()
    }

    /// Locates a suitable domain controller.
    ///
    /// Validation failures abort before any I/O. During probing, failures
    /// against individual candidates are logged and skipped; once a
    /// candidate list is exhausted an [`LocatorError::Unreachable`] is
    /// raised.
    pub fn locate(&self, request: &DcLocatorRequest) -> Result<DomainControllerInfo> {
        if let Some(computer_name) = request.computer_name.as_deref().filter(|s| !s.is_empty()) {
            return Err(LocatorError::UnsupportedComputerName(
                computer_name.to_owned(),
            ));
        }

        let domain_name = request.domain_name.as_deref().filter(|s| !s.is_empty());
        if let Some(domain_name) = domain_name {
            let stem = domain_name.strip_suffix('.').unwrap_or(domain_name);
            if !stem.contains('.') {
                return Err(LocatorError::NotFullyQualified {
                    name: "domainName",
                    value: domain_name.to_owned(),
                });
            }
        }

        let site_name = request.site_name.as_deref().filter(|s| !s.is_empty());
        let flags = validate_flags(request.flags, site_name)?;

        let computer_name = self.fully_qualified_local_host_name()?;
        let read_timeout = request.read_timeout;

        let mut dns_builder = DnsLocator::builder();
        if let Some(timeout) = read_timeout {
            dns_builder = dns_builder.read_timeout(timeout);
        }
        if let Some(resolver) = &self.resolver {
            dns_builder = dns_builder.resolver(resolver.clone());
        }
        let dns_locator = dns_builder.build();

        if flags.contains(DcFlags::DS_ONLY_LDAP_NEEDED) {
            let (service, label) = if flags.contains(DcFlags::DS_GC_SERVER_REQUIRED) {
                (SrvService::Gc, "GC-only")
            } else {
                (SrvService::Ldap, "LDAP-only")
            };
            self.locate_server(
                service,
                None,
                label,
                &dns_locator,
                flags,
                &computer_name,
                domain_name,
                site_name,
                read_timeout,
            )
        } else if flags.contains(DcFlags::DS_PDC_REQUIRED) {
            self.locate_pdc_server(
                &dns_locator,
                flags,
                &computer_name,
                domain_name,
                site_name,
                read_timeout,
            )
        } else if flags.contains(DcFlags::DS_GC_SERVER_REQUIRED) {
            self.locate_server(
                SrvService::Ldap,
                Some(DcType::Gc),
                "GC",
                &dns_locator,
                flags,
                &computer_name,
                domain_name,
                site_name,
                read_timeout,
            )
        } else if flags.contains(DcFlags::DS_KDC_REQUIRED) {
            self.locate_server(
                SrvService::Kerberos,
                Some(DcType::Dc),
                "KDC",
                &dns_locator,
                flags,
                &computer_name,
                domain_name,
                site_name,
                read_timeout,
            )
        } else {
            self.locate_server(
                SrvService::Ldap,
                Some(DcType::Dc),
                "DS",
                &dns_locator,
                flags,
                &computer_name,
                domain_name,
                site_name,
                read_timeout,
            )
        }
    }

    fn fully_qualified_local_host_name(&self) -> Result<String> {
        let host_name = match &self.local_host_name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map_err(LocatorError::LocalHostName)?
                .to_string_lossy()
                .into_owned(),
        };
        if !host_name.contains('.') {
            return Err(LocatorError::NotFullyQualified {
                name: "computerName",
                value: host_name,
            });
        }
        Ok(host_name)
    }

    #[allow(clippy::too_many_arguments)]
    fn locate_server(
        &self,
        service: SrvService,
        dc_type: Option<DcType>,
        label: &str,
        dns_locator: &DnsLocator,
        flags: DcFlags,
        computer_name: &str,
        domain_name: Option<&str>,
        site_name: Option<&str>,
        read_timeout: Option<Duration>,
    ) -> Result<DomainControllerInfo> {
        debug!(
            label,
            domain = domain_name.unwrap_or("<default>"),
            site = site_name.unwrap_or("<default>"),
            "locating server"
        );

        // default the domain; a GC lives in the forest, so the local domain
        // is replaced by the forest name learned from a preliminary probe
        let domain_name = match domain_name {
            Some(name) => name.to_owned(),
            None => {
                let local_domain = domain_after_first_dot(computer_name).to_owned();
                if flags.contains(DcFlags::DS_GC_SERVER_REQUIRED) {
                    self.determine_forest_name(
                        dns_locator,
                        flags,
                        computer_name,
                        &local_domain,
                        site_name,
                        read_timeout,
                    )?
                } else {
                    local_domain
                }
            }
        };

        if let Some(site) = site_name {
            let mut dns_request = DnsLocatorRequest::new(service, &domain_name);
            dns_request.site_name = Some(site.to_owned());
            dns_request.dc_type = dc_type;
            let hosts = dns_locator
                .locate(&dns_request)
                .map_err(|e| LocatorError::unreachable(&domain_name, Some(site), e))?;

            let response = self
                .select_server(&hosts, flags, computer_name, &domain_name, None, read_timeout)
                .ok_or_else(|| {
                    LocatorError::unreachable(
                        &domain_name,
                        Some(site),
                        LocatorError::ServiceUnavailable { count: hosts.len() },
                    )
                })?;

            let dc_info = to_domain_controller_info(&response, flags, Some(site))?;
            debug!(label, server = %dc_info.domain_controller_name, "located server");
            Ok(dc_info)
        } else {
            debug!(domain = %domain_name, "locating site name");
            let mut dns_request = DnsLocatorRequest::new(service, &domain_name);
            dns_request.dc_type = dc_type;
            let broad_hosts = dns_locator
                .locate(&dns_request)
                .map_err(|e| LocatorError::unreachable(&domain_name, None, e))?;

            // Any reachable DC may define the client site, hence the empty
            // requirement set for the discovery probe.
            let discovery = self
                .select_server(
                    &broad_hosts,
                    DcFlags::empty(),
                    computer_name,
                    &domain_name,
                    None,
                    read_timeout,
                )
                .ok_or_else(|| {
                    LocatorError::unreachable(
                        &domain_name,
                        None,
                        LocatorError::ServiceUnavailable {
                            count: broad_hosts.len(),
                        },
                    )
                })?;

            let client_site = discovery.client_site_name.clone().filter(|s| !s.is_empty());
            let next_closest_site = discovery
                .next_closest_site_name
                .clone()
                .filter(|s| !s.is_empty());
            match &client_site {
                Some(site) => debug!(
                    site = %site,
                    next_closest_site = next_closest_site.as_deref().unwrap_or(""),
                    "client site discovered"
                ),
                None => debug!("client has no default site"),
            }

            let mut located_servers_count = 0usize;
            let mut selected: Option<(SamLogonExResponse, Option<String>)> = None;

            if let Some(site) = &client_site {
                let mut dns_request = DnsLocatorRequest::new(service, &domain_name);
                dns_request.site_name = Some(site.clone());
                dns_request.dc_type = dc_type;
                match dns_locator.locate(&dns_request) {
                    Ok(hosts) => {
                        located_servers_count += hosts.len();
                        if let Some(response) = self.select_server(
                            &hosts,
                            flags,
                            computer_name,
                            &domain_name,
                            None,
                            read_timeout,
                        ) {
                            selected = Some((response, Some(site.clone())));
                        }
                    }
                    Err(error) => debug!(%error, "failed to locate servers, trying fallback"),
                }

                if selected.is_none() {
                    debug!(label, "no server located in client site, trying fallback");
                    if flags.contains(DcFlags::DS_TRY_NEXTCLOSEST_SITE) {
                        if let Some(next_site) = &next_closest_site {
                            let mut dns_request = DnsLocatorRequest::new(service, &domain_name);
                            dns_request.site_name = Some(next_site.clone());
                            dns_request.dc_type = dc_type;
                            match dns_locator.locate(&dns_request) {
                                Ok(hosts) => {
                                    located_servers_count += hosts.len();
                                    if let Some(response) = self.select_server(
                                        &hosts,
                                        flags,
                                        computer_name,
                                        &domain_name,
                                        None,
                                        read_timeout,
                                    ) {
                                        selected = Some((response, Some(next_site.clone())));
                                    }
                                }
                                Err(error) => {
                                    debug!(%error, "failed to locate servers, trying fallback")
                                }
                            }
                            if selected.is_none() {
                                debug!(
                                    label,
                                    "no server located in next closest site, trying fallback"
                                );
                            }
                        }
                    }
                }
            }

            if selected.is_none() {
                let mut dns_request = DnsLocatorRequest::new(service, &domain_name);
                dns_request.dc_type = dc_type;
                let hosts = dns_locator
                    .locate(&dns_request)
                    .map_err(|e| LocatorError::unreachable(&domain_name, None, e))?;
                located_servers_count += hosts.len();
                if let Some(response) = self.select_server(
                    &hosts,
                    flags,
                    computer_name,
                    &domain_name,
                    None,
                    read_timeout,
                ) {
                    selected = Some((response, None));
                }
            }

            let (response, selected_site) = selected.ok_or_else(|| {
                LocatorError::unreachable(
                    &domain_name,
                    None,
                    LocatorError::ServiceUnavailable {
                        count: located_servers_count,
                    },
                )
            })?;

            let dc_info = to_domain_controller_info(&response, flags, selected_site.as_deref())?;
            debug!(label, server = %dc_info.domain_controller_name, "located server");
            Ok(dc_info)
        }
    }

    /// Finds the DNS forest name for a domain through an LDAP ping against
    /// any reachable DC of that domain.
    fn determine_forest_name(
        &self,
        dns_locator: &DnsLocator,
        flags: DcFlags,
        computer_name: &str,
        domain_name: &str,
        site_name: Option<&str>,
        read_timeout: Option<Duration>,
    ) -> Result<String> {
        debug!(
            domain = %domain_name,
            site = site_name.unwrap_or("<default>"),
            "locating forest name"
        );
        let mut dns_request = DnsLocatorRequest::new(SrvService::Ldap, domain_name);
        dns_request.site_name = site_name.map(str::to_owned);
        dns_request.dc_type =
            (!flags.contains(DcFlags::DS_ONLY_LDAP_NEEDED)).then_some(DcType::Dc);
        let hosts = dns_locator
            .locate(&dns_request)
            .map_err(|e| LocatorError::unreachable(domain_name, site_name, e))?;

        let response = self
            .select_server(
                &hosts,
                DcFlags::empty(),
                computer_name,
                domain_name,
                None,
                read_timeout,
            )
            .ok_or_else(|| {
                LocatorError::unreachable(
                    domain_name,
                    site_name,
                    LocatorError::ServiceUnavailable { count: hosts.len() },
                )
            })?;

        let forest_name = response.dns_forest_name;
        debug!(domain = %domain_name, forest = %forest_name, "forest name located");
        Ok(forest_name)
    }

    fn locate_pdc_server(
        &self,
        dns_locator: &DnsLocator,
        flags: DcFlags,
        computer_name: &str,
        domain_name: Option<&str>,
        site_name: Option<&str>,
        read_timeout: Option<Duration>,
    ) -> Result<DomainControllerInfo> {
        let label = "PDC";
        debug!(
            label,
            domain = domain_name.unwrap_or("<default>"),
            site = site_name.unwrap_or("<default>"),
            "locating server"
        );

        let domain_name = match domain_name {
            Some(name) => name.to_owned(),
            None => domain_after_first_dot(computer_name).to_owned(),
        };

        // There is one PDC per domain and no site-scoped SRV records for
        // it; a requested site constrains the probed DcSiteName instead.
        let mut dns_request = DnsLocatorRequest::new(SrvService::Ldap, &domain_name);
        dns_request.dc_type = Some(DcType::Pdc);
        let hosts = dns_locator
            .locate(&dns_request)
            .map_err(|e| LocatorError::unreachable(&domain_name, site_name, e))?;

        let response = self
            .select_server(
                &hosts,
                flags,
                computer_name,
                &domain_name,
                site_name,
                read_timeout,
            )
            .ok_or_else(|| {
                LocatorError::unreachable(
                    &domain_name,
                    site_name,
                    LocatorError::ServiceUnavailable { count: hosts.len() },
                )
            })?;

        let dc_info = to_domain_controller_info(&response, flags, site_name)?;
        debug!(label, server = %dc_info.domain_controller_name, "located server");
        Ok(dc_info)
    }

    /// Probes the candidates in order and returns the first response that
    /// satisfies all server-selection requirements. Probe failures are
    /// logged and skipped.
    fn select_server(
        &self,
        hosts: &[HostPort],
        flags: DcFlags,
        computer_name: &str,
        domain_name: &str,
        match_site_name: Option<&str>,
        read_timeout: Option<Duration>,
    ) -> Option<SamLogonExResponse> {
        debug!(count = hosts.len(), "selecting from servers");

        for host in hosts {
            let mut nt_version = NetlogonNtVersion::V5EX | NetlogonNtVersion::VCS;
            if flags.contains(DcFlags::DS_IP_REQUIRED) {
                nt_version |= NetlogonNtVersion::V5EP;
            }
            if flags.contains(DcFlags::DS_GC_SERVER_REQUIRED) {
                nt_version |= NetlogonNtVersion::VGC;
            }
            if flags.contains(DcFlags::DS_PDC_REQUIRED) {
                nt_version |= NetlogonNtVersion::VPDC;
            }

            let mut ping_request = LdapPingRequest::new(host.host.clone(), nt_version);
            ping_request.dns_host_name = Some(computer_name.to_owned());
            ping_request.dns_domain = Some(domain_name.to_owned());
            ping_request.read_timeout = read_timeout;

            debug!(server = %host.host, "probing server");
            let response = match self.pinger.ping(&ping_request) {
                Ok(SamLogonResponse::Ex(response)) => response,
                Ok(other) => {
                    debug!(server = %host.host, response = %other, "skipping server, unexpected response variant");
                    continue;
                }
                Err(error) => {
                    debug!(server = %host.host, %error, "failed to probe server");
                    continue;
                }
            };

            let missing = SERVER_SELECTION_FLAGS
                .iter()
                .find(|(dc_flag, ds_flag)| {
                    flags.contains(*dc_flag) && !response.flags.contains(*ds_flag)
                });
            if let Some((_, ds_flag)) = missing {
                debug!(server = %host.host, flag = %ds_flag, "skipping server, it does not have required flag");
                continue;
            }

            if let Some(site) = match_site_name {
                if !response.dc_site_name.eq_ignore_ascii_case(site) {
                    debug!(server = %host.host, site, "skipping server, it is not in the requested site");
                    continue;
                }
            }

            debug!(server = %response.dns_host_name, "selected server");
            return Some(response);
        }

        debug!("no server selected");
        None
    }
}

fn domain_after_first_dot(computer_name: &str) -> &str {
    match computer_name.split_once('.') {
        Some((_, domain)) => domain,
        None => computer_name,
    }
}

fn validate_flags(flags: DcFlags, site_name: Option<&str>) -> Result<DcFlags> {
    if flags.is_empty() {
        return Ok(flags);
    }

    match site_name {
        Some(site) => debug!(flags = %flags, site, "validating flags"),
        None => debug!(flags = %flags, "validating flags"),
    }

    let mut validated = flags;

    for flag in (validated & IGNORED_FLAGS).iter() {
        debug!(flag = %flag, "flag is ignored");
    }

    let conditional_ignores = [
        (DcFlags::DS_ONLY_LDAP_NEEDED, ONLY_LDAP_NEEDED_IGNORED_FLAGS),
        (DcFlags::DS_PDC_REQUIRED, DcFlags::DS_TRY_NEXTCLOSEST_SITE),
        (
            DcFlags::DS_RETURN_FLAT_NAME,
            DcFlags::DS_TRY_NEXTCLOSEST_SITE,
        ),
    ];
    for (condition, ignored) in conditional_ignores {
        if validated.contains(condition) {
            let dropped = validated & ignored;
            for flag in dropped.iter() {
                debug!(provided = %condition, ignored = %flag, "flag is provided, explicitly ignoring flag");
            }
            validated.remove(dropped);
        }
    }

    for exclusive in MUTUALLY_EXCLUSIVE_FLAG_SETS {
        let present = validated & exclusive;
        if present.iter().count() >= 2 {
            return Err(LocatorError::IncompatibleFlags(present));
        }
    }

    if validated.contains(DcFlags::DS_GOOD_TIMESERV_PREFERRED) {
        if let Some(conflicting) = (validated & GOOD_TIMESERV_EXCLUSIVE_FLAGS).iter().next() {
            return Err(LocatorError::IncompatibleFlags(
                conflicting | DcFlags::DS_GOOD_TIMESERV_PREFERRED,
            ));
        }
    }

    if validated.contains(DcFlags::DS_KEY_LIST_SUPPORT_REQUIRED)
        && !validated.contains(DcFlags::DS_KDC_REQUIRED)
    {
        return Err(LocatorError::MissingRequiredFlag {
            flag: DcFlags::DS_KEY_LIST_SUPPORT_REQUIRED,
            required: DcFlags::DS_KDC_REQUIRED,
        });
    }

    if validated.contains(DcFlags::DS_RETURN_DNS_NAME)
        && !validated.contains(DcFlags::DS_IP_REQUIRED)
    {
        debug!("DS_RETURN_DNS_NAME is provided, implicitly setting DS_IP_REQUIRED");
        validated.insert(DcFlags::DS_IP_REQUIRED);
    }

    if validated.contains(DcFlags::DS_IS_FLAT_NAME) {
        return Err(LocatorError::UnsupportedFlag(DcFlags::DS_IS_FLAT_NAME));
    }

    if site_name.is_some() && validated.contains(DcFlags::DS_TRY_NEXTCLOSEST_SITE) {
        return Err(LocatorError::SiteSpecificConflict(
            DcFlags::DS_TRY_NEXTCLOSEST_SITE,
        ));
    }

    validated.remove(IGNORED_FLAGS);
    Ok(validated)
}

fn to_domain_controller_info(
    response: &SamLogonExResponse,
    flags: DcFlags,
    site_name: Option<&str>,
) -> Result<DomainControllerInfo> {
    let mut ds_flags = response.flags | DsFlags::FF;

    let (domain_controller_name, domain_name) = if flags.contains(DcFlags::DS_RETURN_FLAT_NAME) {
        let name = response.netbios_computer_name.clone().ok_or(
            LocatorError::UnusableResponse("ping response carries no NetBIOS computer name"),
        )?;
        (name, response.netbios_domain_name.clone())
    } else {
        ds_flags |= DsFlags::FDNS | DsFlags::FDM;
        (
            response.dns_host_name.clone(),
            Some(response.dns_domain_name.clone()),
        )
    };

    if site_name.is_some_and(|site| response.dc_site_name.eq_ignore_ascii_case(site)) {
        ds_flags |= DsFlags::FC;
    }

    Ok(DomainControllerInfo {
        domain_controller_name,
        domain_controller_address: response.dc_sock_addr.map(IpAddr::V4),
        domain_guid: response.domain_guid,
        domain_name,
        dns_forest_name: response.dns_forest_name.clone(),
        flags: ds_flags,
        dc_site_name: response.dc_site_name.clone(),
        client_site_name: response.client_site_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use netlogon::{NetlogonError, Opcode};
    use uuid::Uuid;

    use crate::dns::SrvRecord;

    use super::*;

    fn locator() -> DcLocator {
        DcLocator::builder().build()
    }

    fn request_with_flags(flags: DcFlags) -> DcLocatorRequest {
        let mut request = DcLocatorRequest::new();
        request.flags = flags;
        request
    }

    #[test]
    fn test_remote_computer_name_rejected() {
        let mut request = DcLocatorRequest::new();
        request.computer_name = Some("foo".to_owned());
        let error = locator().locate(&request).unwrap_err();
        assert_eq!(
            error.to_string(),
            "RPC communication to 'foo' is not supported"
        );
    }

    #[test]
    fn test_unqualified_domain_name_rejected() {
        for domain in ["foo", "foo."] {
            let mut request = DcLocatorRequest::new();
            request.domain_name = Some(domain.to_owned());
            let error = locator().locate(&request).unwrap_err();
            assert_eq!(
                error.to_string(),
                format!("domainName must be fully qualified: {domain}")
            );
        }
    }

    #[test]
    fn test_is_flat_name_rejected() {
        let error = locator()
            .locate(&request_with_flags(DcFlags::DS_IS_FLAT_NAME))
            .unwrap_err();
        assert_eq!(error.to_string(), "Flag 'DS_IS_FLAT_NAME' is not supported");
    }

    #[test]
    fn test_key_list_requires_kdc() {
        let error = locator()
            .locate(&request_with_flags(DcFlags::DS_KEY_LIST_SUPPORT_REQUIRED))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Flag 'DS_KEY_LIST_SUPPORT_REQUIRED' requires flag 'DS_KDC_REQUIRED' to be set"
        );
    }

    #[test]
    fn test_next_closest_site_conflicts_with_site() {
        let mut request = request_with_flags(DcFlags::DS_TRY_NEXTCLOSEST_SITE);
        request.site_name = Some("X".to_owned());
        let error = locator().locate(&request).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Flag 'DS_TRY_NEXTCLOSEST_SITE' cannot be combined with site-specific discovery"
        );
    }

    #[test]
    fn test_mutually_exclusive_flags() {
        let cases = [
            (
                DcFlags::DS_GC_SERVER_REQUIRED | DcFlags::DS_PDC_REQUIRED,
                "Flags [DS_GC_SERVER_REQUIRED|DS_PDC_REQUIRED] cannot be combined",
            ),
            (
                DcFlags::DS_KDC_REQUIRED | DcFlags::DS_PDC_REQUIRED | DcFlags::DS_GC_SERVER_REQUIRED,
                "Flags [DS_GC_SERVER_REQUIRED|DS_PDC_REQUIRED|DS_KDC_REQUIRED] cannot be combined",
            ),
            (
                DcFlags::DS_RETURN_DNS_NAME | DcFlags::DS_RETURN_FLAT_NAME,
                "Flags [DS_RETURN_DNS_NAME|DS_RETURN_FLAT_NAME] cannot be combined",
            ),
            (
                DcFlags::DS_IS_DNS_NAME | DcFlags::DS_IS_FLAT_NAME,
                "Flags [DS_IS_FLAT_NAME|DS_IS_DNS_NAME] cannot be combined",
            ),
            (
                DcFlags::DS_DIRECTORY_SERVICE_REQUIRED | DcFlags::DS_DIRECTORY_SERVICE_8_REQUIRED,
                "Flags [DS_DIRECTORY_SERVICE_REQUIRED|DS_DIRECTORY_SERVICE_8_REQUIRED] cannot be combined",
            ),
        ];
        for (flags, message) in cases {
            let error = locator().locate(&request_with_flags(flags)).unwrap_err();
            assert_eq!(error.to_string(), message);
        }
    }

    #[test]
    fn test_good_timeserv_preferred_conflicts() {
        let error = locator()
            .locate(&request_with_flags(
                DcFlags::DS_GOOD_TIMESERV_PREFERRED | DcFlags::DS_GC_SERVER_REQUIRED,
            ))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "Flags [DS_GC_SERVER_REQUIRED|DS_GOOD_TIMESERV_PREFERRED] cannot be combined"
        );
    }

    #[test]
    fn test_flag_normalization() {
        // DS_ONLY_LDAP_NEEDED drops the server-kind requirements, which also
        // defuses the KDC prerequisite of DS_KEY_LIST_SUPPORT_REQUIRED.
        let validated = validate_flags(
            DcFlags::DS_ONLY_LDAP_NEEDED
                | DcFlags::DS_PDC_REQUIRED
                | DcFlags::DS_KEY_LIST_SUPPORT_REQUIRED,
            None,
        )
        .unwrap();
        assert_eq!(validated, DcFlags::DS_ONLY_LDAP_NEEDED);

        // DS_PDC_REQUIRED silently drops DS_TRY_NEXTCLOSEST_SITE.
        let validated = validate_flags(
            DcFlags::DS_PDC_REQUIRED | DcFlags::DS_TRY_NEXTCLOSEST_SITE,
            None,
        )
        .unwrap();
        assert_eq!(validated, DcFlags::DS_PDC_REQUIRED);

        // DS_RETURN_DNS_NAME implies DS_IP_REQUIRED.
        let validated = validate_flags(DcFlags::DS_RETURN_DNS_NAME, None).unwrap();
        assert_eq!(
            validated,
            DcFlags::DS_RETURN_DNS_NAME | DcFlags::DS_IP_REQUIRED
        );

        // The ignored flags are dropped from the effective set.
        let validated = validate_flags(
            DcFlags::DS_FORCE_REDISCOVERY
                | DcFlags::DS_AVOID_SELF
                | DcFlags::DS_WRITABLE_REQUIRED,
            None,
        )
        .unwrap();
        assert_eq!(validated, DcFlags::DS_WRITABLE_REQUIRED);
    }

    // --- discovery scenarios over scripted DNS and ping backends ---

    struct ScriptedResolver {
        zones: HashMap<String, Vec<SrvRecord>>,
        lookups: Mutex<Vec<String>>,
    }

    impl ScriptedResolver {
        fn new(zones: &[(&str, &[&str])]) -> Self {
            let zones = zones
                .iter()
                .map(|(name, targets)| {
                    let records = targets
                        .iter()
                        .map(|target| SrvRecord {
                            priority: 0,
                            weight: 0,
                            port: 389,
                            target: format!("{target}."),
                        })
                        .collect();
                    ((*name).to_owned(), records)
                })
                .collect();
            Self {
                zones,
                lookups: Mutex::new(Vec::new()),
            }
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }
    }

    impl SrvResolver for ScriptedResolver {
        fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
            self.lookups.lock().unwrap().push(name.to_owned());
            match self.zones.get(name) {
                Some(records) => Ok(records.clone()),
                None => Err(LocatorError::NameNotFound(name.to_owned())),
            }
        }
    }

    struct ScriptedPinger {
        responses: HashMap<String, SamLogonExResponse>,
        pings: Mutex<Vec<LdapPingRequest>>,
    }

    impl ScriptedPinger {
        fn new(responses: &[(&str, SamLogonExResponse)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(host, response)| ((*host).to_owned(), response.clone()))
                    .collect(),
                pings: Mutex::new(Vec::new()),
            }
        }

        fn pings(&self) -> Vec<LdapPingRequest> {
            self.pings.lock().unwrap().clone()
        }
    }

    impl Pinger for ScriptedPinger {
        fn ping(&self, request: &LdapPingRequest) -> netlogon::Result<SamLogonResponse> {
            self.pings.lock().unwrap().push(request.clone());
            match self.responses.get(&request.host_name) {
                Some(response) => Ok(SamLogonResponse::Ex(response.clone())),
                None => Err(NetlogonError::EmptyResponse(
                    "192.0.2.1:389".parse().unwrap(),
                )),
            }
        }
    }

    fn ex_response(host: &str, flags: DsFlags, dc_site: &str) -> SamLogonExResponse {
        SamLogonExResponse {
            opcode: Opcode::LogonSamLogonResponseEx,
            flags,
            domain_guid: Uuid::parse_str("0f4f3a06-5d92-4f15-b7a7-45c78ec5b104").unwrap(),
            dns_forest_name: "ad.example.com".to_owned(),
            dns_domain_name: "ad.example.com".to_owned(),
            dns_host_name: format!("{host}.ad.example.com"),
            netbios_domain_name: Some("EXAMPLE".to_owned()),
            netbios_computer_name: Some(host.to_ascii_uppercase()),
            user_name: None,
            dc_site_name: dc_site.to_owned(),
            client_site_name: Some("S1".to_owned()),
            dc_sock_addr: Some(Ipv4Addr::new(10, 0, 0, 5)),
            next_closest_site_name: Some("S2".to_owned()),
            nt_version: NetlogonNtVersion::V1
                | NetlogonNtVersion::V5EX
                | NetlogonNtVersion::V5EP
                | NetlogonNtVersion::VCS,
        }
    }

    fn scripted_locator(resolver: Arc<ScriptedResolver>, pinger: ScriptedPinger) -> DcLocator {
        DcLocator::builder()
            .local_host_name("client.ad.example.com")
            .resolver(resolver)
            .pinger(Box::new(pinger))
            .build()
    }

    #[test]
    fn test_plain_location_uses_client_site() {
        let resolver = Arc::new(ScriptedResolver::new(&[
            ("_ldap._tcp.dc._msdcs.ad.example.com", &["dc-a", "dc-b"]),
            ("_ldap._tcp.S1._sites.dc._msdcs.ad.example.com", &["dc-b"]),
        ]));
        let pinger = ScriptedPinger::new(&[
            ("dc-a", ex_response("dc-a", DsFlags::FD | DsFlags::FW, "S3")),
            ("dc-b", ex_response("dc-b", DsFlags::FD | DsFlags::FW, "S1")),
        ]);
        let locator = scripted_locator(resolver.clone(), pinger);

        let info = locator.locate(&DcLocatorRequest::new()).unwrap();
        assert_eq!(info.domain_controller_name, "dc-b.ad.example.com");
        assert_eq!(info.domain_name.as_deref(), Some("ad.example.com"));
        assert_eq!(info.dns_forest_name, "ad.example.com");
        assert_eq!(info.dc_site_name, "S1");
        assert_eq!(info.client_site_name.as_deref(), Some("S1"));
        // reported flags plus the forest, DNS and closest-site bits
        assert_eq!(
            info.flags,
            DsFlags::FD
                | DsFlags::FW
                | DsFlags::FF
                | DsFlags::FDNS
                | DsFlags::FDM
                | DsFlags::FC
        );
        assert_eq!(
            resolver.lookups(),
            vec![
                "_ldap._tcp.dc._msdcs.ad.example.com".to_owned(),
                "_ldap._tcp.S1._sites.dc._msdcs.ad.example.com".to_owned(),
            ]
        );
    }

    #[test]
    fn test_site_fallback_to_next_closest_then_broad() {
        // dc-a answers the discovery probe (client site S1, next closest
        // S2) but lacks the GC bit; S1 has no usable server either, S2 does.
        let resolver = Arc::new(ScriptedResolver::new(&[
            ("_ldap._tcp.gc._msdcs.ad.example.com", &["dc-a", "dc-b"]),
            ("_ldap._tcp.S1._sites.gc._msdcs.ad.example.com", &["dc-a"]),
            ("_ldap._tcp.S2._sites.gc._msdcs.ad.example.com", &["gc-c"]),
        ]));
        let pinger = ScriptedPinger::new(&[
            ("dc-a", ex_response("dc-a", DsFlags::FD, "S1")),
            (
                "gc-c",
                ex_response("gc-c", DsFlags::FD | DsFlags::FG, "S2"),
            ),
        ]);
        let locator = scripted_locator(resolver.clone(), pinger);

        let mut request = DcLocatorRequest::new();
        request.domain_name = Some("ad.example.com".to_owned());
        request.flags = DcFlags::DS_GC_SERVER_REQUIRED | DcFlags::DS_TRY_NEXTCLOSEST_SITE;

        let info = locator.locate(&request).unwrap();
        assert_eq!(info.domain_controller_name, "gc-c.ad.example.com");
        // gc-c is in the site that won the query, so it is the closest
        assert!(info.flags.contains(DsFlags::FC));
        assert_eq!(
            resolver.lookups(),
            vec![
                "_ldap._tcp.gc._msdcs.ad.example.com".to_owned(),
                "_ldap._tcp.S1._sites.gc._msdcs.ad.example.com".to_owned(),
                "_ldap._tcp.S2._sites.gc._msdcs.ad.example.com".to_owned(),
            ]
        );
    }

    #[test]
    fn test_broad_fallback_when_no_site_survives() {
        let resolver = Arc::new(ScriptedResolver::new(&[
            ("_ldap._tcp.dc._msdcs.ad.example.com", &["dc-a", "dc-b"]),
            ("_ldap._tcp.S1._sites.dc._msdcs.ad.example.com", &["dc-a"]),
        ]));
        // dc-a is reachable but not writable; dc-b is, and only shows up in
        // the broad list.
        let pinger = ScriptedPinger::new(&[
            ("dc-a", ex_response("dc-a", DsFlags::FD, "S1")),
            ("dc-b", ex_response("dc-b", DsFlags::FD | DsFlags::FW, "S3")),
        ]);
        let locator = scripted_locator(resolver.clone(), pinger);

        let mut request = DcLocatorRequest::new();
        request.domain_name = Some("ad.example.com".to_owned());
        request.flags = DcFlags::DS_WRITABLE_REQUIRED;

        let info = locator.locate(&request).unwrap();
        assert_eq!(info.domain_controller_name, "dc-b.ad.example.com");
        // selected from the broad list, not a site-scoped one
        assert!(!info.flags.contains(DsFlags::FC));
        assert_eq!(resolver.lookups().len(), 3);
    }

    #[test]
    fn test_exhausted_candidates_is_service_unavailable() {
        let resolver = Arc::new(ScriptedResolver::new(&[(
            "_ldap._tcp.dc._msdcs.ad.example.com",
            &["dc-a"] as &[&str],
        )]));
        let pinger = ScriptedPinger::new(&[]);
        let locator = scripted_locator(resolver, pinger);

        let mut request = DcLocatorRequest::new();
        request.domain_name = Some("ad.example.com".to_owned());

        let error = locator.locate(&request).unwrap_err();
        match error {
            LocatorError::Unreachable { scope, source } => {
                assert_eq!(scope, "domain 'ad.example.com'");
                assert!(matches!(
                    *source,
                    LocatorError::ServiceUnavailable { count: 1 }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pdc_location_filters_by_site_without_site_query() {
        let resolver = Arc::new(ScriptedResolver::new(&[(
            "_ldap._tcp.pdc._msdcs.ad.example.com",
            &["pdc-a", "pdc-b"] as &[&str],
        )]));
        let pinger = ScriptedPinger::new(&[
            ("pdc-a", ex_response("pdc-a", DsFlags::FP, "S9")),
            ("pdc-b", ex_response("pdc-b", DsFlags::FP, "S1")),
        ]);
        let locator = scripted_locator(resolver.clone(), pinger);

        let mut request = DcLocatorRequest::new();
        request.domain_name = Some("ad.example.com".to_owned());
        request.site_name = Some("s1".to_owned());
        request.flags = DcFlags::DS_PDC_REQUIRED;

        let info = locator.locate(&request).unwrap();
        // pdc-a is skipped for being in the wrong site, case-insensitively
        assert_eq!(info.domain_controller_name, "pdc-b.ad.example.com");
        assert!(info.flags.contains(DsFlags::FC));
        // the PDC lookup never narrows to a site
        assert_eq!(
            resolver.lookups(),
            vec!["_ldap._tcp.pdc._msdcs.ad.example.com".to_owned()]
        );
    }

    #[test]
    fn test_gc_location_determines_forest_name() {
        // The client's own domain is sub.example.com; its forest, learned
        // from the preliminary ldap/dc probe, is ad.example.com.
        let mut forest_response = ex_response("dc-sub", DsFlags::FD, "S1");
        forest_response.dns_forest_name = "ad.example.com".to_owned();
        forest_response.dns_domain_name = "sub.example.com".to_owned();
        forest_response.dns_host_name = "dc-sub.sub.example.com".to_owned();

        let resolver = Arc::new(ScriptedResolver::new(&[
            ("_ldap._tcp.dc._msdcs.sub.example.com", &["dc-sub"]),
            ("_ldap._tcp.gc._msdcs.ad.example.com", &["gc-a"]),
            ("_ldap._tcp.S1._sites.gc._msdcs.ad.example.com", &["gc-a"]),
        ]));
        let pinger = ScriptedPinger::new(&[
            ("dc-sub", forest_response),
            ("gc-a", ex_response("gc-a", DsFlags::FD | DsFlags::FG, "S1")),
        ]);
        let locator = DcLocator::builder()
            .local_host_name("client.sub.example.com")
            .resolver(resolver.clone())
            .pinger(Box::new(pinger))
            .build();

        let info = locator
            .locate(&request_with_flags(DcFlags::DS_GC_SERVER_REQUIRED))
            .unwrap();
        assert_eq!(info.domain_controller_name, "gc-a.ad.example.com");
        assert_eq!(info.dns_forest_name, "ad.example.com");
        assert_eq!(
            resolver.lookups(),
            vec![
                "_ldap._tcp.dc._msdcs.sub.example.com".to_owned(),
                "_ldap._tcp.gc._msdcs.ad.example.com".to_owned(),
                "_ldap._tcp.S1._sites.gc._msdcs.ad.example.com".to_owned(),
            ]
        );
    }

    #[test]
    fn test_probe_nt_version_composition() {
        let resolver = Arc::new(ScriptedResolver::new(&[
            ("_ldap._tcp.gc._msdcs.ad.example.com", &["gc-a"]),
            ("_ldap._tcp.S1._sites.gc._msdcs.ad.example.com", &["gc-a"]),
        ]));
        let pinger = Arc::new(ScriptedPinger::new(&[(
            "gc-a",
            ex_response("gc-a", DsFlags::FD | DsFlags::FG, "S1"),
        )]));
        struct SharedPinger(Arc<ScriptedPinger>);
        impl Pinger for SharedPinger {
            fn ping(&self, request: &LdapPingRequest) -> netlogon::Result<SamLogonResponse> {
                self.0.ping(request)
            }
        }
        let locator = DcLocator::builder()
            .local_host_name("client.ad.example.com")
            .resolver(resolver)
            .pinger(Box::new(SharedPinger(pinger.clone())))
            .build();

        let mut request = DcLocatorRequest::new();
        request.domain_name = Some("ad.example.com".to_owned());
        request.flags = DcFlags::DS_GC_SERVER_REQUIRED | DcFlags::DS_RETURN_DNS_NAME;
        locator.locate(&request).unwrap();

        let pings = pinger.pings();
        assert!(!pings.is_empty());
        let probe = pings.last().unwrap();
        // V5EX|VCS always, V5EP via the implied DS_IP_REQUIRED, VGC via
        // DS_GC_SERVER_REQUIRED
        assert_eq!(
            probe.nt_version,
            NetlogonNtVersion::V5EX
                | NetlogonNtVersion::VCS
                | NetlogonNtVersion::V5EP
                | NetlogonNtVersion::VGC
        );
        assert_eq!(probe.dns_domain.as_deref(), Some("ad.example.com"));
        assert_eq!(probe.dns_host_name.as_deref(), Some("client.ad.example.com"));
    }

    #[test]
    fn test_return_flat_name_uses_netbios_fields() {
        let resolver = Arc::new(ScriptedResolver::new(&[
            ("_ldap._tcp.dc._msdcs.ad.example.com", &["dc-a"]),
            ("_ldap._tcp.S1._sites.dc._msdcs.ad.example.com", &["dc-a"]),
        ]));
        let pinger = ScriptedPinger::new(&[(
            "dc-a",
            ex_response("dc-a", DsFlags::FD | DsFlags::FW, "S1"),
        )]);
        let locator = scripted_locator(resolver, pinger);

        let mut request = DcLocatorRequest::new();
        request.domain_name = Some("ad.example.com".to_owned());
        request.flags = DcFlags::DS_RETURN_FLAT_NAME;

        let info = locator.locate(&request).unwrap();
        assert_eq!(info.domain_controller_name, "DC-A");
        assert_eq!(info.domain_name.as_deref(), Some("EXAMPLE"));
        assert!(!info.flags.contains(DsFlags::FDNS));
        assert!(!info.flags.contains(DsFlags::FDM));
        assert!(info.flags.contains(DsFlags::FF));
    }
}
