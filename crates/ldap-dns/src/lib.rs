//! LDAP DNS provider for Active Directory
//!
//! Rewrites an `ldap`/`ldaps`/`gc`/`gcs` URL into a concrete endpoint by
//! running the DC locator. Global Catalog intent is recognized from the
//! scheme (`gc`/`gcs`, rewritten to `ldap`/`ldaps` with the 3268/3269
//! default ports) or from an explicit GC port on an LDAP scheme. When the
//! URL names no host, the domain is derived from the `DC` RDNs of the base
//! DN path.
//!
//! On any locator failure the provider falls back to returning the caller's
//! URL verbatim, so a missing or unreachable directory never breaks URL
//! resolution.

use std::fmt::Write as _;
use std::time::Duration;

use dclocator::{DcFlags, DcLocator, DcLocatorRequest};
use thiserror::Error;
use tracing::debug;
use url::Url;

const LDAP_SCHEME: &str = "ldap";
const LDAPS_SCHEME: &str = "ldaps";
const GC_SCHEME: &str = "gc";
const GCS_SCHEME: &str = "gcs";

/// Global Catalog LDAP port.
pub const GC_PORT: u16 = 3268;
/// Global Catalog LDAP-over-TLS port.
pub const GCS_PORT: u16 = 3269;

/// Errors raised before the locator runs; locator failures themselves are
/// swallowed into the verbatim fallback.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("URL '{url}' is invalid")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base DN '{0}' is invalid")]
    InvalidBaseDn(String),
}

/// The provider's answer: the located domain (or forest) name and the
/// endpoint URLs to contact, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapDnsProviderResult {
    pub domain_name: String,
    pub endpoints: Vec<String>,
}

/// Locates Active Directory endpoints for LDAP URLs.
#[derive(Default)]
pub struct LdapDnsProvider {
    locator: DcLocator,
}

impl LdapDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the provider with a custom locator, e.g. one with a scripted
    /// resolver.
    pub fn with_locator(locator: DcLocator) -> Self {
        Self { locator }
    }

    /// Resolves `url` to a located endpoint. Returns the original URL
    /// unchanged whenever the locator cannot produce a server.
    pub fn lookup_endpoints(
        &self,
        url: &str,
        read_timeout: Option<Duration>,
    ) -> Result<LdapDnsProviderResult, ProviderError> {
        let ldap_url = Url::parse(url).map_err(|source| ProviderError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;

        let mut request = DcLocatorRequest::new();
        request.flags = DcFlags::DS_ONLY_LDAP_NEEDED
            | DcFlags::DS_RETURN_DNS_NAME
            | DcFlags::DS_TRY_NEXTCLOSEST_SITE;
        request.read_timeout = read_timeout;

        let path = ldap_url.path();
        let base_dn = path.strip_prefix('/').unwrap_or(path);

        let mut domain_name = ldap_url.host_str().unwrap_or("").to_owned();
        if domain_name.is_empty() && !base_dn.is_empty() {
            domain_name = domain_from_base_dn(base_dn)?;
        }
        if !domain_name.is_empty() {
            request.domain_name = Some(domain_name);
        }

        let (scheme, port, gc_server_required) =
            map_gc_scheme(ldap_url.scheme(), ldap_url.port());
        if gc_server_required {
            request.flags |= DcFlags::DS_GC_SERVER_REQUIRED;
        }

        debug!(url, "locating a server");
        match self.locator.locate(&request) {
            Ok(dc_info) => {
                debug!(url, info = %dc_info, "successfully located a server");
                let endpoint = build_endpoint(&ldap_url, scheme, &dc_info.domain_controller_name, port);
                let domain_name = if gc_server_required {
                    dc_info.dns_forest_name
                } else {
                    dc_info.domain_name.unwrap_or_default()
                };
                debug!(domain = %domain_name, endpoint = %endpoint, "returning located endpoint");
                Ok(LdapDnsProviderResult {
                    domain_name,
                    endpoints: vec![endpoint],
                })
            }
            Err(error) => {
                debug!(url, %error, "failed to locate a server, returning original as fallback");
                Ok(LdapDnsProviderResult {
                    domain_name: String::new(),
                    endpoints: vec![url.to_owned()],
                })
            }
        }
    }
}

/// Maps GC schemes and ports: `gc`/`gcs` imply a Global Catalog and are
/// rewritten to `ldap`/`ldaps` with their default ports; the 3268/3269
/// ports imply a Global Catalog on a plain LDAP scheme.
fn map_gc_scheme<'a>(scheme: &'a str, port: Option<u16>) -> (&'a str, Option<u16>, bool) {
    if scheme.eq_ignore_ascii_case(LDAP_SCHEME) && port == Some(GC_PORT)
        || scheme.eq_ignore_ascii_case(LDAPS_SCHEME) && port == Some(GCS_PORT)
    {
        (scheme, port, true)
    } else if scheme.eq_ignore_ascii_case(GC_SCHEME) {
        (LDAP_SCHEME, port.or(Some(GC_PORT)), true)
    } else if scheme.eq_ignore_ascii_case(GCS_SCHEME) {
        (LDAPS_SCHEME, port.or(Some(GCS_PORT)), true)
    } else {
        (scheme, port, false)
    }
}

/// Reverses the `DC` RDNs of a base DN and joins them with `.`,
/// e.g. `CN=Users,DC=ad,DC=example,DC=com` becomes `ad.example.com`.
fn domain_from_base_dn(base_dn: &str) -> Result<String, ProviderError> {
    let mut components = Vec::new();
    for rdn in base_dn.split(',') {
        let (rdn_type, value) = rdn
            .trim()
            .split_once('=')
            .ok_or_else(|| ProviderError::InvalidBaseDn(base_dn.to_owned()))?;
        if rdn_type.trim().eq_ignore_ascii_case("DC") {
            components.push(value.trim());
        }
    }
    components.reverse();
    Ok(components.join("."))
}

fn build_endpoint(original: &Url, scheme: &str, host: &str, port: Option<u16>) -> String {
    let mut endpoint = format!("{scheme}://{host}");
    if let Some(port) = port {
        let _ = write!(endpoint, ":{port}");
    }
    endpoint.push_str(original.path());
    if let Some(query) = original.query() {
        let _ = write!(endpoint, "?{query}");
    }
    if let Some(fragment) = original.fragment() {
        let _ = write!(endpoint, "#{fragment}");
    }
    endpoint
}
