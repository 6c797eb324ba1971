//! DNS SRV discovery of Active Directory services.
//!
//! Lightweight RFC 2782 client for the SRV resource records Active Directory
//! registers under `_msdcs`
//! (<https://learn.microsoft.com/en-us/previous-versions/windows/it-pro/windows-server-2003/cc759550(v=ws.10)>).
//! The priority/weight host selection algorithm for failover is fully
//! implemented.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::Resolver;
use rand::Rng;
use tracing::debug;

use crate::error::{LocatorError, Result};

/// The RFC 2782 "service is decidedly not available" sentinel target.
const UNAVAILABLE_SERVICE: &str = ".";

const DEFAULT_PROTOCOL: SrvProtocol = SrvProtocol::Tcp;

/// Service to discover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrvService {
    Ldap,
    Kerberos,
    Kpasswd,
    Gc,
}

impl SrvService {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ldap => "ldap",
            Self::Kerberos => "kerberos",
            Self::Kpasswd => "kpasswd",
            Self::Gc => "gc",
        }
    }
}

impl FromStr for SrvService {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ldap" => Ok(Self::Ldap),
            "kerberos" => Ok(Self::Kerberos),
            "kpasswd" => Ok(Self::Kpasswd),
            "gc" => Ok(Self::Gc),
            other => Err(format!("invalid service: '{other}'")),
        }
    }
}

/// SRV protocol label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrvProtocol {
    Tcp,
    Udp,
}

impl SrvProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl FromStr for SrvProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("invalid protocol: '{other}'")),
        }
    }
}

/// DC type label under `_msdcs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcType {
    Dc,
    Gc,
    Pdc,
}

impl DcType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dc => "dc",
            Self::Gc => "gc",
            Self::Pdc => "pdc",
        }
    }
}

impl FromStr for DcType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dc" => Ok(Self::Dc),
            "gc" => Ok(Self::Gc),
            "pdc" => Ok(Self::Pdc),
            other => Err(format!("invalid DC type: '{other}'")),
        }
    }
}

/// Parameters of one SRV discovery.
#[derive(Debug, Clone)]
pub struct DnsLocatorRequest {
    pub service: SrvService,
    /// Defaults to `tcp`.
    pub protocol: Option<SrvProtocol>,
    pub site_name: Option<String>,
    pub dc_type: Option<DcType>,
    pub domain_name: String,
}

impl DnsLocatorRequest {
    pub fn new(service: SrvService, domain_name: impl Into<String>) -> Self {
        Self {
            service,
            protocol: None,
            site_name: None,
            dc_type: None,
            domain_name: domain_name.into(),
        }
    }

    /// Builds the AD-shaped SRV owner name:
    /// `_{service}._{protocol}[.{site}._sites][.{dcType}._msdcs].{domain}`.
    pub fn lookup_name(&self) -> String {
        let mut name = String::new();
        name.push('_');
        name.push_str(self.service.as_str());
        name.push_str("._");
        name.push_str(self.protocol.unwrap_or(DEFAULT_PROTOCOL).as_str());
        if let Some(site) = self.site_name.as_deref().filter(|s| !s.is_empty()) {
            name.push('.');
            name.push_str(site);
            name.push_str("._sites");
        }
        if let Some(dc_type) = self.dc_type {
            name.push('.');
            name.push_str(dc_type.as_str());
            name.push_str("._msdcs");
        }
        name.push('.');
        name.push_str(&self.domain_name);
        name
    }
}

/// One SRV resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Target host as returned by DNS, trailing dot possible.
    pub target: String,
}

impl fmt::Display for SrvRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SrvRecord[{} {} {} {}]",
            self.priority, self.weight, self.port, self.target
        )
    }
}

/// An unresolved candidate host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// SRV lookup backend seam; the system backend is DNS via
/// [`hickory_resolver`].
pub trait SrvResolver: Send + Sync {
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>>;
}

/// SRV resolver backed by the operating system's DNS configuration.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    read_timeout: Option<Duration>,
}

impl SystemResolver {
    pub fn new(read_timeout: Option<Duration>) -> Self {
        Self { read_timeout }
    }
}

impl SrvResolver for SystemResolver {
    fn lookup_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        let (config, mut options) = read_system_conf()
            .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
        if let Some(timeout) = self.read_timeout.filter(|t| !t.is_zero()) {
            options.timeout = timeout;
        }
        let resolver = Resolver::new(config, options).map_err(LocatorError::Resolver)?;

        let lookup = match resolver.srv_lookup(name) {
            Ok(lookup) => lookup,
            Err(error) => {
                if let ResolveErrorKind::NoRecordsFound { response_code, .. } = error.kind() {
                    if *response_code == ResponseCode::NXDomain {
                        return Err(LocatorError::NameNotFound(name.to_owned()));
                    }
                    // the name exists but carries no SRV records
                    return Ok(Vec::new());
                }
                return Err(LocatorError::SrvLookup {
                    name: name.to_owned(),
                    source: error,
                });
            }
        };

        Ok(lookup
            .iter()
            .map(|srv| SrvRecord {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: srv.target().to_utf8(),
            })
            .collect())
    }
}

/// Locates Active Directory services via DNS SRV resource records, sorted
/// and selected according to RFC 2782.
///
/// ```no_run
/// use dclocator::dns::{DnsLocator, DnsLocatorRequest, SrvService};
///
/// let locator = DnsLocator::builder().build();
/// let request = DnsLocatorRequest::new(SrvService::Ldap, "ad.example.com");
/// let hosts = locator.locate(&request)?;
/// # Ok::<(), dclocator::LocatorError>(())
/// ```
pub struct DnsLocator {
    resolver: Arc<dyn SrvResolver>,
}

impl DnsLocator {
    pub fn builder() -> DnsLocatorBuilder {
        DnsLocatorBuilder::default()
    }

    /// Looks up the SRV name for `request` and returns the candidate hosts
    /// in RFC 2782 order. An empty list means the name exists but carries no
    /// usable records.
    pub fn locate(&self, request: &DnsLocatorRequest) -> Result<Vec<HostPort>> {
        let name = request.lookup_name();
        debug!(%name, "looking up SRV records");
        let records = self.resolver.lookup_srv(&name)?;

        // The DNS server explicitly indicating that this service is not
        // provided, as described by the RFC.
        if records.len() == 1 && records[0].target == UNAVAILABLE_SERVICE {
            debug!(%name, "service is decidedly not available");
            return Ok(Vec::new());
        }
        if records.is_empty() {
            debug!(%name, "no SRV records found");
            return Ok(Vec::new());
        }
        debug!(%name, count = records.len(), "found SRV records");

        let hosts = order_by_rfc2782(records, &mut rand::thread_rng());
        debug!(%name, count = hosts.len(), "selected host addresses");
        Ok(hosts)
    }
}

/// Builds a [`DnsLocator`]; consumed by `build()`, so a built configuration
/// can no longer be mutated.
#[derive(Default)]
pub struct DnsLocatorBuilder {
    read_timeout: Option<Duration>,
    resolver: Option<Arc<dyn SrvResolver>>,
}

impl DnsLocatorBuilder {
    /// Read timeout applied to the DNS lookup.
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    /// Replaces the system DNS backend.
    pub fn resolver(mut self, resolver: Arc<dyn SrvResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> DnsLocator {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemResolver::new(self.read_timeout)));
        DnsLocator { resolver }
    }
}

fn rfc2782_order(a: &SrvRecord, b: &SrvRecord) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    // ascending by priority; within a priority, weight 0 sorts first
    a.priority.cmp(&b.priority).then_with(|| {
        if a.weight == 0 && b.weight != 0 {
            Ordering::Less
        } else if a.weight != 0 && b.weight == 0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

/// Applies the RFC 2782 selection algorithm: per priority group, repeatedly
/// draw `r` in `[0, sum of remaining weights]` and emit the first remaining
/// record whose running weight sum reaches `r`.
fn order_by_rfc2782<R: Rng>(mut records: Vec<SrvRecord>, rng: &mut R) -> Vec<HostPort> {
    records.sort_by(rfc2782_order);
    let mut records: Vec<Option<SrvRecord>> = records.into_iter().map(Some).collect();
    let mut hosts = Vec::with_capacity(records.len());

    let mut i = 0;
    while i < records.len() {
        let start = i;
        while i + 1 < records.len()
            && records[i].as_ref().unwrap().priority == records[i + 1].as_ref().unwrap().priority
        {
            i += 1;
        }
        let end = i;

        for _ in start..=end {
            let mut sum = 0u32;
            let mut sums = vec![0u32; end - start + 1];
            for j in start..=end {
                if let Some(record) = &records[j] {
                    sum += u32::from(record.weight);
                    sums[j - start] = sum;
                }
            }
            let r = if sum == 0 { 0 } else { rng.gen_range(0..=sum) };
            for k in start..=end {
                let selected = match &records[k] {
                    Some(record) if sums[k - start] >= r => {
                        let host = record
                            .target
                            .strip_suffix('.')
                            .unwrap_or(&record.target)
                            .to_owned();
                        hosts.push(HostPort {
                            host,
                            port: record.port,
                        });
                        true
                    }
                    _ => false,
                };
                if selected {
                    records[k] = None;
                    break;
                }
            }
        }
        i += 1;
    }

    hosts
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn record(priority: u16, weight: u16, port: u16, target: &str) -> SrvRecord {
        SrvRecord {
            priority,
            weight,
            port,
            target: target.to_owned(),
        }
    }

    struct FixedResolver(Vec<SrvRecord>);

    impl SrvResolver for FixedResolver {
        fn lookup_srv(&self, _name: &str) -> Result<Vec<SrvRecord>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_lookup_name_construction() {
        let mut request = DnsLocatorRequest::new(SrvService::Ldap, "example.com");
        request.dc_type = Some(DcType::Dc);
        assert_eq!(request.lookup_name(), "_ldap._tcp.dc._msdcs.example.com");

        request.site_name = Some("Site1".to_owned());
        request.dc_type = Some(DcType::Gc);
        assert_eq!(
            request.lookup_name(),
            "_ldap._tcp.Site1._sites.gc._msdcs.example.com"
        );

        let mut request = DnsLocatorRequest::new(SrvService::Kerberos, "example.com");
        request.protocol = Some(SrvProtocol::Udp);
        assert_eq!(request.lookup_name(), "_kerberos._udp.example.com");

        let request = DnsLocatorRequest::new(SrvService::Gc, "example.com");
        assert_eq!(request.lookup_name(), "_gc._tcp.example.com");
    }

    #[test]
    fn test_token_parsing() {
        assert_eq!("LDAP".parse::<SrvService>().unwrap(), SrvService::Ldap);
        assert_eq!("pdc".parse::<DcType>().unwrap(), DcType::Pdc);
        assert_eq!("TCP".parse::<SrvProtocol>().unwrap(), SrvProtocol::Tcp);
        assert!("smtp".parse::<SrvService>().is_err());
    }

    #[test]
    fn test_selection_emits_every_record_once() {
        let records = vec![
            record(0, 0, 389, "a.example.com."),
            record(0, 1, 389, "b.example.com."),
            record(0, 9, 389, "c.example.com."),
            record(1, 0, 389, "d.example.com."),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let hosts = order_by_rfc2782(records, &mut rng);

        let mut names: Vec<&str> = hosts.iter().map(|h| h.host.as_str()).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            [
                "a.example.com",
                "b.example.com",
                "c.example.com",
                "d.example.com"
            ]
        );
    }

    #[test]
    fn test_selection_respects_priority_order() {
        let records = vec![
            record(20, 5, 389, "low.example.com."),
            record(10, 5, 389, "high-1.example.com."),
            record(10, 5, 389, "high-2.example.com."),
        ];
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let hosts = order_by_rfc2782(records.clone(), &mut rng);
            assert_eq!(hosts.len(), 3);
            assert!(hosts[0].host.starts_with("high-"));
            assert!(hosts[1].host.starts_with("high-"));
            assert_eq!(hosts[2].host, "low.example.com");
        }
    }

    #[test]
    fn test_selection_weight_proportionality() {
        let records = vec![
            record(0, 0, 389, "w0.example.com."),
            record(0, 1, 389, "w1.example.com."),
            record(0, 9, 389, "w9.example.com."),
        ];

        let mut rng = StdRng::seed_from_u64(42);
        let trials = 2000;
        let mut first_counts = std::collections::HashMap::new();
        for _ in 0..trials {
            let hosts = order_by_rfc2782(records.clone(), &mut rng);
            *first_counts.entry(hosts[0].host.clone()).or_insert(0u32) += 1;
        }

        let w9_first = first_counts.get("w9.example.com").copied().unwrap_or(0);
        let w1_first = first_counts.get("w1.example.com").copied().unwrap_or(0);
        let w0_first = first_counts.get("w0.example.com").copied().unwrap_or(0);

        // w9 wins the draw in proportion to its weight (expected ~82%),
        // the weight-0 record only when r lands on 0 (expected ~9%).
        assert!(w9_first > trials * 7 / 10, "w9 first only {w9_first} times");
        assert!(w1_first < trials / 4, "w1 first {w1_first} times");
        assert!(w0_first < trials / 5, "w0 first {w0_first} times");
    }

    #[test]
    fn test_selection_zero_weights_keep_sorted_order() {
        let records = vec![
            record(0, 0, 389, "a.example.com."),
            record(0, 0, 389, "b.example.com."),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let hosts = order_by_rfc2782(records, &mut rng);
        assert_eq!(hosts[0].host, "a.example.com");
        assert_eq!(hosts[1].host, "b.example.com");
    }

    #[test]
    fn test_locate_strips_trailing_dot_and_keeps_port() {
        let locator = DnsLocator::builder()
            .resolver(Arc::new(FixedResolver(vec![record(
                0,
                100,
                3268,
                "gc.example.com.",
            )])))
            .build();
        let request = DnsLocatorRequest::new(SrvService::Gc, "example.com");
        let hosts = locator.locate(&request).unwrap();
        assert_eq!(
            hosts,
            vec![HostPort {
                host: "gc.example.com".to_owned(),
                port: 3268
            }]
        );
    }

    #[test]
    fn test_locate_unavailable_service_sentinel() {
        let locator = DnsLocator::builder()
            .resolver(Arc::new(FixedResolver(vec![record(0, 0, 389, ".")])))
            .build();
        let request = DnsLocatorRequest::new(SrvService::Ldap, "example.com");
        assert!(locator.locate(&request).unwrap().is_empty());
    }
}
