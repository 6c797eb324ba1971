//! LDAP ping client (MS-ADTS 6.3.3).
//!
//! An LDAP ping probes the liveliness and capabilities of a domain
//! controller with an anonymous SearchRequest for the `Netlogon` operational
//! attribute. No bind precedes the request.

use std::time::Duration;

use tracing::{debug, trace};

use crate::codec;
use crate::error::{NetlogonError, Result};
use crate::flags::NetlogonNtVersion;
use crate::response::{
    SamLogonExResponse, SamLogonNt40Response, SamLogonResponse, SamLogonV5Response,
};
use crate::transport::{self, PingProtocol};

/// Parameters of a single LDAP ping.
#[derive(Debug, Clone)]
pub struct LdapPingRequest {
    /// Host to probe, port is always 389.
    pub host_name: String,
    /// Requested `NtVer` bits; these govern which response variant the
    /// server returns and the decoder parses.
    pub nt_version: NetlogonNtVersion,
    pub protocol: PingProtocol,
    /// Optional `DnsDomain` filter term.
    pub dns_domain: Option<String>,
    /// Optional `DnsHostName` filter term.
    pub dns_host_name: Option<String>,
    /// Bounds TCP `connect()` only.
    pub connect_timeout: Option<Duration>,
    /// Becomes the socket read timeout.
    pub read_timeout: Option<Duration>,
}

impl LdapPingRequest {
    pub fn new(host_name: impl Into<String>, nt_version: NetlogonNtVersion) -> Self {
        Self {
            host_name: host_name.into(),
            nt_version,
            protocol: PingProtocol::default(),
            dns_domain: None,
            dns_host_name: None,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

/// A stateless LDAP ping client; all configuration travels in the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapPinger;

impl LdapPinger {
    pub fn new() -> Self {
        Self
    }

    /// Sends an LDAP ping and returns the raw `Netlogon` attribute value.
    pub fn ping_bytes(&self, request: &LdapPingRequest) -> Result<Vec<u8>> {
        let mut filter = format!("(&(NtVer=0x{:08X})", request.nt_version.bits());
        if let Some(dns_domain) = request.dns_domain.as_deref().filter(|s| !s.is_empty()) {
            filter.push_str(&format!("(DnsDomain={dns_domain})"));
        }
        if let Some(dns_host_name) = request.dns_host_name.as_deref().filter(|s| !s.is_empty()) {
            filter.push_str(&format!("(DnsHostName={dns_host_name})"));
        }
        filter.push(')');
        debug!(host = %request.host_name, %filter, "performing LDAP ping");

        let request_bytes = codec::encode_ping_request(
            request.nt_version,
            request.dns_domain.as_deref(),
            request.dns_host_name.as_deref(),
        );

        let addr = transport::resolve(&request.host_name)?;
        let response_bytes = transport::exchange(
            addr,
            request.protocol,
            &request_bytes,
            request.connect_timeout,
            request.read_timeout,
        )?;

        codec::decode_ping_response(&response_bytes)?
            .ok_or(NetlogonError::NoSuchAttribute(addr))
    }

    /// Sends an LDAP ping and decodes the response variant selected by the
    /// requested NT version: `V5EX` yields [`SamLogonResponse::Ex`], `V5`
    /// yields [`SamLogonResponse::V5`], anything else the NT 4.0 shape.
    pub fn ping(&self, request: &LdapPingRequest) -> Result<SamLogonResponse> {
        let netlogon_bytes = self.ping_bytes(request)?;

        let response = if request.nt_version.contains(NetlogonNtVersion::V5EX) {
            SamLogonResponse::Ex(SamLogonExResponse::decode(&netlogon_bytes)?)
        } else if request.nt_version.contains(NetlogonNtVersion::V5) {
            SamLogonResponse::V5(SamLogonV5Response::decode(&netlogon_bytes)?)
        } else {
            SamLogonResponse::Nt40(SamLogonNt40Response::decode(&netlogon_bytes)?)
        };
        trace!(%response, "decoded LDAP ping response");

        Ok(response)
    }
}
