//! Netlogon SAM Logon response structures (MS-ADTS 6.3.1.7 - 6.3.1.9).
//!
//! Three wire layouts exist, selected by the `NtVer` bits a client requests:
//! `NETLOGON_SAM_LOGON_RESPONSE_NT40`, `NETLOGON_SAM_LOGON_RESPONSE` and
//! `NETLOGON_SAM_LOGON_RESPONSE_EX`. All multi-byte scalars are
//! little-endian; DNS names use RFC 1035 label compression over the response
//! buffer itself.

use std::fmt;
use std::net::Ipv4Addr;

use tracing::debug;
use uuid::Uuid;

use crate::error::DecodeError;
use crate::flags::{DsFlags, NetlogonNtVersion, Opcode};

const AF_INET: u16 = 2;

const LABEL_MASK: u8 = 0xC0;
const LABEL_COMPRESSION: u8 = 0xC0;

/// A little-endian cursor over a Netlogon response buffer.
///
/// Absolute positioning is required for compressed-name pointers and the
/// `NtVersion` look-ahead of the EX variant.
struct LeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::BufferUnderflow {
                needed: n,
                have: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn get_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }
}

fn read_opcode(reader: &mut LeReader<'_>, expected: Opcode) -> Result<Opcode, DecodeError> {
    let opcode = Opcode::from_u16(reader.get_u16()?)?;
    if opcode != expected {
        return Err(DecodeError::InvalidOpcode(opcode.as_u16()));
    }
    Ok(opcode)
}

fn check_nt_version(
    bits: u32,
    expected: NetlogonNtVersion,
) -> Result<NetlogonNtVersion, DecodeError> {
    let nt_version = NetlogonNtVersion::from_bits_truncate(bits);
    if !nt_version.contains(expected) {
        return Err(DecodeError::NtVersionMismatch {
            expected,
            got: nt_version,
        });
    }
    Ok(nt_version)
}

fn read_nt_version(
    reader: &mut LeReader<'_>,
    expected: NetlogonNtVersion,
) -> Result<NetlogonNtVersion, DecodeError> {
    let bits = reader.get_u32()?;
    check_nt_version(bits, expected)
}

/// Reads a null-terminated UTF-16LE string. A lone terminator pair yields
/// `None`.
fn read_unicode_string(reader: &mut LeReader<'_>) -> Result<Option<String>, DecodeError> {
    let mut units = Vec::new();
    loop {
        if reader.remaining() < 2 {
            return Err(DecodeError::UnterminatedUnicodeString);
        }
        let unit = reader.get_u16()?;
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    if units.is_empty() {
        return Ok(None);
    }
    let s = char::decode_utf16(units).collect::<Result<String, _>>()?;
    Ok(Some(s))
}

/// Reads a GUID: `Data1`/`Data2`/`Data3` little-endian, `Data4` in network
/// order.
fn read_guid(reader: &mut LeReader<'_>) -> Result<Uuid, DecodeError> {
    let data1 = reader.get_u32()?;
    let data2 = reader.get_u16()?;
    let data3 = reader.get_u16()?;
    let data4 = reader.take(8)?;
    let mut d4 = [0u8; 8];
    d4.copy_from_slice(data4);
    Ok(Uuid::from_fields(data1, data2, data3, &d4))
}

/// Reads a DNS-label-compressed name (RFC 1035 4.1.4 over the full response
/// buffer). An empty label sequence yields `None`.
///
/// A pointer byte introduces a 14-bit backward offset; once one has been
/// followed, the outer position tracker no longer advances, so the caller
/// resumes right after the original pointer. Offsets must lie strictly
/// before the pointer itself, which rules out loops and forward jumps.
fn read_compressed_name(reader: &mut LeReader<'_>) -> Result<Option<String>, DecodeError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pointer_mode = false;
    let mut curr_pos = reader.pos();

    loop {
        let len = reader.get_u8()?;
        if !pointer_mode {
            curr_pos += 1;
        }
        match len & LABEL_MASK {
            0 => {
                if len == 0 {
                    break;
                }
                let len = len as usize;
                if len > reader.remaining() {
                    return Err(DecodeError::LabelTooLong {
                        len,
                        remaining: reader.remaining(),
                    });
                }
                let label = reader.take(len)?;
                labels.push(String::from_utf8(label.to_vec())?);
                if !pointer_mode {
                    curr_pos += len;
                }
            }
            LABEL_COMPRESSION => {
                let low = reader.get_u8()?;
                if !pointer_mode {
                    curr_pos += 1;
                }
                let offset = ((len & !LABEL_COMPRESSION) as usize) << 8 | low as usize;
                // position of the pointer minus its two length bytes
                let max_offset = curr_pos - 2;
                if offset >= max_offset {
                    return Err(DecodeError::PointerOutOfRange {
                        offset,
                        max: max_offset,
                    });
                }
                reader.seek(offset);
                pointer_mode = true;
            }
            _ => return Err(DecodeError::InvalidLabelType(len)),
        }
    }
    reader.seek(curr_pos);

    if labels.is_empty() {
        return Ok(None);
    }
    Ok(Some(labels.join(".")))
}

fn require(value: Option<String>, field: &'static str) -> Result<String, DecodeError> {
    value.ok_or(DecodeError::MissingField(field))
}

/// Both trailing tokens are historically `0xFFFF`; an all-zero token is
/// rejected.
fn consume_lm_tokens(reader: &mut LeReader<'_>) -> Result<(), DecodeError> {
    if reader.get_u16()? == 0 {
        return Err(DecodeError::ZeroLmToken("LmNtToken"));
    }
    if reader.get_u16()? == 0 {
        return Err(DecodeError::ZeroLmToken("Lm20Token"));
    }
    Ok(())
}

/// `NETLOGON_SAM_LOGON_RESPONSE_NT40`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamLogonNt40Response {
    pub opcode: Opcode,
    pub unicode_logon_server: Option<String>,
    pub unicode_user_name: Option<String>,
    pub unicode_domain_name: Option<String>,
    pub nt_version: NetlogonNtVersion,
}

impl SamLogonNt40Response {
    pub fn decode(netlogon_bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = LeReader::new(netlogon_bytes);
        let opcode = read_opcode(&mut reader, Opcode::LogonSamLogonResponse)?;
        let unicode_logon_server = read_unicode_string(&mut reader)?;
        let unicode_user_name = read_unicode_string(&mut reader)?;
        let unicode_domain_name = read_unicode_string(&mut reader)?;
        let nt_version = read_nt_version(&mut reader, NetlogonNtVersion::V1)?;
        consume_lm_tokens(&mut reader)?;

        Ok(Self {
            opcode,
            unicode_logon_server,
            unicode_user_name,
            unicode_domain_name,
            nt_version,
        })
    }
}

/// `NETLOGON_SAM_LOGON_RESPONSE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamLogonV5Response {
    pub opcode: Opcode,
    pub unicode_logon_server: Option<String>,
    pub unicode_user_name: Option<String>,
    pub unicode_domain_name: Option<String>,
    pub domain_guid: Uuid,
    pub dns_forest_name: String,
    pub dns_domain_name: String,
    pub dns_host_name: String,
    pub dc_ip_address: Ipv4Addr,
    pub flags: DsFlags,
    pub nt_version: NetlogonNtVersion,
}

impl SamLogonV5Response {
    pub fn decode(netlogon_bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = LeReader::new(netlogon_bytes);
        let opcode = read_opcode(&mut reader, Opcode::LogonSamLogonResponse)?;
        let unicode_logon_server = read_unicode_string(&mut reader)?;
        let unicode_user_name = read_unicode_string(&mut reader)?;
        let unicode_domain_name = read_unicode_string(&mut reader)?;
        let domain_guid = read_guid(&mut reader)?;
        // NullGuid
        reader.skip(16)?;
        let dns_forest_name = require(read_compressed_name(&mut reader)?, "DnsForestName")?;
        let dns_domain_name = require(read_compressed_name(&mut reader)?, "DnsDomainName")?;
        let dns_host_name = require(read_compressed_name(&mut reader)?, "DnsHostName")?;
        // stored LSB first on the wire, swap into network order
        let ip = reader.take(4)?;
        let dc_ip_address = Ipv4Addr::new(ip[3], ip[2], ip[1], ip[0]);
        let flags = DsFlags::from_bits_truncate(reader.get_u32()?);
        let nt_version =
            read_nt_version(&mut reader, NetlogonNtVersion::V1 | NetlogonNtVersion::V5)?;
        consume_lm_tokens(&mut reader)?;

        Ok(Self {
            opcode,
            unicode_logon_server,
            unicode_user_name,
            unicode_domain_name,
            domain_guid,
            dns_forest_name,
            dns_domain_name,
            dns_host_name,
            dc_ip_address,
            flags,
            nt_version,
        })
    }
}

/// `NETLOGON_SAM_LOGON_RESPONSE_EX`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamLogonExResponse {
    pub opcode: Opcode,
    pub flags: DsFlags,
    pub domain_guid: Uuid,
    pub dns_forest_name: String,
    pub dns_domain_name: String,
    pub dns_host_name: String,
    pub netbios_domain_name: Option<String>,
    pub netbios_computer_name: Option<String>,
    pub user_name: Option<String>,
    pub dc_site_name: String,
    pub client_site_name: Option<String>,
    /// Present iff the response `NtVersion` contains `V5EP`.
    pub dc_sock_addr: Option<Ipv4Addr>,
    /// Present iff the response `NtVersion` contains `VCS`.
    pub next_closest_site_name: Option<String>,
    pub nt_version: NetlogonNtVersion,
}

impl SamLogonExResponse {
    pub fn decode(netlogon_bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = LeReader::new(netlogon_bytes);
        let opcode = read_opcode(&mut reader, Opcode::LogonSamLogonResponseEx)?;
        // Sbz
        reader.skip(2)?;
        let flags = DsFlags::from_bits_truncate(reader.get_u32()?);
        let domain_guid = read_guid(&mut reader)?;
        let dns_forest_name = require(read_compressed_name(&mut reader)?, "DnsForestName")?;
        let dns_domain_name = require(read_compressed_name(&mut reader)?, "DnsDomainName")?;
        let dns_host_name = require(read_compressed_name(&mut reader)?, "DnsHostName")?;
        let netbios_domain_name = read_compressed_name(&mut reader)?;
        let netbios_computer_name = read_compressed_name(&mut reader)?;
        let user_name = read_compressed_name(&mut reader)?;
        let dc_site_name = require(read_compressed_name(&mut reader)?, "DcSiteName")?;
        let client_site_name = read_compressed_name(&mut reader)?;

        // NtVersion sits at length - 8, ahead of the LM tokens; it decides
        // whether DcSockAddr and NextClosestSiteName are present, so peek it
        // before the optional tail.
        if reader.len() < 8 {
            return Err(DecodeError::BufferUnderflow {
                needed: 8,
                have: reader.len(),
            });
        }
        let pos = reader.pos();
        reader.seek(reader.len() - 8);
        let nt_version = read_nt_version(
            &mut reader,
            NetlogonNtVersion::V1 | NetlogonNtVersion::V5EX,
        )?;
        reader.seek(pos);

        let mut dc_sock_addr = None;
        if nt_version.contains(NetlogonNtVersion::V5EP) {
            // DcSockAddrSize
            reader.skip(1)?;
            // DcSockAddr: sockaddr_in
            let sin_family = reader.get_u16()?;
            if sin_family != AF_INET {
                debug!(sin_family, "DcSockAddr.sin_family should be AF_INET (2)");
            }
            // sin_port
            reader.skip(2)?;
            let sin_addr = reader.take(4)?;
            dc_sock_addr = Some(Ipv4Addr::new(
                sin_addr[0],
                sin_addr[1],
                sin_addr[2],
                sin_addr[3],
            ));
            // sin_zero
            reader.skip(8)?;
        }

        let mut next_closest_site_name = None;
        if nt_version.contains(NetlogonNtVersion::VCS) {
            next_closest_site_name = read_compressed_name(&mut reader)?;
        }

        // the already-peeked NtVersion
        reader.skip(4)?;
        consume_lm_tokens(&mut reader)?;

        Ok(Self {
            opcode,
            flags,
            domain_guid,
            dns_forest_name,
            dns_domain_name,
            dns_host_name,
            netbios_domain_name,
            netbios_computer_name,
            user_name,
            dc_site_name,
            client_site_name,
            dc_sock_addr,
            next_closest_site_name,
            nt_version,
        })
    }
}

impl fmt::Display for SamLogonNt40Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SamLogonNt40Response[opcode: {}", self.opcode)?;
        if let Some(s) = &self.unicode_logon_server {
            write!(f, ", unicodeLogonServer: {s}")?;
        }
        if let Some(s) = &self.unicode_user_name {
            write!(f, ", unicodeUserName: {s}")?;
        }
        if let Some(s) = &self.unicode_domain_name {
            write!(f, ", unicodeDomainName: {s}")?;
        }
        write!(f, ", ntVersion: {}]", self.nt_version)
    }
}

impl fmt::Display for SamLogonV5Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SamLogonV5Response[opcode: {}", self.opcode)?;
        if let Some(s) = &self.unicode_logon_server {
            write!(f, ", unicodeLogonServer: {s}")?;
        }
        if let Some(s) = &self.unicode_user_name {
            write!(f, ", unicodeUserName: {s}")?;
        }
        if let Some(s) = &self.unicode_domain_name {
            write!(f, ", unicodeDomainName: {s}")?;
        }
        write!(f, ", domainGuid: {}", self.domain_guid)?;
        write!(f, ", dnsForestName: {}", self.dns_forest_name)?;
        write!(f, ", dnsDomainName: {}", self.dns_domain_name)?;
        write!(f, ", dnsHostName: {}", self.dns_host_name)?;
        write!(f, ", dcIpAddress: {}", self.dc_ip_address)?;
        write!(f, ", flags: {}", self.flags)?;
        write!(f, ", ntVersion: {}]", self.nt_version)
    }
}

impl fmt::Display for SamLogonExResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SamLogonExResponse[opcode: {}", self.opcode)?;
        write!(f, ", flags: {}", self.flags)?;
        write!(f, ", domainGuid: {}", self.domain_guid)?;
        write!(f, ", dnsForestName: {}", self.dns_forest_name)?;
        write!(f, ", dnsDomainName: {}", self.dns_domain_name)?;
        write!(f, ", dnsHostName: {}", self.dns_host_name)?;
        if let Some(s) = &self.netbios_domain_name {
            write!(f, ", netbiosDomainName: {s}")?;
        }
        if let Some(s) = &self.netbios_computer_name {
            write!(f, ", netbiosComputerName: {s}")?;
        }
        if let Some(s) = &self.user_name {
            write!(f, ", userName: {s}")?;
        }
        write!(f, ", dcSiteName: {}", self.dc_site_name)?;
        if let Some(s) = &self.client_site_name {
            write!(f, ", clientSiteName: {s}")?;
        }
        if let Some(addr) = &self.dc_sock_addr {
            write!(f, ", dcSockAddr: {addr}")?;
        }
        if let Some(s) = &self.next_closest_site_name {
            write!(f, ", nextClosestSiteName: {s}")?;
        }
        write!(f, ", ntVersion: {}]", self.nt_version)
    }
}

/// The three Netlogon SAM Logon response shapes as one tagged variant. The
/// decoders above are the constructors; [`crate::LdapPinger::ping`]
/// dispatches on the requested NT version bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamLogonResponse {
    Nt40(SamLogonNt40Response),
    V5(SamLogonV5Response),
    Ex(SamLogonExResponse),
}

impl SamLogonResponse {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Nt40(r) => r.opcode,
            Self::V5(r) => r.opcode,
            Self::Ex(r) => r.opcode,
        }
    }

    pub fn nt_version(&self) -> NetlogonNtVersion {
        match self {
            Self::Nt40(r) => r.nt_version,
            Self::V5(r) => r.nt_version,
            Self::Ex(r) => r.nt_version,
        }
    }
}

impl fmt::Display for SamLogonResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nt40(r) => r.fmt(f),
            Self::V5(r) => r.fmt(f),
            Self::Ex(r) => r.fmt(f),
        }
    }
}
