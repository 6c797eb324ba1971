//! Blocking transports for the LDAP ping exchange.
//!
//! A ping is a single request/response pair against port 389. Over UDP one
//! datagram is sent and one received; over TCP the request bytes are written
//! to a fresh connection and a single read suffices, Active Directory ping
//! responses are always small.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{NetlogonError, Result};

/// LDAP port used by every ping, plain and anonymous.
pub const LDAP_PING_PORT: u16 = 389;

/// Upper bound on a ping response; a larger datagram indicates a malformed
/// response.
pub const MAX_RESPONSE_SIZE: usize = 512;

/// Transport protocol for the ping exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingProtocol {
    #[default]
    Udp,
    Tcp,
}

impl PingProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl FromStr for PingProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else {
            Err(format!(
                "protocol must be either 'tcp' or 'udp', but is '{s}'"
            ))
        }
    }
}

/// Resolves a host name to its LDAP ping socket address.
pub(crate) fn resolve(host_name: &str) -> Result<SocketAddr> {
    let mut addrs = (host_name, LDAP_PING_PORT)
        .to_socket_addrs()
        .map_err(|source| NetlogonError::UnknownHost {
            host: host_name.to_owned(),
            source,
        })?;
    addrs.next().ok_or_else(|| NetlogonError::UnknownHost {
        host: host_name.to_owned(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
    })
}

fn effective(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero())
}

/// Sends `request` to `addr` over the chosen protocol and returns the raw
/// response bytes.
pub(crate) fn exchange(
    addr: SocketAddr,
    protocol: PingProtocol,
    request: &[u8],
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
) -> Result<Bytes> {
    match protocol {
        PingProtocol::Udp => exchange_udp(addr, request, effective(read_timeout)),
        PingProtocol::Tcp => {
            exchange_tcp(addr, request, effective(connect_timeout), effective(read_timeout))
        }
    }
}

fn exchange_udp(addr: SocketAddr, request: &[u8], read_timeout: Option<Duration>) -> Result<Bytes> {
    let bind_addr: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind_addr).map_err(|source| NetlogonError::Socket { addr, source })?;
    socket
        .set_read_timeout(read_timeout)
        .map_err(|source| NetlogonError::Socket { addr, source })?;

    debug!(%addr, len = request.len(), "sending LDAP ping request");
    socket
        .send_to(request, addr)
        .map_err(|source| NetlogonError::Send { addr, source })?;

    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    let (len, _) = socket
        .recv_from(&mut buf)
        .map_err(|source| NetlogonError::Receive { addr, source })?;
    if len == 0 {
        return Err(NetlogonError::EmptyResponse(addr));
    }
    debug!(%addr, len, "received LDAP ping response");

    Ok(Bytes::copy_from_slice(&buf[..len]))
}

fn exchange_tcp(
    addr: SocketAddr,
    request: &[u8],
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
) -> Result<Bytes> {
    let mut stream = match connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|source| NetlogonError::Connect { addr, source })?;
    stream
        .set_read_timeout(read_timeout)
        .map_err(|source| NetlogonError::Socket { addr, source })?;

    debug!(%addr, len = request.len(), "sending LDAP ping request");
    stream
        .write_all(request)
        .and_then(|()| stream.flush())
        .map_err(|source| NetlogonError::Send { addr, source })?;

    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    let len = stream
        .read(&mut buf)
        .map_err(|source| NetlogonError::Receive { addr, source })?;
    if len == 0 {
        return Err(NetlogonError::ConnectionClosed(addr));
    }
    debug!(%addr, len, "received LDAP ping response");

    Ok(Bytes::copy_from_slice(&buf[..len]))
}
