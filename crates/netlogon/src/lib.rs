//! LDAP ping client and Netlogon SAM Logon wire format
//!
//! This crate implements the client half of the Active Directory
//! <a href="https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-adts/895a7744-aff3-4f64-bcfa-f8c05915d2e9">LDAP
//! ping</a>: a purpose-built BER codec for the anonymous `Netlogon`
//! SearchRequest, blocking UDP/TCP transports for the exchange, and decoders
//! for the three `NETLOGON_SAM_LOGON_RESPONSE` binary layouts (MS-ADTS
//! 6.3.1).
//!
//! # Example
//!
//! ```no_run
//! use netlogon::{LdapPingRequest, LdapPinger, NetlogonNtVersion};
//!
//! let nt_version = NetlogonNtVersion::V5EX | NetlogonNtVersion::VCS;
//! let mut request = LdapPingRequest::new("dc-01.ad.example.com", nt_version);
//! request.dns_domain = Some("ad.example.com".to_owned());
//!
//! let response = LdapPinger::new().ping(&request)?;
//! println!("{response}");
//! # Ok::<(), netlogon::NetlogonError>(())
//! ```

pub mod ber;
pub mod codec;
pub mod error;
pub mod flags;
pub mod pinger;
pub mod response;
pub mod transport;

pub use error::{DecodeError, NetlogonError, Result};
pub use flags::{
    from_flags_string, to_flags_string, DsFlags, InvalidFlagError, NetlogonNtVersion, Opcode,
};
pub use pinger::{LdapPingRequest, LdapPinger};
pub use response::{
    SamLogonExResponse, SamLogonNt40Response, SamLogonResponse, SamLogonV5Response,
};
pub use transport::{PingProtocol, LDAP_PING_PORT, MAX_RESPONSE_SIZE};
