//! Active Directory domain controller locator
//!
//! An implementation of the <a
//! href="https://learn.microsoft.com/en-us/archive/technet-wiki/24457.how-domain-controllers-are-located-in-windows">DC
//! locator process</a>, mimicking the `DsGetDcName()` function: DNS SRV
//! discovery under the `_msdcs` naming convention (see [`dns`]) followed by
//! LDAP pings (see [`netlogon`]), with site-aware fallback.
//!
//! All operations are blocking and synchronous on the calling thread; the
//! configured read/connect timeouts are the only cancellation mechanism.
//!
//! # Example
//!
//! ```no_run
//! use dclocator::{DcFlags, DcLocator, DcLocatorRequest};
//!
//! let mut request = DcLocatorRequest::new();
//! request.domain_name = Some("ad.example.com".to_owned());
//! request.flags = DcFlags::DS_RETURN_DNS_NAME | DcFlags::DS_WRITABLE_REQUIRED;
//!
//! let info = DcLocator::new().locate(&request)?;
//! println!("{info}");
//! # Ok::<(), dclocator::LocatorError>(())
//! ```

pub mod dns;
pub mod error;
pub mod flags;
pub mod info;
pub mod locator;
pub mod request;

pub use dns::{DnsLocator, DnsLocatorRequest, HostPort, SrvRecord, SrvResolver};
pub use error::{LocatorError, Result};
pub use flags::DcFlags;
pub use info::DomainControllerInfo;
pub use locator::{DcLocator, Pinger};
pub use request::DcLocatorRequest;
