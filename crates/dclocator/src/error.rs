//! Error types for the DC locator

use hickory_resolver::error::ResolveError;
use thiserror::Error;

use crate::flags::DcFlags;

/// DC locator errors.
///
/// Validation errors (`Unsupported*`, `NotFullyQualified`, the flag
/// combination errors) abort before any I/O. During probing, per-candidate
/// communication errors are logged and skipped; [`LocatorError::Unreachable`]
/// with a [`LocatorError::ServiceUnavailable`] cause is raised only once a
/// candidate list is exhausted.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("RPC communication to '{0}' is not supported")]
    UnsupportedComputerName(String),

    #[error("{name} must be fully qualified: {value}")]
    NotFullyQualified { name: &'static str, value: String },

    #[error("failed to determine fully-qualified local host name")]
    LocalHostName(#[source] std::io::Error),

    #[error("Flag '{0}' is not supported")]
    UnsupportedFlag(DcFlags),

    #[error("Flags [{0}] cannot be combined")]
    IncompatibleFlags(DcFlags),

    #[error("Flag '{flag}' requires flag '{required}' to be set")]
    MissingRequiredFlag { flag: DcFlags, required: DcFlags },

    #[error("Flag '{0}' cannot be combined with site-specific discovery")]
    SiteSpecificConflict(DcFlags),

    #[error("failed to create DNS resolver")]
    Resolver(#[source] std::io::Error),

    #[error("SRV record lookup for '{name}' failed")]
    SrvLookup {
        name: String,
        #[source]
        source: ResolveError,
    },

    #[error("name '{0}' does not exist")]
    NameNotFound(String),

    #[error("failed to probe {count} server(s)")]
    ServiceUnavailable { count: usize },

    /// Wraps the failure of a whole discovery scope with the domain and site
    /// it was attempted against.
    #[error("{scope} could not be contacted or does not exist")]
    Unreachable {
        scope: String,
        #[source]
        source: Box<LocatorError>,
    },

    /// A reachable DC answered with a response the current request cannot
    /// use.
    #[error("unusable ping response: {0}")]
    UnusableResponse(&'static str),
}

impl LocatorError {
    /// Builds an [`LocatorError::Unreachable`] scoped to a domain and an
    /// optional site.
    pub(crate) fn unreachable(
        domain_name: &str,
        site_name: Option<&str>,
        source: LocatorError,
    ) -> Self {
        let scope = match site_name {
            Some(site) => format!("domain '{domain_name}' and site '{site}'"),
            None => format!("domain '{domain_name}'"),
        };
        Self::Unreachable {
            scope,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocatorError>;
