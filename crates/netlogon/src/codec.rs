//! LDAP ping message codec (MS-ADTS 6.3.3).
//!
//! The request is a single LDAPMessage carrying an anonymous SearchRequest
//! against the rootDSE: baseObject scope, an `and` filter over `NtVer` (and
//! optionally `DnsDomain`/`DnsHostName`) and the single requested attribute
//! `Netlogon`. The response is a concatenation of LDAPMessages: zero or more
//! SearchResultEntry followed by one SearchResultDone.

use bytes::Bytes;
use tracing::debug;

use crate::ber::{
    self, BerReader, TAG_CLASS_APPLICATION, TAG_CLASS_CONSTRUCTED, TAG_CLASS_CONTEXT_SPECIFIC,
    TAG_SEQUENCE, TAG_SET,
};
use crate::error::DecodeError;
use crate::flags::NetlogonNtVersion;

/// The operational attribute requested by an LDAP ping.
pub const NETLOGON_ATTRIBUTE: &str = "Netlogon";

const SEARCH_REQUEST_TAG_NUMBER: u8 = 3;
const SEARCH_RESULT_ENTRY_TAG_NUMBER: u8 = 4;
const SEARCH_RESULT_DONE_TAG_NUMBER: u8 = 5;
const AND_FILTER_TAG_NUMBER: u8 = 0;
const EQUALITY_MATCH_FILTER_TAG_NUMBER: u8 = 3;

fn equality_match(attribute: &str, value: &[u8]) -> Vec<u8> {
    ber::write_constructed(
        TAG_CLASS_CONTEXT_SPECIFIC | TAG_CLASS_CONSTRUCTED | EQUALITY_MATCH_FILTER_TAG_NUMBER,
        &[
            &ber::write_octet_string(attribute.as_bytes()),
            &ber::write_octet_string(value),
        ],
    )
}

/// Encodes the LDAP ping SearchRequest for the given `NtVer` bits and
/// optional `DnsDomain`/`DnsHostName` filter terms.
pub fn encode_ping_request(
    nt_version: NetlogonNtVersion,
    dns_domain: Option<&str>,
    dns_host_name: Option<&str>,
) -> Bytes {
    // NtVer is matched against a little-endian 4-byte blob
    let nt_version_bytes = nt_version.bits().to_le_bytes();

    let mut filter_terms = vec![equality_match("NtVer", &nt_version_bytes)];
    if let Some(dns_domain) = dns_domain.filter(|s| !s.is_empty()) {
        filter_terms.push(equality_match("DnsDomain", dns_domain.as_bytes()));
    }
    if let Some(dns_host_name) = dns_host_name.filter(|s| !s.is_empty()) {
        filter_terms.push(equality_match("DnsHostName", dns_host_name.as_bytes()));
    }

    let term_slices: Vec<&[u8]> = filter_terms.iter().map(|t| t.as_slice()).collect();
    let and_filter = ber::write_constructed(
        TAG_CLASS_CONTEXT_SPECIFIC | TAG_CLASS_CONSTRUCTED | AND_FILTER_TAG_NUMBER,
        &term_slices,
    );

    let search_request = ber::write_constructed(
        TAG_CLASS_APPLICATION | TAG_CLASS_CONSTRUCTED | SEARCH_REQUEST_TAG_NUMBER,
        &[
            // baseObject
            &ber::write_octet_string(b""),
            // scope: baseObject
            &ber::write_enumerated(0),
            // derefAliases: neverDerefAliases
            &ber::write_enumerated(0),
            // sizeLimit
            &ber::write_integer(0),
            // timeLimit
            &ber::write_integer(0),
            // typesOnly
            &ber::write_boolean(false),
            // filter
            &and_filter,
            // attributes
            &ber::write_sequence(&[&ber::write_octet_string(NETLOGON_ATTRIBUTE.as_bytes())]),
        ],
    );

    let message = ber::write_sequence(&[
        // messageID
        &ber::write_integer(1),
        // protocolOp
        &search_request,
    ]);
    Bytes::from(message)
}

/// Decodes a stream of LDAPMessages up to the SearchResultDone and extracts
/// the first `Netlogon` attribute value, or `None` if the result stream did
/// not carry one.
pub fn decode_ping_response(response: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
    let mut reader = BerReader::new(response);
    let mut netlogon: Option<Vec<u8>> = None;
    let mut done = false;

    while !reader.eof() && !done {
        let message = reader.expect_element(TAG_SEQUENCE)?;
        let mut message = BerReader::new(message);
        // messageID
        message.read_integer()?;
        // protocolOp, trailing controls are ignored
        let (tag, protocol_op) = message.read_element()?;
        let tag_number = tag & !(TAG_CLASS_APPLICATION | TAG_CLASS_CONSTRUCTED);
        match tag_number {
            SEARCH_RESULT_ENTRY_TAG_NUMBER => decode_search_result_entry(protocol_op, &mut netlogon)?,
            SEARCH_RESULT_DONE_TAG_NUMBER => {
                decode_search_result_done(protocol_op)?;
                done = true;
            }
            other => return Err(DecodeError::UnsupportedProtocolOp(other)),
        }
    }

    if !done {
        return Err(DecodeError::MissingSearchResultDone);
    }

    Ok(netlogon)
}

fn decode_search_result_entry(
    entry: &[u8],
    netlogon: &mut Option<Vec<u8>>,
) -> Result<(), DecodeError> {
    let mut entry = BerReader::new(entry);
    // objectName
    entry.read_octet_string()?;
    // PartialAttributeList
    let attributes = entry.expect_element(TAG_SEQUENCE)?;
    let mut attributes = BerReader::new(attributes);
    while !attributes.eof() {
        let attribute = attributes.expect_element(TAG_SEQUENCE)?;
        let mut attribute = BerReader::new(attribute);
        let name = attribute.read_octet_string()?;
        let is_netlogon = name.eq_ignore_ascii_case(NETLOGON_ATTRIBUTE.as_bytes());
        let values = attribute.expect_element(TAG_SET)?;
        let mut values = BerReader::new(values);
        while !values.eof() {
            let value = values.read_octet_string()?;
            if is_netlogon {
                if netlogon.is_none() {
                    *netlogon = Some(value.to_vec());
                } else {
                    debug!("ignoring additional Netlogon attribute value");
                }
            }
        }
    }
    Ok(())
}

fn decode_search_result_done(done: &[u8]) -> Result<(), DecodeError> {
    let mut done = BerReader::new(done);
    let result_code = done.read_enumerated()?;
    // matchedDN
    done.read_octet_string()?;
    let diagnostic_message = done.read_octet_string()?;
    if result_code != 0 {
        let message = (!diagnostic_message.is_empty())
            .then(|| String::from_utf8_lossy(diagnostic_message).into_owned());
        return Err(DecodeError::LdapResult {
            code: result_code,
            message,
        });
    }
    // referral is ignored
    Ok(())
}
