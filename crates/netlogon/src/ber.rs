//! Minimal BER support for the LDAP ping message exchange.
//!
//! Only the subset of X.690 needed for an anonymous LDAPv3 SearchRequest and
//! its result stream is implemented: single-byte tags, definite lengths
//! (short and long form) and primitive INTEGER/ENUMERATED/OCTET STRING
//! contents. Indefinite lengths and multi-byte tags never occur in Active
//! Directory LDAP pings and are rejected.

use crate::error::DecodeError;

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0A;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

pub const TAG_CLASS_CONSTRUCTED: u8 = 0x20;
pub const TAG_CLASS_APPLICATION: u8 = 0x40;
pub const TAG_CLASS_CONTEXT_SPECIFIC: u8 = 0x80;

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let bytes = &bytes[skip..];
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(bytes);
    }
}

/// Writes a single tag-length-value element.
pub fn write_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + content.len());
    out.push(tag);
    write_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

/// Writes a constructed element with the given tag around the concatenation
/// of `parts`.
pub fn write_constructed(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let content_len = parts.iter().map(|p| p.len()).sum();
    let mut content = Vec::with_capacity(content_len);
    for part in parts {
        content.extend_from_slice(part);
    }
    write_tlv(tag, &content)
}

pub fn write_sequence(parts: &[&[u8]]) -> Vec<u8> {
    write_constructed(TAG_SEQUENCE, parts)
}

pub fn write_octet_string(bytes: &[u8]) -> Vec<u8> {
    write_tlv(TAG_OCTET_STRING, bytes)
}

/// Writes an INTEGER with minimal two's-complement content.
pub fn write_integer(value: i32) -> Vec<u8> {
    write_tlv(TAG_INTEGER, &minimal_int_bytes(value))
}

pub fn write_enumerated(value: i32) -> Vec<u8> {
    write_tlv(TAG_ENUMERATED, &minimal_int_bytes(value))
}

pub fn write_boolean(value: bool) -> Vec<u8> {
    write_tlv(TAG_BOOLEAN, &[if value { 0xFF } else { 0x00 }])
}

fn minimal_int_bytes(value: i32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 3 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// A cursor over a BER-encoded buffer.
pub struct BerReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let have = self.buf.len() - self.pos;
        if n > have {
            return Err(DecodeError::BufferUnderflow { needed: n, have });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_length(&mut self) -> Result<usize, DecodeError> {
        let first = self.take(1)?[0];
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        // 0x80 would be an indefinite length, unsupported in LDAP
        if count == 0 || count > std::mem::size_of::<usize>() {
            return Err(DecodeError::InvalidLength);
        }
        let mut len = 0usize;
        for byte in self.take(count)? {
            len = len << 8 | *byte as usize;
        }
        Ok(len)
    }

    /// Reads the next element and returns its tag and content bytes.
    pub fn read_element(&mut self) -> Result<(u8, &'a [u8]), DecodeError> {
        let tag = self.take(1)?[0];
        let len = self.read_length()?;
        let content = self.take(len)?;
        Ok((tag, content))
    }

    /// Reads the next element, requiring an exact tag.
    pub fn expect_element(&mut self, expected: u8) -> Result<&'a [u8], DecodeError> {
        let (tag, content) = self.read_element()?;
        if tag != expected {
            return Err(DecodeError::UnexpectedTag { expected, got: tag });
        }
        Ok(content)
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8], DecodeError> {
        self.expect_element(TAG_OCTET_STRING)
    }

    pub fn read_integer(&mut self) -> Result<i64, DecodeError> {
        let content = self.expect_element(TAG_INTEGER)?;
        parse_int(content)
    }

    pub fn read_enumerated(&mut self) -> Result<i64, DecodeError> {
        let content = self.expect_element(TAG_ENUMERATED)?;
        parse_int(content)
    }
}

fn parse_int(content: &[u8]) -> Result<i64, DecodeError> {
    if content.is_empty() || content.len() > 8 {
        return Err(DecodeError::IntegerTooLarge(content.len()));
    }
    let mut value = if content[0] & 0x80 != 0 { -1i64 } else { 0 };
    for byte in content {
        value = value << 8 | *byte as i64;
    }
    Ok(value)
}
