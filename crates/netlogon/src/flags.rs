//! Bit-flag enumerations shared by the LDAP ping wire format.
//!
//! All of these are transmitted as little-endian 32-bit masks. The string
//! form of a flag set is the enumerator names joined with `|` in declaration
//! order, e.g. `V1|V5EX|VCS`.

use std::fmt;

use bitflags::{bitflags, Flags};
use thiserror::Error;

bitflags! {
    /// `NETLOGON_NT_VERSION` bits as sent in the `NtVer` filter value and
    /// echoed in the trailing `NtVersion` field of every response variant
    /// (MS-ADTS 6.3.1.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NetlogonNtVersion: u32 {
        const V1 = 0x00000001;
        const V5 = 0x00000002;
        const V5EX = 0x00000004;
        const V5EP = 0x00000008;
        const VCS = 0x00000010;
        const VNT4 = 0x01000000;
        const VPDC = 0x10000000;
        const VIP = 0x20000000;
        const VL = 0x40000000;
        const VGC = 0x80000000;
    }
}

bitflags! {
    /// DS capability bits reported by a domain controller in the `Flags`
    /// field of a Netlogon SAM Logon response (MS-ADTS 6.3.1.2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DsFlags: u32 {
        const FP = 0x00000001;
        const FG = 0x00000004;
        const FL = 0x00000008;
        const FD = 0x00000010;
        const FK = 0x00000020;
        const FT = 0x00000040;
        const FC = 0x00000080;
        const FW = 0x00000100;
        const FGT = 0x00000200;
        const FN = 0x00000400;
        const FSS = 0x00000800;
        const FFS = 0x00001000;
        const FWS = 0x00002000;
        const FW8 = 0x00004000;
        const FW9 = 0x00008000;
        const FW10 = 0x00010000;
        const FKL = 0x00020000;
        const FDNS = 0x20000000;
        const FDM = 0x40000000;
        const FF = 0x80000000;
    }
}

impl NetlogonNtVersion {
    const FULL_NAMES: &'static [(NetlogonNtVersion, &'static str)] = &[
        (Self::V1, "NETLOGON_NT_VERSION_1"),
        (Self::V5, "NETLOGON_NT_VERSION_5"),
        (Self::V5EX, "NETLOGON_NT_VERSION_5EX"),
        (Self::V5EP, "NETLOGON_NT_VERSION_5EX_WITH_IP"),
        (Self::VCS, "NETLOGON_NT_VERSION_WITH_CLOSEST_SITE"),
        (Self::VNT4, "NETLOGON_NT_VERSION_AVOID_NT4EMUL"),
        (Self::VPDC, "NETLOGON_NT_VERSION_PDC"),
        (Self::VIP, "NETLOGON_NT_VERSION_IP"),
        (Self::VL, "NETLOGON_NT_VERSION_LOCAL"),
        (Self::VGC, "NETLOGON_NT_VERSION_GC"),
    ];

    /// The documented long name of a single flag, e.g.
    /// `NETLOGON_NT_VERSION_5EX` for [`NetlogonNtVersion::V5EX`].
    pub fn full_name(self) -> Option<&'static str> {
        Self::FULL_NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }
}

impl DsFlags {
    const FULL_NAMES: &'static [(DsFlags, &'static str)] = &[
        (Self::FP, "DS_PDC_FLAG"),
        (Self::FG, "DS_GC_FLAG"),
        (Self::FL, "DS_LDAP_FLAG"),
        (Self::FD, "DS_DS_FLAG"),
        (Self::FK, "DS_KDC_FLAG"),
        (Self::FT, "DS_TIMESERV_FLAG"),
        (Self::FC, "DS_CLOSEST_FLAG"),
        (Self::FW, "DS_WRITABLE_FLAG"),
        (Self::FGT, "DS_GOOD_TIMESERV_FLAG"),
        (Self::FN, "DS_NDNC_FLAG"),
        (Self::FSS, "DS_SELECT_SECRET_DOMAIN_6_FLAG"),
        (Self::FFS, "DS_FULL_SECRET_DOMAIN_6_FLAG"),
        (Self::FWS, "DS_WS_FLAG"),
        (Self::FW8, "DS_DS_8_FLAG"),
        (Self::FW9, "DS_DS_9_FLAG"),
        (Self::FW10, "DS_DS_10_FLAG"),
        (Self::FKL, "DS_KEY_LIST_FLAG"),
        (Self::FDNS, "DS_DNS_CONTROLLER_FLAG"),
        (Self::FDM, "DS_DNS_DOMAIN_FLAG"),
        (Self::FF, "DS_DNS_FOREST_FLAG"),
    ];

    /// The documented long name of a single flag, e.g. `DS_PDC_FLAG` for
    /// [`DsFlags::FP`].
    pub fn full_name(self) -> Option<&'static str> {
        Self::FULL_NAMES
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for NetlogonNtVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_flags_string(self))
    }
}

impl fmt::Display for DsFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_flags_string(self))
    }
}

/// A flag token which does not name any enumerator of the target flag set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid flag: '{0}'")]
pub struct InvalidFlagError(pub String);

/// Renders a flag set as its canonical pipe-delimited string, enumerator
/// names in declaration order. The empty set renders as the empty string.
pub fn to_flags_string<F: Flags>(flags: &F) -> String {
    flags
        .iter_names()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join("|")
}

/// Parses a pipe-delimited flag string. Parsing is strict: any token which is
/// not an enumerator name fails. Blank input yields the empty set.
pub fn from_flags_string<F: Flags>(s: &str) -> Result<F, InvalidFlagError> {
    let mut flags = F::empty();
    for token in s.split('|').map(str::trim).filter(|t| !t.is_empty()) {
        let flag = F::from_name(token).ok_or_else(|| InvalidFlagError(token.to_owned()))?;
        flags.insert(flag);
    }
    Ok(flags)
}

/// Operation codes of the Netlogon SAM Logon response variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// `LOGON_SAM_LOGON_RESPONSE`, shared by the NT 4.0 and version 5
    /// structures
    LogonSamLogonResponse = 19,
    /// `LOGON_SAM_LOGON_RESPONSE_EX`
    LogonSamLogonResponseEx = 23,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Result<Self, crate::error::DecodeError> {
        match value {
            19 => Ok(Self::LogonSamLogonResponse),
            23 => Ok(Self::LogonSamLogonResponseEx),
            other => Err(crate::error::DecodeError::InvalidOpcode(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogonSamLogonResponse => f.write_str("LOGON_SAM_LOGON_RESPONSE"),
            Self::LogonSamLogonResponseEx => f.write_str("LOGON_SAM_LOGON_RESPONSE_EX"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_string_roundtrip() {
        let flags = NetlogonNtVersion::V1 | NetlogonNtVersion::V5EX | NetlogonNtVersion::VGC;
        let s = to_flags_string(&flags);
        assert_eq!(s, "V1|V5EX|VGC");
        assert_eq!(from_flags_string::<NetlogonNtVersion>(&s).unwrap(), flags);
    }

    #[test]
    fn test_flags_string_declaration_order() {
        // Insertion order must not leak into the output.
        let mut flags = DsFlags::FF;
        flags.insert(DsFlags::FP);
        flags.insert(DsFlags::FK);
        assert_eq!(to_flags_string(&flags), "FP|FK|FF");
    }

    #[test]
    fn test_empty_flags_string() {
        assert_eq!(to_flags_string(&DsFlags::empty()), "");
        assert_eq!(
            from_flags_string::<DsFlags>("").unwrap(),
            DsFlags::empty()
        );
    }

    #[test]
    fn test_unknown_flag_token() {
        let err = from_flags_string::<DsFlags>("FP|NOPE").unwrap_err();
        assert_eq!(err, InvalidFlagError("NOPE".to_owned()));
    }

    #[test]
    fn test_bits_roundtrip() {
        for bits in [0x1u32, 0x5, 0x1D, 0x8000_0005] {
            let flags = NetlogonNtVersion::from_bits_truncate(bits);
            assert_eq!(flags.bits(), bits);
        }
        // Unrelated bits never survive the conversion.
        let flags = DsFlags::from_bits_truncate(0x0000_0031 | 0x0C00_0000);
        assert_eq!(flags, DsFlags::FP | DsFlags::FD | DsFlags::FK);
    }

    #[test]
    fn test_full_names() {
        assert_eq!(DsFlags::FP.full_name(), Some("DS_PDC_FLAG"));
        assert_eq!(
            NetlogonNtVersion::V5EP.full_name(),
            Some("NETLOGON_NT_VERSION_5EX_WITH_IP")
        );
        assert_eq!((DsFlags::FP | DsFlags::FG).full_name(), None);
    }

    #[test]
    fn test_opcode() {
        assert_eq!(Opcode::from_u16(19).unwrap(), Opcode::LogonSamLogonResponse);
        assert_eq!(
            Opcode::from_u16(23).unwrap(),
            Opcode::LogonSamLogonResponseEx
        );
        assert!(Opcode::from_u16(42).is_err());
    }
}
