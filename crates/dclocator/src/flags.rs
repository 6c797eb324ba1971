//! DC locator request flags.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// The `DsGetDcName()` flags
    /// (<https://learn.microsoft.com/en-us/windows/win32/api/dsgetdc/nf-dsgetdc-dsgetdcnamew#parameters>).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DcFlags: u32 {
        const DS_FORCE_REDISCOVERY = 0x00000001;
        const DS_DIRECTORY_SERVICE_REQUIRED = 0x00000010;
        const DS_DIRECTORY_SERVICE_PREFERRED = 0x00000020;
        const DS_GC_SERVER_REQUIRED = 0x00000040;
        const DS_PDC_REQUIRED = 0x00000080;
        const DS_BACKGROUND_ONLY = 0x00000100;
        const DS_IP_REQUIRED = 0x00000200;
        const DS_KDC_REQUIRED = 0x00000400;
        const DS_TIMESERV_REQUIRED = 0x00000800;
        const DS_WRITABLE_REQUIRED = 0x00001000;
        const DS_GOOD_TIMESERV_PREFERRED = 0x00002000;
        const DS_AVOID_SELF = 0x00004000;
        const DS_ONLY_LDAP_NEEDED = 0x00008000;
        const DS_IS_FLAT_NAME = 0x00010000;
        const DS_IS_DNS_NAME = 0x00020000;
        const DS_TRY_NEXTCLOSEST_SITE = 0x00040000;
        const DS_DIRECTORY_SERVICE_6_REQUIRED = 0x00080000;
        const DS_WEB_SERVICE_REQUIRED = 0x00100000;
        const DS_DIRECTORY_SERVICE_8_REQUIRED = 0x00200000;
        const DS_DIRECTORY_SERVICE_9_REQUIRED = 0x00400000;
        const DS_DIRECTORY_SERVICE_10_REQUIRED = 0x00800000;
        // This one is not documented:
        // https://nettools.net/nltest-flags-what-does-0x20000-mean/
        const DS_KEY_LIST_SUPPORT_REQUIRED = 0x01000000;
        const DS_RETURN_DNS_NAME = 0x40000000;
        const DS_RETURN_FLAT_NAME = 0x80000000;
    }
}

impl fmt::Display for DcFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&netlogon::to_flags_string(self))
    }
}
