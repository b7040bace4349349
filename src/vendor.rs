use core::fmt;

use crate::cpuid::{CpuIdResult, CpuidSource, LEAF_VENDOR};

pub const AMD_VENDOR: &[u8; 12] = b"AuthenticAMD";
pub const INTEL_VENDOR: &[u8; 12] = b"GenuineIntel";

/// The 12-byte manufacturer id from leaf 0 (`ebx`, `edx`, `ecx`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorString([u8; 12]);

impl VendorString {
    pub fn read<S: CpuidSource + ?Sized>(src: &S) -> Self {
        Self::from_registers(&src.execute_leaf(LEAF_VENDOR, 0))
    }

    pub fn from_registers(result: &CpuIdResult) -> Self {
        let mut bytes = [0; 12];
        for (chunk, reg) in bytes.chunks_exact_mut(4).zip([result.ebx, result.edx, result.ecx]) {
            chunk.copy_from_slice(&reg.to_le_bytes());
        }
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// `None` if the processor returned something that isn't UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.0).ok()
    }

    pub fn is_amd(&self) -> bool {
        &self.0 == AMD_VENDOR
    }

    pub fn is_intel(&self) -> bool {
        &self.0 == INTEL_VENDOR
    }
}

impl fmt::Debug for VendorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "{:?}", s),
            None => write!(f, "{:x?}", self.0),
        }
    }
}

impl fmt::Display for VendorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("<invalid>"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vendor {
    Amd,
    Intel,
    Unknown,
}

impl Vendor {
    pub fn read<S: CpuidSource + ?Sized>(src: &S) -> Self {
        Self::from(VendorString::read(src))
    }
}

impl From<VendorString> for Vendor {
    fn from(vendor: VendorString) -> Self {
        if vendor.is_amd() {
            Vendor::Amd
        } else if vendor.is_intel() {
            Vendor::Intel
        } else {
            Vendor::Unknown
        }
    }
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn vendor_string() -> VendorString {
    VendorString::read(&crate::cpuid::cpuid())
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn is_amd_cpu() -> bool {
    vendor_string().is_amd()
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn is_intel_cpu() -> bool {
    vendor_string().is_intel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{vendor_regs, FakeCpuid};

    fn fake(vendor: &[u8; 12]) -> FakeCpuid {
        FakeCpuid::new().leaf(LEAF_VENDOR, 0, vendor_regs(0xd, vendor))
    }

    #[test]
    fn register_order_is_ebx_edx_ecx() {
        // Leaf 0 of an Intel part, as captured.
        let result = CpuIdResult {
            eax: 0xd,
            ebx: 0x756e_6547,
            ecx: 0x6c65_746e,
            edx: 0x4965_6e69,
        };
        let vendor = VendorString::from_registers(&result);
        assert_eq!(vendor.as_bytes(), b"GenuineIntel");
        assert_eq!(vendor.as_str(), Some("GenuineIntel"));
    }

    #[test]
    fn known_vendors_are_exclusive() {
        let amd = VendorString::read(&fake(b"AuthenticAMD"));
        assert!(amd.is_amd() && !amd.is_intel());
        assert_eq!(Vendor::read(&fake(b"AuthenticAMD")), Vendor::Amd);

        let intel = VendorString::read(&fake(b"GenuineIntel"));
        assert!(intel.is_intel() && !intel.is_amd());
        assert_eq!(Vendor::read(&fake(b"GenuineIntel")), Vendor::Intel);

        let bogus = VendorString::read(&fake(b"BogusVendorX"));
        assert!(!bogus.is_amd() && !bogus.is_intel());
        assert_eq!(Vendor::from(bogus), Vendor::Unknown);
    }

    #[test]
    fn reads_only_leaf_zero() {
        let src = fake(b"AuthenticAMD");
        VendorString::read(&src);
        assert_eq!(src.calls(), [(LEAF_VENDOR, 0)]);
    }

    #[test]
    fn non_utf8_vendor() {
        let mut raw = *b"GenuineIntel";
        raw[3] = 0xff;
        let vendor = VendorString::read(&fake(&raw));
        assert_eq!(vendor.as_str(), None);
        assert!(!vendor.is_intel());
        assert_eq!(alloc::format!("{}", vendor), "<invalid>");
    }

    #[cfg(all(feature = "native", target_arch = "x86_64"))]
    #[test]
    fn native_vendor_matches_raw_cpuid() {
        let expected = raw_cpuid::CpuId::new()
            .get_vendor_info()
            .expect("leaf 0 is always present");
        assert_eq!(vendor_string().as_str(), Some(expected.as_str()));
        assert!(!(is_amd_cpu() && is_intel_cpu()));
    }
}
