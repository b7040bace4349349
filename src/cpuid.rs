//! Raw CPUID access.
//!
//! Everything above this module talks to a [`CpuidSource`] rather than to the
//! instruction directly, so the decoders can be driven by captured or
//! fabricated register snapshots.

use core::cell::RefCell;

use arrayvec::ArrayVec;

pub use raw_cpuid::CpuIdResult;

/// Highest basic leaf and vendor string.
pub const LEAF_VENDOR: u32 = 0x0000_0000;
/// Processor info and feature bits.
pub const LEAF_FEATURES: u32 = 0x0000_0001;
/// Structured extended feature flags.
pub const LEAF_STRUCTURED_EXT: u32 = 0x0000_0007;

/// Hypervisor range base; `eax` is the highest hypervisor leaf.
pub const HYPERVISOR_LEAF_BASE: u32 = 0x4000_0000;
/// KVM paravirtualization features.
pub const LEAF_KVM_FEATURES: u32 = 0x4000_0001;

/// Extended range base; `eax` is the highest extended leaf.
pub const EXTENDED_LEAF_BASE: u32 = 0x8000_0000;
/// Extended processor info and feature bits.
pub const LEAF_EXT_FEATURES: u32 = 0x8000_0001;

/// Something that can execute CPUID for a leaf/subleaf pair.
pub trait CpuidSource {
    fn execute_leaf(&self, leaf: u32, subleaf: u32) -> CpuIdResult;
}

impl<S: CpuidSource + ?Sized> CpuidSource for &S {
    fn execute_leaf(&self, leaf: u32, subleaf: u32) -> CpuIdResult {
        (**self).execute_leaf(leaf, subleaf)
    }
}

/// The base leaf of the range `leaf` belongs to. Its `eax` output is the
/// highest leaf of that range the processor implements.
pub const fn range_base(leaf: u32) -> u32 {
    if leaf >= EXTENDED_LEAF_BASE {
        EXTENDED_LEAF_BASE
    } else if leaf >= HYPERVISOR_LEAF_BASE {
        HYPERVISOR_LEAF_BASE
    } else {
        LEAF_VENDOR
    }
}

/// Highest implemented leaf of the range containing `leaf`.
pub fn max_leaf<S: CpuidSource + ?Sized>(src: &S, leaf: u32) -> u32 {
    src.execute_leaf(range_base(leaf), 0).eax
}

/// The real instruction.
#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeCpuid;

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
impl CpuidSource for NativeCpuid {
    #[inline]
    #[allow(unused_unsafe)]
    fn execute_leaf(&self, leaf: u32, subleaf: u32) -> CpuIdResult {
        // FIXME: i686 parts without CPUID would fault here; check EFLAGS.ID first.
        #[cfg(target_arch = "x86")]
        let result = unsafe { core::arch::x86::__cpuid_count(leaf, subleaf) };
        #[cfg(target_arch = "x86_64")]
        let result = unsafe { core::arch::x86_64::__cpuid_count(leaf, subleaf) };
        CpuIdResult {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
            edx: result.edx,
        }
    }
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn cpuid() -> NativeCpuid {
    NativeCpuid
}

const CACHE_CAPACITY: usize = 8;

/// Memoizes snapshots by their full `(leaf, subleaf)` key for the duration
/// of one detection pass. Once full, further leaves pass straight through.
pub struct CachedCpuid<S> {
    inner: S,
    entries: RefCell<ArrayVec<(u32, u32, CpuIdResult), CACHE_CAPACITY>>,
}

impl<S: CpuidSource> CachedCpuid<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            entries: RefCell::new(ArrayVec::new()),
        }
    }
}

impl<S: CpuidSource> CpuidSource for CachedCpuid<S> {
    fn execute_leaf(&self, leaf: u32, subleaf: u32) -> CpuIdResult {
        if let Some(&(_, _, result)) = self
            .entries
            .borrow()
            .iter()
            .find(|&&(l, s, _)| l == leaf && s == subleaf)
        {
            return result;
        }
        let result = self.inner.execute_leaf(leaf, subleaf);
        // A full cache only costs repeated instructions.
        let _ = self.entries.borrow_mut().try_push((leaf, subleaf, result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{regs, FakeCpuid};

    #[test]
    fn range_base_selects_range() {
        assert_eq!(range_base(0x7), LEAF_VENDOR);
        assert_eq!(range_base(LEAF_KVM_FEATURES), HYPERVISOR_LEAF_BASE);
        assert_eq!(range_base(LEAF_EXT_FEATURES), EXTENDED_LEAF_BASE);
        assert_eq!(range_base(EXTENDED_LEAF_BASE), EXTENDED_LEAF_BASE);
    }

    #[test]
    fn cache_executes_each_key_once() {
        let fake = FakeCpuid::new()
            .leaf(LEAF_VENDOR, 0, regs(7, 0, 0, 0))
            .leaf(LEAF_STRUCTURED_EXT, 0, regs(0, 1, 0, 0))
            .leaf(LEAF_STRUCTURED_EXT, 1, regs(0, 2, 0, 0));
        let cached = CachedCpuid::new(&fake);

        assert_eq!(cached.execute_leaf(LEAF_STRUCTURED_EXT, 0).ebx, 1);
        assert_eq!(cached.execute_leaf(LEAF_STRUCTURED_EXT, 1).ebx, 2);
        assert_eq!(cached.execute_leaf(LEAF_STRUCTURED_EXT, 0).ebx, 1);
        assert_eq!(max_leaf(&cached, LEAF_STRUCTURED_EXT), 7);
        assert_eq!(max_leaf(&cached, LEAF_FEATURES), 7);

        assert_eq!(fake.calls(), [(7, 0), (7, 1), (0, 0)]);
    }

    #[test]
    fn full_cache_passes_through() {
        let fake = FakeCpuid::new();
        let cached = CachedCpuid::new(&fake);
        for leaf in 0..(CACHE_CAPACITY as u32 + 2) {
            cached.execute_leaf(leaf, 0);
        }
        // Cached leaves are not executed again.
        cached.execute_leaf(0, 0);
        assert_eq!(fake.calls().len(), CACHE_CAPACITY + 2);

        let last = CACHE_CAPACITY as u32 + 1;
        cached.execute_leaf(last, 0);
        assert_eq!(fake.calls().iter().filter(|&&(l, _)| l == last).count(), 2);
    }

    #[cfg(all(feature = "native", target_arch = "x86_64"))]
    #[test]
    fn native_matches_raw_cpuid() {
        let ours = cpuid().execute_leaf(LEAF_VENDOR, 0);
        let theirs = raw_cpuid::native_cpuid::cpuid_count(LEAF_VENDOR, 0);
        assert_eq!(
            (ours.eax, ours.ebx, ours.ecx, ours.edx),
            (theirs.eax, theirs.ebx, theirs.ecx, theirs.edx)
        );
    }
}
