//! KVM paravirtualization features (leaf 0x4000_0001).
//!
//! See <https://www.kernel.org/doc/html/latest/virt/kvm/x86/cpuid.html>.

use crate::cpuid::{CpuidSource, HYPERVISOR_LEAF_BASE, LEAF_KVM_FEATURES};

pub const KVM_FEATURE_CLOCKSOURCE: u32 = 0;
pub const KVM_FEATURE_NOP_IO_DELAY: u32 = 1;
/// Deprecated.
pub const KVM_FEATURE_MMU_OP: u32 = 2;
pub const KVM_FEATURE_CLOCKSOURCE2: u32 = 3;
pub const KVM_FEATURE_ASYNC_PF: u32 = 4;
pub const KVM_FEATURE_STEAL_TIME: u32 = 5;
pub const KVM_FEATURE_PV_EOI: u32 = 6;
pub const KVM_FEATURE_PV_UNHALT: u32 = 7;
pub const KVM_FEATURE_CLOCKSOURCE_STABLE_BIT: u32 = 24;

/// Bits above this one are reserved and always read as absent.
pub const KVM_FEATURE_MAX_BIT: u32 = KVM_FEATURE_CLOCKSOURCE_STABLE_BIT;

pub const KVM_SIGNATURE: &[u8; 12] = b"KVMKVMKVM\0\0\0";

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct KvmFeatureBits: u32 {
        const CLOCKSOURCE = 1 << KVM_FEATURE_CLOCKSOURCE;
        const NOP_IO_DELAY = 1 << KVM_FEATURE_NOP_IO_DELAY;
        const MMU_OP = 1 << KVM_FEATURE_MMU_OP;
        const CLOCKSOURCE2 = 1 << KVM_FEATURE_CLOCKSOURCE2;
        const ASYNC_PF = 1 << KVM_FEATURE_ASYNC_PF;
        const STEAL_TIME = 1 << KVM_FEATURE_STEAL_TIME;
        const PV_EOI = 1 << KVM_FEATURE_PV_EOI;
        const PV_UNHALT = 1 << KVM_FEATURE_PV_UNHALT;
        const PV_TLB_FLUSH = 1 << 9;
        const ASYNC_PF_VMEXIT = 1 << 10;
        const PV_SEND_IPI = 1 << 11;
        const POLL_CONTROL = 1 << 12;
        const PV_SCHED_YIELD = 1 << 13;
        const ASYNC_PF_INT = 1 << 14;
        const MSI_EXT_DEST_ID = 1 << 15;
        const HC_MAP_GPA_RANGE = 1 << 16;
        const MIGRATION_CONTROL = 1 << 17;
        const CLOCKSOURCE_STABLE = 1 << KVM_FEATURE_CLOCKSOURCE_STABLE_BIT;
    }
}

/// `eax` of leaf 0x4000_0001 with reserved bits cleared. A host that does not
/// expose the leaf typically reads as zero, which is simply no features.
pub fn kvm_features_in<S: CpuidSource + ?Sized>(src: &S) -> KvmFeatureBits {
    let eax = src.execute_leaf(LEAF_KVM_FEATURES, 0).eax;
    KvmFeatureBits::from_bits_retain(eax & reserved_mask())
}

const fn reserved_mask() -> u32 {
    (1 << (KVM_FEATURE_MAX_BIT + 1)) - 1
}

pub fn kvm_feature_in<S: CpuidSource + ?Sized>(src: &S, bit_id: u32) -> bool {
    if bit_id > KVM_FEATURE_MAX_BIT {
        return false;
    }
    kvm_features_in(src).bits() & (1 << bit_id) != 0
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn kvm_feature(bit_id: u32) -> bool {
    kvm_feature_in(&crate::cpuid::cpuid(), bit_id)
}

/// Hypervisor vendor signature from leaf 0x4000_0000 (`ebx`, `ecx`, `edx`).
pub fn hypervisor_signature<S: CpuidSource + ?Sized>(src: &S) -> [u8; 12] {
    let res = src.execute_leaf(HYPERVISOR_LEAF_BASE, 0);
    let mut signature = [0; 12];
    for (chunk, reg) in signature.chunks_exact_mut(4).zip([res.ebx, res.ecx, res.edx]) {
        chunk.copy_from_slice(&reg.to_le_bytes());
    }
    signature
}

/// A KVM host that advertises the paravirtualization feature leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KvmSupport {
    pub max_leaf: u32,
    pub features: KvmFeatureBits,
}

impl KvmSupport {
    /// Unlike [`kvm_feature_in`], checks the KVM signature and the hypervisor
    /// max leaf before reading 0x4000_0001.
    pub fn detect<S: CpuidSource + ?Sized>(src: &S) -> Option<Self> {
        if &hypervisor_signature(src) != KVM_SIGNATURE {
            return None;
        }
        let max_leaf = src.execute_leaf(HYPERVISOR_LEAF_BASE, 0).eax;
        if max_leaf < LEAF_KVM_FEATURES {
            return None;
        }
        let features = kvm_features_in(src);

        log::info!("Detected KVM paravirtualization support, features {:?}", features);

        Some(KvmSupport { max_leaf, features })
    }

    pub fn has(&self, features: KvmFeatureBits) -> bool {
        self.features.contains(features)
    }
}
