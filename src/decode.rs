//! Evaluates a single feature against CPUID output.

use crate::cpuid::{max_leaf, CpuidSource};
use crate::feature::CpuFeature;

/// Outcome of decoding one feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    Present,
    Absent,
    /// The processor does not implement the leaf that encodes the feature.
    /// The leaf was not executed.
    UnsupportedLeaf,
}

impl Probe {
    pub const fn is_present(self) -> bool {
        matches!(self, Probe::Present)
    }
}

/// Decode `feature` using `src`.
///
/// The highest leaf of the descriptor's range is read on every call, right
/// before the leaf itself. Stale or undefined output from unimplemented leaves
/// is never looked at.
pub fn probe<S: CpuidSource + ?Sized>(src: &S, feature: CpuFeature) -> Probe {
    let descriptor = feature.descriptor();

    let max = max_leaf(src, descriptor.leaf);
    if descriptor.leaf > max {
        log::trace!(
            "cpuid leaf {:#x} above max {:#x}, {} unavailable",
            descriptor.leaf,
            max,
            feature
        );
        return Probe::UnsupportedLeaf;
    }

    let result = src.execute_leaf(descriptor.leaf, descriptor.ecx_input());
    if descriptor.test(&result) {
        Probe::Present
    } else {
        Probe::Absent
    }
}

pub fn has_feature_in<S: CpuidSource + ?Sized>(src: &S, feature: CpuFeature) -> bool {
    probe(src, feature).is_present()
}

/// Whether the running processor has `feature`.
#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn has_feature(feature: CpuFeature) -> bool {
    has_feature_in(&crate::cpuid::cpuid(), feature)
}
