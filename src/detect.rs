//! Boot-time detection of every registered feature.

use alloc::vec::Vec;

#[cfg(any(test, all(feature = "native", any(target_arch = "x86", target_arch = "x86_64"))))]
use spin::Once;

use crate::cpuid::{CachedCpuid, CpuidSource};
use crate::decode::probe;
use crate::feature::{CpuFeature, FeatureSet};
use crate::vendor::VendorString;

/// Features present on this processor, plus its vendor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectedFeatures {
    vendor: VendorString,
    features: FeatureSet,
}

impl DetectedFeatures {
    /// Runs the decoder over the whole registry. Each distinct leaf is
    /// executed once per pass.
    pub fn detect<S: CpuidSource>(src: S) -> Self {
        let src = CachedCpuid::new(src);
        let vendor = VendorString::read(&src);
        let features = CpuFeature::ALL
            .iter()
            .copied()
            .filter(|&feature| probe(&src, feature).is_present())
            .collect();
        Self { vendor, features }
    }

    pub fn vendor(&self) -> VendorString {
        self.vendor
    }

    pub fn set(&self) -> FeatureSet {
        self.features
    }

    pub fn has(&self, feature: CpuFeature) -> bool {
        self.features.contains(feature)
    }

    /// Present features in registry order.
    pub fn iter(&self) -> impl Iterator<Item = CpuFeature> + '_ {
        self.features.iter()
    }

    pub fn features(&self) -> Vec<CpuFeature> {
        self.iter().collect()
    }

    /// Display names of [`Self::features`], index for index.
    pub fn names(&self) -> Vec<&'static str> {
        self.features().into_iter().map(CpuFeature::name).collect()
    }
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
static DETECTED: Once<DetectedFeatures> = Once::new();

/// Detects features on the running processor. Meant to be called once on
/// the boot processor before anything else looks at features; later calls
/// return the first result.
#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn init() -> &'static DetectedFeatures {
    init_in(&DETECTED, crate::cpuid::cpuid())
}

/// Fills `slot` from `src` unless it is already filled. Only the first
/// source ever used is consulted.
#[cfg(any(test, all(feature = "native", any(target_arch = "x86", target_arch = "x86_64"))))]
fn init_in<S: CpuidSource>(slot: &Once<DetectedFeatures>, src: S) -> &DetectedFeatures {
    slot.call_once(|| {
        let detected = DetectedFeatures::detect(src);
        log::info!(
            "cpu: {} with {} features: {:?}",
            detected.vendor(),
            detected.set().len(),
            detected.set()
        );
        detected
    })
}

/// The boot-time result, if [`init`] has run.
#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn get() -> Option<&'static DetectedFeatures> {
    DETECTED.get()
}

/// The boot-time result, detecting on first use.
#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn detected() -> &'static DetectedFeatures {
    init()
}

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn detect_features() -> Vec<CpuFeature> {
    detected().features()
}

/// Names of [`detect_features`], in the same order.
#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub fn detect_features_str() -> Vec<&'static str> {
    detect_features().into_iter().map(CpuFeature::name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuid::{
        LEAF_EXT_FEATURES, LEAF_FEATURES, LEAF_STRUCTURED_EXT, LEAF_VENDOR,
    };
    use crate::decode::has_feature_in;
    use crate::tests::{regs, vendor_regs, FakeCpuid};

    fn ryzen_like() -> FakeCpuid {
        FakeCpuid::with_max_leaves(LEAF_STRUCTURED_EXT, LEAF_EXT_FEATURES)
            .leaf(LEAF_VENDOR, 0, vendor_regs(0x10, b"AuthenticAMD"))
            // SSE3, SSSE3, AVX; FPU, TSC, SSE, SSE2
            .leaf(
                LEAF_FEATURES,
                0,
                regs(0, 0, (1 << 0) | (1 << 9) | (1 << 28), (1 << 0) | (1 << 4) | (1 << 25) | (1 << 26)),
            )
            // BMI1, AVX2; UMIP
            .leaf(LEAF_STRUCTURED_EXT, 0, regs(0, (1 << 3) | (1 << 5), 1 << 2, 0))
            // SVM; NX, LM
            .leaf(LEAF_EXT_FEATURES, 0, regs(0, 0, 1 << 2, (1 << 20) | (1 << 29)))
    }

    #[test]
    fn detects_in_registry_order() {
        let detected = DetectedFeatures::detect(&ryzen_like());
        assert_eq!(
            detected.features(),
            [
                CpuFeature::Sse3,
                CpuFeature::Ssse3,
                CpuFeature::Avx,
                CpuFeature::Fpu,
                CpuFeature::Tsc,
                CpuFeature::Sse,
                CpuFeature::Sse2,
                CpuFeature::Nx,
                CpuFeature::Lm,
                CpuFeature::Svm,
                CpuFeature::Avx2,
                CpuFeature::Bmi1,
                CpuFeature::Umip,
            ]
        );
        assert!(detected.vendor().is_amd());
    }

    #[test]
    fn names_follow_features() {
        let detected = DetectedFeatures::detect(&ryzen_like());
        let features = detected.features();
        let names = detected.names();
        assert_eq!(features.len(), names.len());
        for (feature, name) in features.iter().zip(&names) {
            assert_eq!(feature.name(), *name);
        }
        assert_eq!(&names[..3], ["SSE3", "SSSE3", "AVX"]);
    }

    #[test]
    fn matches_single_queries() {
        let fake = ryzen_like();
        let detected = DetectedFeatures::detect(&fake);
        for &feature in CpuFeature::ALL {
            assert_eq!(detected.has(feature), has_feature_in(&fake, feature), "{}", feature);
        }
    }

    #[test]
    fn each_leaf_executed_once() {
        let fake = ryzen_like();
        DetectedFeatures::detect(&fake);
        let mut calls = fake.calls();
        let total = calls.len();
        calls.sort_unstable();
        calls.dedup();
        assert_eq!(calls.len(), total);
        assert!(calls.len() <= 5);
    }

    #[test]
    fn old_processor_has_no_extended_features() {
        // Basic leaves up to 1, no extended range at all.
        let fake = FakeCpuid::with_max_leaves(LEAF_FEATURES, 0)
            .leaf(LEAF_FEATURES, 0, regs(0, 0, 0, 1 << 0))
            .leaf(LEAF_EXT_FEATURES, 0, regs(!0, !0, !0, !0));
        let detected = DetectedFeatures::detect(&fake);
        assert_eq!(detected.features(), [CpuFeature::Fpu]);
        assert!(fake.calls().iter().all(|&(leaf, _)| leaf != LEAF_EXT_FEATURES));
    }

    #[test]
    fn slot_is_filled_once() {
        let slot = Once::new();
        let first = init_in(&slot, ryzen_like());
        let second = init_in(&slot, FakeCpuid::new());
        assert!(core::ptr::eq(first, second));
        assert!(second.has(CpuFeature::Svm));
        assert_eq!(slot.get().map(|d| d.features()), Some(first.features()));
    }

    #[cfg(all(feature = "native", target_arch = "x86_64"))]
    #[test]
    fn native_lists_are_consistent() {
        let features = detect_features();
        let names = detect_features_str();
        assert_eq!(features.len(), names.len());
        for (feature, name) in features.iter().zip(&names) {
            assert_eq!(crate::feature::feature_name(*feature), *name);
        }
        assert!(features.contains(&CpuFeature::Sse2));
        assert!(features.contains(&CpuFeature::Lm));
    }

    #[cfg(all(feature = "native", target_arch = "x86_64"))]
    #[test]
    fn native_global_matches_single_queries() {
        let features = detect_features();
        for &feature in CpuFeature::ALL {
            assert_eq!(
                features.contains(&feature),
                crate::decode::has_feature(feature),
                "{}",
                feature
            );
        }
        assert_eq!(get().map(|d| d.features()), Some(features));
    }
}
