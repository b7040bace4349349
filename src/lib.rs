//! # CPU feature detection
//!
//! Decodes CPUID output into a closed set of typed features, identifies the
//! processor vendor and queries KVM paravirtualization bits. Meant to run once
//! on the boot processor; the result is immutable afterwards.
//!
//! The decoders work against any [`CpuidSource`], so captured or fabricated
//! register snapshots can stand in for the instruction.

// This is usually a serious issue - a missing import of a define where it is interpreted
// as a catch-all variable in a match, for example
#![deny(unreachable_patterns)]
// Ensure that all must_use results are used
#![deny(unused_must_use)]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(feature = "x86_kvm_pv")]
#[macro_use]
extern crate bitflags;

/// Raw CPUID access
pub mod cpuid;

/// Single-feature decoding
pub mod decode;

/// Boot-time aggregate detection
pub mod detect;

/// Feature registry
pub mod feature;

/// KVM paravirtualization features
#[cfg(feature = "x86_kvm_pv")]
pub mod kvm;

/// Vendor identification
pub mod vendor;


pub use crate::cpuid::{CachedCpuid, CpuIdResult, CpuidSource};
pub use crate::decode::{has_feature_in, probe, Probe};
pub use crate::detect::DetectedFeatures;
pub use crate::feature::{
    feature_name, CpuFeature, FeatureEntry, FeatureError, FeatureSet, LeafDescriptor, Register,
    FEATURE_TABLE,
};
pub use crate::vendor::{Vendor, VendorString};

#[cfg(all(feature = "native", any(target_arch = "x86", target_arch = "x86_64")))]
pub use crate::{
    cpuid::{cpuid, NativeCpuid},
    decode::has_feature,
    detect::{detect_features, detect_features_str, detected, init},
    vendor::{is_amd_cpu, is_intel_cpu, vendor_string},
};

#[cfg(all(
    feature = "x86_kvm_pv",
    feature = "native",
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub use crate::kvm::kvm_feature;
