//! The closed set of CPU features this crate knows how to detect.
//!
//! Each feature is declared once, together with its display name and the
//! CPUID location that encodes it. The enum, the name table and the
//! descriptor table are all generated from that single list, so they cannot
//! drift apart.

use core::fmt;
use core::str::FromStr;

use crate::cpuid::{CpuIdResult, LEAF_EXT_FEATURES, LEAF_FEATURES, LEAF_STRUCTURED_EXT};

/// One of the four CPUID output registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
}

impl Register {
    pub const fn select(self, result: &CpuIdResult) -> u32 {
        match self {
            Register::Eax => result.eax,
            Register::Ebx => result.ebx,
            Register::Ecx => result.ecx,
            Register::Edx => result.edx,
        }
    }

    pub fn select_mut(self, result: &mut CpuIdResult) -> &mut u32 {
        match self {
            Register::Eax => &mut result.eax,
            Register::Ebx => &mut result.ebx,
            Register::Ecx => &mut result.ecx,
            Register::Edx => &mut result.edx,
        }
    }
}

/// Where a feature bit lives: leaf, optional subleaf, register and bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeafDescriptor {
    pub leaf: u32,
    pub subleaf: Option<u32>,
    pub register: Register,
    pub bit: u8,
}

impl LeafDescriptor {
    pub const fn new(leaf: u32, subleaf: Option<u32>, register: Register, bit: u8) -> Self {
        assert!(bit < 32);
        Self {
            leaf,
            subleaf,
            register,
            bit,
        }
    }

    /// Subleaf to pass in `ecx`. Leaves without subleaves ignore it.
    pub const fn ecx_input(&self) -> u32 {
        match self.subleaf {
            Some(subleaf) => subleaf,
            None => 0,
        }
    }

    pub const fn mask(&self) -> u32 {
        1 << self.bit
    }

    /// Whether the bit is set in a snapshot of this descriptor's leaf.
    pub const fn test(&self, result: &CpuIdResult) -> bool {
        self.register.select(result) & self.mask() != 0
    }
}

/// A row of [`FEATURE_TABLE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureEntry {
    pub feature: CpuFeature,
    pub name: &'static str,
    pub descriptor: LeafDescriptor,
}

macro_rules! cpu_features {
    (
        $(
            $(#[$attr:meta])*
            $variant:ident = $name:literal => $leaf:expr, $subleaf:expr, $reg:ident[$bit:literal];
        )*
    ) => {
        /// A CPU capability. Ordinals follow declaration order and are stable.
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum CpuFeature {
            $(
                $(#[$attr])*
                $variant,
            )*
        }

        impl CpuFeature {
            /// Every feature, in registry order.
            pub const ALL: &'static [CpuFeature] = &[$(CpuFeature::$variant),*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(CpuFeature::$variant => $name,)*
                }
            }

            pub const fn descriptor(self) -> LeafDescriptor {
                match self {
                    $(CpuFeature::$variant => LeafDescriptor::new($leaf, $subleaf, Register::$reg, $bit),)*
                }
            }
        }

        /// Identifier, display name and encoding of every feature, in registry order.
        pub const FEATURE_TABLE: &[FeatureEntry] = &[
            $(
                FeatureEntry {
                    feature: CpuFeature::$variant,
                    name: $name,
                    descriptor: LeafDescriptor::new($leaf, $subleaf, Register::$reg, $bit),
                },
            )*
        ];
    };
}

cpu_features! {
    // Processor info and feature bits, ECX
    /// Streaming SIMD Extensions 3
    Sse3 = "SSE3" => LEAF_FEATURES, None, Ecx[0];
    /// Carry-less multiplication
    Pclmulqdq = "PCLMULQDQ" => LEAF_FEATURES, None, Ecx[1];
    /// 64-bit debug store area
    Dtes64 = "DTES64" => LEAF_FEATURES, None, Ecx[2];
    /// MONITOR/MWAIT
    Monitor = "MONITOR" => LEAF_FEATURES, None, Ecx[3];
    /// CPL qualified debug store
    DsCpl = "DS_CPL" => LEAF_FEATURES, None, Ecx[4];
    /// Virtual machine extensions (VT-x)
    Vmx = "VMX" => LEAF_FEATURES, None, Ecx[5];
    /// Safer mode extensions
    Smx = "SMX" => LEAF_FEATURES, None, Ecx[6];
    /// Enhanced SpeedStep
    Est = "EST" => LEAF_FEATURES, None, Ecx[7];
    /// Thermal monitor 2
    Tm2 = "TM2" => LEAF_FEATURES, None, Ecx[8];
    /// Supplemental SSE3
    Ssse3 = "SSSE3" => LEAF_FEATURES, None, Ecx[9];
    /// L1 context ID
    CnxtId = "CNXT_ID" => LEAF_FEATURES, None, Ecx[10];
    /// Fused multiply-add
    Fma = "FMA" => LEAF_FEATURES, None, Ecx[12];
    /// CMPXCHG16B
    Cx16 = "CX16" => LEAF_FEATURES, None, Ecx[13];
    /// xTPR update control
    Xtpr = "XTPR" => LEAF_FEATURES, None, Ecx[14];
    /// Perf/debug capability MSR
    Pdcm = "PDCM" => LEAF_FEATURES, None, Ecx[15];
    /// Process-context identifiers
    Pcid = "PCID" => LEAF_FEATURES, None, Ecx[17];
    /// Direct cache access
    Dca = "DCA" => LEAF_FEATURES, None, Ecx[18];
    Sse4_1 = "SSE4.1" => LEAF_FEATURES, None, Ecx[19];
    Sse4_2 = "SSE4.2" => LEAF_FEATURES, None, Ecx[20];
    X2apic = "X2APIC" => LEAF_FEATURES, None, Ecx[21];
    /// MOVBE (move after swapping bytes)
    Movbe = "MOVBE" => LEAF_FEATURES, None, Ecx[22];
    Popcnt = "POPCNT" => LEAF_FEATURES, None, Ecx[23];
    /// Local APIC supports TSC deadline mode
    TscDeadline = "TSC_DEADLINE" => LEAF_FEATURES, None, Ecx[24];
    /// AES-NI
    Aes = "AES" => LEAF_FEATURES, None, Ecx[25];
    /// XSAVE/XRSTOR/XSETBV/XGETBV
    Xsave = "XSAVE" => LEAF_FEATURES, None, Ecx[26];
    /// CR4.OSXSAVE has been set by the OS
    Osxsave = "OSXSAVE" => LEAF_FEATURES, None, Ecx[27];
    Avx = "AVX" => LEAF_FEATURES, None, Ecx[28];
    /// Half-precision conversions
    F16c = "F16C" => LEAF_FEATURES, None, Ecx[29];
    Rdrand = "RDRAND" => LEAF_FEATURES, None, Ecx[30];

    // Processor info and feature bits, EDX
    /// x87 FPU on chip
    Fpu = "FPU" => LEAF_FEATURES, None, Edx[0];
    /// Virtual 8086 mode extensions
    Vme = "VME" => LEAF_FEATURES, None, Edx[1];
    /// Debugging extensions
    De = "DE" => LEAF_FEATURES, None, Edx[2];
    /// Page size extension
    Pse = "PSE" => LEAF_FEATURES, None, Edx[3];
    /// Time stamp counter
    Tsc = "TSC" => LEAF_FEATURES, None, Edx[4];
    /// Model specific registers
    Msr = "MSR" => LEAF_FEATURES, None, Edx[5];
    /// Physical address extension
    Pae = "PAE" => LEAF_FEATURES, None, Edx[6];
    /// Machine check exception
    Mce = "MCE" => LEAF_FEATURES, None, Edx[7];
    /// CMPXCHG8B
    Cx8 = "CX8" => LEAF_FEATURES, None, Edx[8];
    /// APIC on chip
    Apic = "APIC" => LEAF_FEATURES, None, Edx[9];
    /// SYSENTER/SYSEXIT
    Sep = "SEP" => LEAF_FEATURES, None, Edx[11];
    /// Memory type range registers
    Mtrr = "MTRR" => LEAF_FEATURES, None, Edx[12];
    /// Page global bit
    Pge = "PGE" => LEAF_FEATURES, None, Edx[13];
    /// Machine check architecture
    Mca = "MCA" => LEAF_FEATURES, None, Edx[14];
    /// Conditional move
    Cmov = "CMOV" => LEAF_FEATURES, None, Edx[15];
    /// Page attribute table
    Pat = "PAT" => LEAF_FEATURES, None, Edx[16];
    /// 36-bit page size extension
    Pse36 = "PSE_36" => LEAF_FEATURES, None, Edx[17];
    /// Processor serial number
    Psn = "PSN" => LEAF_FEATURES, None, Edx[18];
    Clflush = "CLFLUSH" => LEAF_FEATURES, None, Edx[19];
    /// Debug store
    Ds = "DS" => LEAF_FEATURES, None, Edx[21];
    /// Thermal monitor and software clock facilities
    Acpi = "ACPI" => LEAF_FEATURES, None, Edx[22];
    Mmx = "MMX" => LEAF_FEATURES, None, Edx[23];
    /// FXSAVE/FXRSTOR
    Fxsr = "FXSR" => LEAF_FEATURES, None, Edx[24];
    Sse = "SSE" => LEAF_FEATURES, None, Edx[25];
    Sse2 = "SSE2" => LEAF_FEATURES, None, Edx[26];
    /// Self snoop
    Ss = "SS" => LEAF_FEATURES, None, Edx[27];
    /// Multi-threading
    Htt = "HTT" => LEAF_FEATURES, None, Edx[28];
    /// Thermal monitor
    Tm = "TM" => LEAF_FEATURES, None, Edx[29];
    /// Pending break enable
    Pbe = "PBE" => LEAF_FEATURES, None, Edx[31];

    // Extended processor info and feature bits
    /// SYSCALL/SYSRET
    Syscall = "SYSCALL" => LEAF_EXT_FEATURES, None, Edx[11];
    /// No-execute page protection
    Nx = "NX" => LEAF_EXT_FEATURES, None, Edx[20];
    /// 1 GiB pages
    Pdpe1gb = "PDPE1GB" => LEAF_EXT_FEATURES, None, Edx[26];
    /// RDTSCP and IA32_TSC_AUX
    Rdtscp = "RDTSCP" => LEAF_EXT_FEATURES, None, Edx[27];
    /// Long mode
    Lm = "LM" => LEAF_EXT_FEATURES, None, Edx[29];
    /// Secure virtual machine (AMD-V)
    Svm = "SVM" => LEAF_EXT_FEATURES, None, Ecx[2];
    Sse4a = "SSE4a" => LEAF_EXT_FEATURES, None, Ecx[6];

    // Structured extended feature flags
    Avx2 = "AVX2" => LEAF_STRUCTURED_EXT, Some(0), Ebx[5];
    /// Bit manipulation instruction set 1
    Bmi1 = "BMI1" => LEAF_STRUCTURED_EXT, Some(0), Ebx[3];
    /// Bit manipulation instruction set 2
    Bmi2 = "BMI2" => LEAF_STRUCTURED_EXT, Some(0), Ebx[8];
    /// LZCNT (advanced bit manipulation)
    Lzcnt = "LZCNT" => LEAF_EXT_FEATURES, None, Ecx[5];

    // Appended after the original set; new features go below.
    /// Running under a hypervisor
    Hypervisor = "HYPERVISOR" => LEAF_FEATURES, None, Ecx[31];
    /// RDFSBASE/WRFSBASE and friends
    Fsgsbase = "FSGSBASE" => LEAF_STRUCTURED_EXT, Some(0), Ebx[0];
    /// Supervisor-mode execution prevention
    Smep = "SMEP" => LEAF_STRUCTURED_EXT, Some(0), Ebx[7];
    Invpcid = "INVPCID" => LEAF_STRUCTURED_EXT, Some(0), Ebx[10];
    Avx512f = "AVX512F" => LEAF_STRUCTURED_EXT, Some(0), Ebx[16];
    Rdseed = "RDSEED" => LEAF_STRUCTURED_EXT, Some(0), Ebx[18];
    /// Supervisor-mode access prevention
    Smap = "SMAP" => LEAF_STRUCTURED_EXT, Some(0), Ebx[20];
    /// SHA extensions
    Sha = "SHA" => LEAF_STRUCTURED_EXT, Some(0), Ebx[29];
    /// User-mode instruction prevention
    Umip = "UMIP" => LEAF_STRUCTURED_EXT, Some(0), Ecx[2];
}

const _: () = {
    // FeatureSet packs ordinals into a u128.
    assert!(CpuFeature::ALL.len() <= 128);
    assert!(FEATURE_TABLE.len() == CpuFeature::ALL.len());
    let mut i = 0;
    while i < CpuFeature::ALL.len() {
        assert!(CpuFeature::ALL[i] as usize == i);
        i += 1;
    }
};

impl CpuFeature {
    pub const COUNT: usize = CpuFeature::ALL.len();

    pub const fn ordinal(self) -> u8 {
        self as u8
    }
}

/// Display name of a feature.
pub const fn feature_name(feature: CpuFeature) -> &'static str {
    feature.name()
}

impl fmt::Display for CpuFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A feature identifier arriving from outside the type system did not
/// match the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureError {
    UnknownOrdinal(u8),
    UnknownName,
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureError::UnknownOrdinal(ordinal) => write!(f, "unknown cpu feature ordinal {}", ordinal),
            FeatureError::UnknownName => f.write_str("unknown cpu feature name"),
        }
    }
}

impl TryFrom<u8> for CpuFeature {
    type Error = FeatureError;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        CpuFeature::ALL
            .get(usize::from(ordinal))
            .copied()
            .ok_or(FeatureError::UnknownOrdinal(ordinal))
    }
}

impl FromStr for CpuFeature {
    type Err = FeatureError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        CpuFeature::ALL
            .iter()
            .copied()
            .find(|feature| feature.name() == name)
            .ok_or(FeatureError::UnknownName)
    }
}

/// A set of features, one bit per ordinal. Iterates in registry order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet(u128);

impl FeatureSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(&self, feature: CpuFeature) -> bool {
        self.0 & (1 << feature.ordinal()) != 0
    }

    pub fn insert(&mut self, feature: CpuFeature) {
        self.0 |= 1 << feature.ordinal();
    }

    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = CpuFeature> + '_ {
        CpuFeature::ALL.iter().copied().filter(move |&feature| self.contains(feature))
    }
}

impl FromIterator<CpuFeature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = CpuFeature>>(iter: I) -> Self {
        let mut set = FeatureSet::empty();
        for feature in iter {
            set.insert(feature);
        }
        set
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(CpuFeature::name)).finish()
    }
}
