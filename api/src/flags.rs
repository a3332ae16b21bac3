//! The header's `flags` word.
//!
//! ```text
//!  31      24 23  20 19      15 14  13 12 11             0
//! +----------+------+----------+------+--+----------------+
//! | version  | post | toolchain|fp-abi|FP|     cpu id     |
//! +----------+------+----------+------+--+----------------+
//! ```
//!
//! The cpu id is the Cortex-M part number as found in the SCB CPUID
//! register. The version is the loader ABI the module was built against,
//! major in the high nibble and minor in the low nibble.

use core::fmt;

pub const CPU_ID_MASK: u32 = 0xfff;
pub const FPU_USED: u32 = 1 << 12;
const FP_ABI_SHIFT: u32 = 13;
const FP_ABI_MASK: u32 = 0x3;
const TOOLCHAIN_SHIFT: u32 = 15;
const TOOLCHAIN_MASK: u32 = 0x1f;
const POST_PROCESS_SHIFT: u32 = 20;
const POST_PROCESS_MASK: u32 = 0xf;
const VERSION_SHIFT: u32 = 24;

/// Cortex-M part numbers
pub mod cpu {
    pub const CORTEX_M0: u16 = 0xc20;
    pub const CORTEX_M0_PLUS: u16 = 0xc60;
    pub const CORTEX_M3: u16 = 0xc23;
    pub const CORTEX_M4: u16 = 0xc24;
    pub const CORTEX_M7: u16 = 0xc27;
    pub const CORTEX_M33: u16 = 0xd21;
    pub const CORTEX_M55: u16 = 0xd22;
    pub const CORTEX_M85: u16 = 0xd23;

    pub fn name(part: u16) -> Option<&'static str> {
        match part {
            CORTEX_M0 => Some("Cortex-M0"),
            CORTEX_M0_PLUS => Some("Cortex-M0+"),
            CORTEX_M3 => Some("Cortex-M3"),
            CORTEX_M4 => Some("Cortex-M4"),
            CORTEX_M7 => Some("Cortex-M7"),
            CORTEX_M33 => Some("Cortex-M33"),
            CORTEX_M55 => Some("Cortex-M55"),
            CORTEX_M85 => Some("Cortex-M85"),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FpAbi {
    Soft,
    SoftFp,
    Hard,
    Reserved,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Toolchain {
    Gcc,
    ArmClang,
    Iar,
    Other(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbiVersion {
    pub major: u8,
    pub minor: u8,
}

impl AbiVersion {
    /// ABI implemented by this loader
    pub const CURRENT: AbiVersion = AbiVersion::new(1, 0);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self {
            major: major & 0xf,
            minor: minor & 0xf,
        }
    }

    pub const fn as_byte(&self) -> u8 {
        (self.major << 4) | self.minor
    }

    /// A module built for `self` runs on a loader implementing `loader`
    /// when the majors agree and the loader is at least as new.
    pub const fn runs_on(&self, loader: AbiVersion) -> bool {
        self.major == loader.major && self.minor <= loader.minor
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct ImageFlags(u32);

impl ImageFlags {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn new(version: AbiVersion, cpu_id: u16, fpu_used: bool, abi: FpAbi) -> Self {
        let abi_bits = match abi {
            FpAbi::Soft => 0,
            FpAbi::SoftFp => 1,
            FpAbi::Hard => 2,
            FpAbi::Reserved => 3,
        };
        let fpu_bit = if fpu_used { FPU_USED } else { 0 };
        Self(
            ((version.as_byte() as u32) << VERSION_SHIFT)
                | (abi_bits << FP_ABI_SHIFT)
                | fpu_bit
                | (cpu_id as u32 & CPU_ID_MASK),
        )
    }

    pub const fn with_toolchain(self, toolchain: Toolchain) -> Self {
        let id = match toolchain {
            Toolchain::Gcc => 0,
            Toolchain::ArmClang => 1,
            Toolchain::Iar => 2,
            Toolchain::Other(id) => id as u32 & TOOLCHAIN_MASK,
        };
        Self((self.0 & !(TOOLCHAIN_MASK << TOOLCHAIN_SHIFT)) | (id << TOOLCHAIN_SHIFT))
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn cpu_id(&self) -> u16 {
        (self.0 & CPU_ID_MASK) as u16
    }

    pub const fn requires_fpu(&self) -> bool {
        self.0 & FPU_USED != 0
    }

    pub const fn fp_abi(&self) -> FpAbi {
        match (self.0 >> FP_ABI_SHIFT) & FP_ABI_MASK {
            0 => FpAbi::Soft,
            1 => FpAbi::SoftFp,
            2 => FpAbi::Hard,
            _ => FpAbi::Reserved,
        }
    }

    pub const fn toolchain(&self) -> Toolchain {
        match (self.0 >> TOOLCHAIN_SHIFT) & TOOLCHAIN_MASK {
            0 => Toolchain::Gcc,
            1 => Toolchain::ArmClang,
            2 => Toolchain::Iar,
            other => Toolchain::Other(other as u8),
        }
    }

    /// Reserved for post-processing steps applied after the module was linked
    pub const fn post_process(&self) -> u8 {
        ((self.0 >> POST_PROCESS_SHIFT) & POST_PROCESS_MASK) as u8
    }

    pub const fn version(&self) -> AbiVersion {
        let byte = (self.0 >> VERSION_SHIFT) as u8;
        AbiVersion::new(byte >> 4, byte & 0xf)
    }
}

impl fmt::Debug for ImageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFlags")
            .field("raw", &format_args!("{:#010x}", self.0))
            .field("cpu_id", &format_args!("{:#05x}", self.cpu_id()))
            .field("fpu", &self.requires_fpu())
            .field("abi", &self.fp_abi())
            .field("version", &format_args!("{}", self.version()))
            .finish()
    }
}
