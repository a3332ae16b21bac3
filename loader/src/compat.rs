//! Checks that an image was built for the processor and ABI it is about to
//! run on. Every check runs before any memory is written.

use netload_api::flags::ImageFlags;

use crate::config::LoaderConfig;
use crate::error::{BinaryFault, LoaderError, LoaderResult};

/// What the loader needs to know about the processor it runs on
pub trait Processor {
    /// PARTNO field of the CPUID register, e.g. 0xc27 for a Cortex-M7
    fn part_number(&self) -> u16;

    /// Whether floating point instructions can execute right now
    fn fpu_enabled(&self) -> bool;
}

/// A processor described by fixed values, for boards that already know what
/// they are and for host tooling
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StaticProcessor {
    pub part: u16,
    pub fpu: bool,
}

impl StaticProcessor {
    pub const fn new(part: u16, fpu: bool) -> Self {
        Self { part, fpu }
    }
}

impl Processor for StaticProcessor {
    fn part_number(&self) -> u16 {
        self.part
    }

    fn fpu_enabled(&self) -> bool {
        self.fpu
    }
}

/// Reads the System Control Block of the running Cortex-M core
#[cfg(target_arch = "arm")]
#[derive(Copy, Clone, Debug, Default)]
pub struct CortexM;

#[cfg(target_arch = "arm")]
impl CortexM {
    const CPUID: *const u32 = 0xe000_ed00 as *const u32;
    const CPACR: *const u32 = 0xe000_ed88 as *const u32;
}

#[cfg(target_arch = "arm")]
impl Processor for CortexM {
    fn part_number(&self) -> u16 {
        let cpuid = unsafe { core::ptr::read_volatile(Self::CPUID) };
        ((cpuid >> 4) & 0xfff) as u16
    }

    fn fpu_enabled(&self) -> bool {
        // CP10 and CP11 both granted full access
        let cpacr = unsafe { core::ptr::read_volatile(Self::CPACR) };
        (cpacr >> 20) & 0xf == 0xf
    }
}

pub fn check<P: Processor + ?Sized>(
    flags: ImageFlags,
    cpu: &P,
    config: &LoaderConfig,
) -> LoaderResult<()> {
    if !flags.version().runs_on(config.version) {
        return Err(LoaderError::InvalidBinary(BinaryFault::VersionMismatch));
    }
    if flags.cpu_id() != cpu.part_number() {
        return Err(LoaderError::InvalidBinary(BinaryFault::CpuMismatch));
    }
    if config.enforce_fpu && flags.requires_fpu() && !cpu.fpu_enabled() {
        return Err(LoaderError::InvalidBinary(BinaryFault::FpuUnavailable));
    }
    Ok(())
}
