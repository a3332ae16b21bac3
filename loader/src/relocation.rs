//! Rewrites the tagged address words of an installed RAM image.
//!
//! Two tables name the words to rewrite: the GOT, a contiguous run of words
//! inside RAM, and the relocation table, a list of RAM offsets stored in the
//! image. Each word holds a domain tag and an offset; after relocation it
//! holds the absolute address of that offset in the chosen region.
//!
//! New values are always computed from the word as the image supplies it,
//! never from what is currently in RAM, so a word listed twice is rewritten
//! to the same value both times.

use netload_api::image::CONTEXT_SIZE;
use netload_api::tag::{self, Domain};

use crate::address::DeviceAddress;
use crate::binary::Descriptor;
use crate::error::{BinaryFault, LoaderError, LoaderResult};
use crate::log::TaggedLogger;

const LOGGER: TaggedLogger = TaggedLogger::new("RELOC", 35);

fn bad_relocation() -> LoaderError {
    LoaderError::InvalidBinary(BinaryFault::BadRelocation)
}

/// Decoded form of an address word
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Null,
    Ram(u32),
    Rom(u32),
}

/// Highest offset each domain may name. An offset equal to the size is
/// allowed, so that end-of-section pointers survive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub ram: u32,
    pub rom: u32,
}

/// Where each domain ended up
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bases {
    pub ram: DeviceAddress,
    pub rom: DeviceAddress,
}

impl Slot {
    pub fn classify(word: u32, limits: &Limits) -> LoaderResult<Slot> {
        if word == 0 {
            return Ok(Slot::Null);
        }
        let offset = tag::offset_of(word);
        match Domain::of(word) {
            Some(Domain::Ram) if offset <= limits.ram => Ok(Slot::Ram(offset)),
            Some(Domain::Rom) if offset <= limits.rom => Ok(Slot::Rom(offset)),
            _ => Err(bad_relocation()),
        }
    }

    pub fn resolve(&self, bases: &Bases) -> DeviceAddress {
        match self {
            Slot::Null => DeviceAddress::new(0),
            Slot::Ram(offset) => bases.ram + *offset,
            Slot::Rom(offset) => bases.rom + *offset,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SiteKind {
    Got,
    Relocation,
}

/// A RAM word that must be rewritten
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Site {
    pub kind: SiteKind,
    pub ram_offset: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RelocationStats {
    pub got: usize,
    pub relocations: usize,
    /// Null words, counted in the totals above but left at zero
    pub null: usize,
}

/// Every GOT slot, then every relocation table entry
pub fn sites<'a>(desc: &Descriptor<'a>) -> impl Iterator<Item = Site> + 'a {
    let sections = *desc.sections();
    let got = (sections.got_start..sections.got_end)
        .step_by(4)
        .map(|ram_offset| Site {
            kind: SiteKind::Got,
            ram_offset,
        });
    let table = desc.relocation_table().map(|ram_offset| Site {
        kind: SiteKind::Relocation,
        ram_offset,
    });
    got.chain(table)
}

/// Decode a site without touching memory
fn inspect(desc: &Descriptor, site: &Site, limits: &Limits) -> LoaderResult<(u32, Slot)> {
    let offset = site.ram_offset;
    if offset % 4 != 0 {
        return Err(bad_relocation());
    }
    let context_start = desc.context_offset();
    let context_end = context_start + CONTEXT_SIZE;
    if offset + 4 > context_start && offset < context_end {
        return Err(bad_relocation());
    }
    let raw = desc.initial_ram_word(offset).ok_or_else(bad_relocation)?;
    Ok((raw, Slot::classify(raw, limits)?))
}

/// Check every site before anything is written. A failure here leaves the
/// caller's memory untouched.
pub fn verify(desc: &Descriptor, limits: &Limits) -> LoaderResult<usize> {
    let mut count = 0;
    for site in sites(desc) {
        inspect(desc, &site, limits)?;
        count += 1;
    }
    Ok(count)
}

/// Rewrite every site in `ram`, which must already hold the zeroed and
/// data-initialized RAM image
pub fn apply(
    desc: &Descriptor,
    ram: &mut [u8],
    bases: &Bases,
    limits: &Limits,
    trace: bool,
) -> LoaderResult<RelocationStats> {
    let mut stats = RelocationStats::default();
    for site in sites(desc) {
        let (raw, slot) = inspect(desc, &site, limits)?;
        let value = slot.resolve(bases);
        if !netload_api::image::write_word(ram, site.ram_offset as usize, value.as_u32()) {
            return Err(bad_relocation());
        }
        match site.kind {
            SiteKind::Got => stats.got += 1,
            SiteKind::Relocation => stats.relocations += 1,
        }
        if slot == Slot::Null {
            stats.null += 1;
        }
        if trace {
            LOGGER.log(format_args!(
                "{:?} {:#x}: {:#010x} -> {:?}",
                site.kind, site.ram_offset, raw, value
            ));
        }
    }
    Ok(stats)
}
