//! Domain tags on address-valued words.
//!
//! Every word in an image that denotes an address is stored pre-encoded: the
//! top nibble says which base the address is relative to, the low 28 bits are
//! the byte offset from that base. A word that is entirely zero is a null
//! literal and is left alone.

pub const TAG_SHIFT: u32 = 28;
pub const OFFSET_MASK: u32 = (1 << TAG_SHIFT) - 1;

pub const ROM_TAG: u32 = 0xc;
pub const RAM_TAG: u32 = 0xd;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Relative to the code/rodata image (the original image when executing
    /// in place, or its copy in RAM)
    Rom,
    /// Relative to the installed RAM region holding .data, .bss and the GOT
    Ram,
}

impl Domain {
    pub const fn tag(self) -> u32 {
        match self {
            Domain::Rom => ROM_TAG,
            Domain::Ram => RAM_TAG,
        }
    }

    /// Encode an offset for storage in an image
    pub const fn encode(self, offset: u32) -> u32 {
        (self.tag() << TAG_SHIFT) | (offset & OFFSET_MASK)
    }

    /// Domain named by the tag nibble of a word, if it names one
    pub const fn of(word: u32) -> Option<Domain> {
        match tag_of(word) {
            ROM_TAG => Some(Domain::Rom),
            RAM_TAG => Some(Domain::Ram),
            _ => None,
        }
    }
}

pub const fn tag_of(word: u32) -> u32 {
    word >> TAG_SHIFT
}

pub const fn offset_of(word: u32) -> u32 {
    word & OFFSET_MASK
}
